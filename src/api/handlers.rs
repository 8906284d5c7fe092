use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::blockchain::{Address, Block, LedgerError, Node, Transaction, Wallet};

/// Shared node state
pub type NodeData = web::Data<Node>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's PKCS#8 PEM private key (for signing)
    pub private_key: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Response for the transaction endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The accepted transaction
    pub transaction: Transaction,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address (PEM public key)
    pub address: String,

    /// The wallet's private key (PKCS#8 PEM)
    pub private_key: String,
}

/// Query for the balance endpoint
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BalanceQuery {
    /// The address to look up
    pub address: String,
}

/// Balance of one address
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    /// The address of the account
    pub address: String,

    /// The balance replayed from the chain
    pub balance: f64,
}

fn error_response(status: actix_web::http::StatusCode, message: String) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    let (chain, validity) = node.ledger().get_validated_chain();
    if let Err(err) = &validity {
        warn!("Chain integrity check failed: {}", err);
    }
    let is_valid = validity.is_ok();

    let response = ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger().get_pending_transactions())
}

/// Create a new transaction
///
/// Builds, signs and queues a transfer from the wallet owning the private key
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data or insufficient balance")
    )
)]
pub async fn new_transaction(
    node: NodeData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();

    let wallet = match Wallet::from_private_key_pem(&request.private_key) {
        Ok(wallet) => wallet,
        Err(err) => {
            return error_response(
                actix_web::http::StatusCode::BAD_REQUEST,
                format!("Invalid private key: {}", err),
            );
        }
    };

    let transaction = match wallet.create_transaction(
        Address(request.recipient),
        request.amount,
        node.ledger(),
    ) {
        Some(transaction) => transaction,
        None => {
            return error_response(
                actix_web::http::StatusCode::BAD_REQUEST,
                format!(
                    "Insufficient balance or invalid amount: available {}, requested {}",
                    node.ledger().get_balance(wallet.address()),
                    request.amount
                ),
            );
        }
    };

    match node.submit_transaction(transaction.clone()) {
        Ok(()) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction will be added to the next block".to_string(),
            transaction,
        }),
        Err(err) => error_response(
            actix_web::http::StatusCode::BAD_REQUEST,
            format!("Failed to add transaction: {}", err),
        ),
    }
}

/// Submit a signed transaction
///
/// Entry point for transactions signed elsewhere, such as those relayed by peers
#[utoipa::path(
    post,
    path = "/api/v1/transactions/submit",
    request_body = Transaction,
    responses(
        (status = 202, description = "Transaction accepted into the pending pool"),
        (status = 400, description = "Transaction rejected")
    )
)]
pub async fn submit_transaction(
    node: NodeData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    match node.submit_transaction(transaction.into_inner()) {
        Ok(()) => HttpResponse::Accepted().json(serde_json::json!({ "accepted": true })),
        Err(err) => error_response(
            actix_web::http::StatusCode::BAD_REQUEST,
            format!("Transaction rejected: {}", err),
        ),
    }
}

/// Submit a mined block
///
/// Entry point for blocks mined by peers; the block must extend the local tip
#[utoipa::path(
    post,
    path = "/api/v1/blocks",
    request_body = Block,
    responses(
        (status = 202, description = "Block appended to the chain"),
        (status = 400, description = "Block rejected")
    )
)]
pub async fn receive_block(node: NodeData, block: web::Json<Block>) -> impl Responder {
    let block = block.into_inner();

    // Appending waits behind any proof-of-work search holding the chain
    let worker = node.clone();
    let result = web::block(move || worker.on_block_received(block)).await;

    match result {
        Ok(Ok(())) => HttpResponse::Accepted().json(serde_json::json!({ "accepted": true })),
        Ok(Err(err)) => error_response(
            actix_web::http::StatusCode::BAD_REQUEST,
            format!("Block rejected: {}", err),
        ),
        Err(err) => error_response(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Block worker failed: {}", err),
        ),
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid mining request"),
        (status = 503, description = "Mining cancelled by shutdown")
    )
)]
pub async fn mine_block(node: NodeData, mine_req: web::Json<MineRequest>) -> impl Responder {
    let miner_address = Address(mine_req.into_inner().miner_address);

    // Proof of work is CPU bound; keep it off the async workers
    let worker = node.clone();
    let result = web::block(move || worker.mine(&miner_address)).await;

    match result {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Ok(Err(LedgerError::BlockError(err))) => error_response(
            actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
            format!("Failed to mine block: {}", err),
        ),
        Ok(Err(err)) => error_response(
            actix_web::http::StatusCode::BAD_REQUEST,
            format!("Failed to mine block: {}", err),
        ),
        Err(err) => error_response(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Mining worker failed: {}", err),
        ),
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger().is_chain_valid())
}

/// Create a new wallet
///
/// Creates a new wallet with a random RSA keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet() -> impl Responder {
    let result = web::block(|| {
        let wallet = Wallet::new()?;
        let private_key = wallet.export_private_key_pem()?;
        Ok::<_, crate::blockchain::crypto::CryptoError>(WalletResponse {
            address: wallet.address().0.clone(),
            private_key,
        })
    })
    .await;

    match result {
        Ok(Ok(response)) => HttpResponse::Created().json(response),
        Ok(Err(err)) => error_response(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to create wallet: {}", err),
        ),
        Err(err) => error_response(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Wallet worker failed: {}", err),
        ),
    }
}

/// Get wallet balance
///
/// Returns the balance of an address, replayed from the chain
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance",
    params(BalanceQuery),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = AccountResponse)
    )
)]
pub async fn get_wallet_balance(node: NodeData, query: web::Query<BalanceQuery>) -> impl Responder {
    let address = Address(query.into_inner().address);
    let balance = node.ledger().get_balance(&address);

    HttpResponse::Ok().json(AccountResponse {
        address: address.0,
        balance,
    })
}

/// Get all accounts
///
/// Returns the balance of every address that appears in the chain
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    responses(
        (status = 200, description = "Accounts retrieved successfully", body = Vec<AccountResponse>)
    )
)]
pub async fn get_all_accounts(node: NodeData) -> impl Responder {
    let accounts: Vec<AccountResponse> = node
        .ledger()
        .get_balances()
        .into_iter()
        .map(|(address, balance)| AccountResponse {
            address: address.0,
            balance,
        })
        .collect();

    HttpResponse::Ok().json(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::{Ledger, LoggingBroadcaster};
    use crate::config::LedgerConfig;
    use actix_web::{test, App};
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn test_node() -> NodeData {
        let ledger = Ledger::new(LedgerConfig::new(1, 100.0).unwrap()).unwrap();
        web::Data::new(Node::new(ledger, Arc::new(LoggingBroadcaster)))
    }

    #[actix_web::test]
    async fn test_mine_and_query_balance() {
        let node = test_node();
        let app = test::init_service(
            App::new().app_data(node.clone()).configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(serde_json::json!({ "miner_address": "miner" }))
            .to_request();
        let resp: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.block.transactions().len(), 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/wallet/balance?address=miner")
            .to_request();
        let resp: AccountResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.address, "miner");
        assert_eq!(resp.balance, 100.0);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let resp: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.length, 2);
        assert!(resp.is_valid);
    }

    #[actix_web::test]
    async fn test_new_transaction_requires_balance() {
        let node = test_node();
        let app = test::init_service(
            App::new().app_data(node.clone()).configure(configure_routes),
        )
        .await;

        let wallet = Wallet::new().unwrap();
        let private_key = wallet.export_private_key_pem().unwrap();
        let request = serde_json::json!({
            "private_key": private_key,
            "recipient": "bob",
            "amount": 10.0,
        });

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(&request)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        node.mine(wallet.address()).unwrap();

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(&request)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CREATED);
        assert_eq!(node.ledger().get_pending_transactions().len(), 1);
    }

    #[actix_web::test]
    async fn test_forged_block_is_rejected() {
        let node = test_node();
        let app = test::init_service(
            App::new().app_data(node.clone()).configure(configure_routes),
        )
        .await;

        let producer = test_node();
        let block = producer.mine(&Address::new("miner")).unwrap();
        let mut forged = serde_json::to_value(&block).unwrap();
        forged["nonce"] = serde_json::json!(block.nonce() + 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/blocks")
            .set_json(&forged)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/blocks")
            .set_json(&block)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::ACCEPTED);
        assert_eq!(node.ledger().get_chain().len(), 2);
    }

    #[actix_web::test]
    async fn test_reads_answer_while_block_waits_on_mining() {
        let ledger = Ledger::new(LedgerConfig::new(64, 100.0).unwrap()).unwrap();
        let shutdown = ledger.shutdown_handle();
        let node = web::Data::new(Node::new(ledger, Arc::new(LoggingBroadcaster)));
        let app = Rc::new(
            test::init_service(App::new().app_data(node.clone()).configure(configure_routes))
                .await,
        );

        // Unreachable difficulty: runs until the shutdown flag is raised
        let miner = node.clone();
        let mining = thread::spawn(move || miner.mine(&Address::new("miner")));
        actix_web::rt::time::sleep(Duration::from_millis(100)).await;

        let block = test_node().mine(&Address::new("peer")).unwrap();
        let posting = actix_web::rt::spawn({
            let app = app.clone();
            async move {
                let req = test::TestRequest::post()
                    .uri("/api/v1/blocks")
                    .set_json(&block)
                    .to_request();
                test::call_service(&*app, req).await.status()
            }
        });
        actix_web::rt::time::sleep(Duration::from_millis(50)).await;

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let read = actix_web::rt::time::timeout(
            Duration::from_secs(5),
            test::call_and_read_body_json::<_, _, ChainResponse>(&*app, req),
        )
        .await;

        shutdown.trigger();
        assert!(mining.join().unwrap().is_err());

        let resp = read.expect("chain read blocked behind the pending block");
        assert_eq!(resp.length, 1);

        // The block only meets difficulty 1, far below this node's
        let status = posting.await.unwrap();
        assert_eq!(status, actix_web::http::StatusCode::BAD_REQUEST);
    }
}
