// API module
//
// HTTP surface over the ledger node

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
