// Runtime configuration
//
// Every setting has a default and can be overridden through the environment:
// - LEDGER_DIFFICULTY     leading zero hex digits required of a block hash
// - LEDGER_MINING_REWARD  amount minted to the miner of each block
// - LEDGER_HOST           address the HTTP server binds to
// - LEDGER_PORT           port the HTTP server binds to

use thiserror::Error;

/// Largest difficulty a SHA-256 hex digest can satisfy
pub const MAX_DIFFICULTY: u32 = 64;

pub const DEFAULT_DIFFICULTY: u32 = 4;
pub const DEFAULT_MINING_REWARD: f64 = 100.0;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid difficulty {0}: must be between 1 and 64")]
    InvalidDifficulty(u32),

    #[error("Invalid mining reward {0}: must be a non-negative number")]
    InvalidMiningReward(f64),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Consensus parameters of a ledger instance
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    difficulty: u32,
    mining_reward: f64,
}

impl LedgerConfig {
    pub fn new(difficulty: u32, mining_reward: f64) -> Result<Self, ConfigError> {
        if difficulty == 0 || difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::InvalidDifficulty(difficulty));
        }

        if !mining_reward.is_finite() || mining_reward < 0.0 {
            return Err(ConfigError::InvalidMiningReward(mining_reward));
        }

        Ok(LedgerConfig {
            difficulty,
            mining_reward,
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let difficulty = parse_or(&lookup, "LEDGER_DIFFICULTY", DEFAULT_DIFFICULTY)?;
        let mining_reward = parse_or(&lookup, "LEDGER_MINING_REWARD", DEFAULT_MINING_REWARD)?;
        let port = parse_or(&lookup, "LEDGER_PORT", DEFAULT_PORT)?;
        let host = lookup("LEDGER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        Ok(AppConfig {
            ledger: LedgerConfig::new(difficulty, mining_reward)?,
            server: ServerConfig { host, port },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::InvalidValue { key, value })
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.ledger.difficulty(), 4);
        assert_eq!(config.ledger.mining_reward(), 100.0);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("LEDGER_DIFFICULTY", "2"),
            ("LEDGER_MINING_REWARD", "12.5"),
            ("LEDGER_HOST", "0.0.0.0"),
            ("LEDGER_PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(config.ledger.difficulty(), 2);
        assert_eq!(config.ledger.mining_reward(), 12.5);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_invalid_values() {
        let result = AppConfig::from_lookup(lookup_from(&[("LEDGER_DIFFICULTY", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidDifficulty(0))));

        let result = AppConfig::from_lookup(lookup_from(&[("LEDGER_DIFFICULTY", "65")]));
        assert!(matches!(result, Err(ConfigError::InvalidDifficulty(65))));

        let result = AppConfig::from_lookup(lookup_from(&[("LEDGER_MINING_REWARD", "-5")]));
        assert!(matches!(result, Err(ConfigError::InvalidMiningReward(_))));

        let result = AppConfig::from_lookup(lookup_from(&[("LEDGER_PORT", "eighty")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: "LEDGER_PORT", .. })
        ));
    }
}
