use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tuning knobs of the transaction pool. Every field has a usable default;
/// `sanitize` repairs unreasonable values instead of failing startup.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, rename_all = "snake_case")]
pub struct TxPoolConfig {
    /// Whether local transaction handling should be disabled
    pub no_locals: bool,
    /// Journal of local transactions to survive node restarts ("" disables)
    pub journal: String,
    /// Time interval to regenerate the local transaction journal
    pub rejournal: Duration,
    /// Minimum gas price to enforce for acceptance into the pool
    pub price_limit: u128,
    /// Minimum price bump percentage to replace an already existing transaction (nonce)
    pub price_bump: u128,
    /// Number of executable transaction slots guaranteed per account
    pub account_slots: u64,
    /// Maximum number of executable transaction slots for all accounts
    pub global_slots: u64,
    /// Maximum number of non-executable transaction slots permitted per account
    pub account_queue: u64,
    /// Maximum number of non-executable transaction slots for all accounts
    pub global_queue: u64,
    /// Maximum amount of time non-executable transactions are queued
    pub lifetime: Duration,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            no_locals: false,
            journal: "transactions.journal".to_string(),
            rejournal: Duration::from_secs(60 * 60),
            price_limit: 1,
            price_bump: 10,
            account_slots: 16,
            global_slots: 4096,
            account_queue: 64,
            global_queue: 1024,
            lifetime: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl TxPoolConfig {
    /// Returns a copy with impossible settings replaced by their defaults.
    pub fn sanitize(&self) -> Self {
        let default = Self::default();
        let mut conf = self.clone();
        if conf.rejournal < Duration::from_secs(1) {
            warn!(provided = ?conf.rejournal, updated = ?default.rejournal, "sanitizing invalid txpool journal time");
            conf.rejournal = default.rejournal;
        }
        if conf.price_limit < 1 {
            warn!(provided = conf.price_limit, updated = default.price_limit, "sanitizing invalid txpool price limit");
            conf.price_limit = default.price_limit;
        }
        if conf.price_bump < 1 {
            warn!(provided = conf.price_bump, updated = default.price_bump, "sanitizing invalid txpool price bump");
            conf.price_bump = default.price_bump;
        }
        conf
    }
}
