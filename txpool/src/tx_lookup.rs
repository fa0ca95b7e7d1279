use std::collections::HashSet;

use dashmap::DashMap;

use primitive_types::H256;
use types::signer::Signer;
use types::Address;

use crate::TransactionRef;

/// Content addressed index of every transaction currently in the pool.
/// Reads are safe without the pool lock; writes happen under it.
#[derive(Debug, Default)]
pub struct TxLookup {
    txs: DashMap<H256, TransactionRef>,
}

impl TxLookup {
    pub fn new() -> Self {
        Self {
            txs: Default::default(),
        }
    }

    pub fn get(&self, hash: &H256) -> Option<TransactionRef> {
        self.txs.get(hash).map(|kv| kv.value().clone())
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.txs.contains_key(hash)
    }

    pub fn add(&self, tx: TransactionRef) {
        self.txs.insert(tx.hash(), tx);
    }

    pub fn remove(&self, hash: &H256) -> Option<TransactionRef> {
        self.txs.remove(hash).map(|(_, tx)| tx)
    }

    pub fn count(&self) -> usize {
        self.txs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = TransactionRef> + '_ {
        self.txs.iter().map(|kv| kv.value().clone())
    }
}

/// Set of sender addresses whose transactions are treated as local: exempt
/// from pricing constraints and eviction.
#[derive(Debug)]
pub struct AccountSet {
    accounts: HashSet<Address>,
    signer: Signer,
}

impl AccountSet {
    pub fn new(signer: Signer) -> Self {
        Self {
            accounts: HashSet::new(),
            signer,
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains(address)
    }

    /// Whether the transaction's sender is tracked as local.
    pub fn contains_sender(&self, tx: &TransactionRef) -> bool {
        self.signer
            .sender(tx)
            .map(|from| self.accounts.contains(&from))
            .unwrap_or(false)
    }

    /// Inserts the address, reporting whether it was newly added.
    pub fn add(&mut self, address: Address) -> bool {
        self.accounts.insert(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.accounts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
