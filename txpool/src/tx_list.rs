use std::collections::BTreeMap;

use crate::TransactionRef;

/// Nonce indexed map of transactions belonging to one account, with a cached
/// flattened view for cheap ordered enumeration. Every mutation invalidates
/// the cache.
#[derive(Debug, Default, Clone)]
pub struct TxSortedMap {
    items: BTreeMap<u64, TransactionRef>,
    cache: Option<Vec<TransactionRef>>,
}

impl TxSortedMap {
    pub fn new() -> Self {
        Self {
            items: Default::default(),
            cache: None,
        }
    }

    pub fn put(&mut self, tx: TransactionRef) {
        self.cache = None;
        self.items.insert(tx.nonce(), tx);
    }

    pub fn get(&self, nonce: u64) -> Option<&TransactionRef> {
        self.items.get(&nonce)
    }

    pub fn remove(&mut self, nonce: u64) -> bool {
        let removed = self.items.remove(&nonce).is_some();
        if removed {
            self.cache = None;
        }
        removed
    }

    /// Removes and returns every transaction with a nonce below `threshold`.
    pub fn forward(&mut self, threshold: u64) -> Vec<TransactionRef> {
        self.filter(|tx| tx.nonce() < threshold)
    }

    /// Removes and returns every transaction matching the predicate.
    pub fn filter<F>(&mut self, predicate: F) -> Vec<TransactionRef>
    where
        F: Fn(&TransactionRef) -> bool,
    {
        let nonces: Vec<u64> = self
            .items
            .iter()
            .filter(|(_, tx)| predicate(tx))
            .map(|(nonce, _)| *nonce)
            .collect();
        if nonces.is_empty() {
            return Vec::new();
        }
        self.cache = None;
        nonces
            .into_iter()
            .filter_map(|nonce| self.items.remove(&nonce))
            .collect()
    }

    /// Removes and returns the maximal contiguous run starting at `start`.
    /// Yields nothing when `start` itself is absent.
    pub fn ready(&mut self, start: u64) -> Vec<TransactionRef> {
        if !self.items.contains_key(&start) {
            return Vec::new();
        }
        self.cache = None;
        let mut ready = Vec::new();
        let mut next = start;
        while let Some(tx) = self.items.remove(&next) {
            ready.push(tx);
            next += 1;
        }
        ready
    }

    /// Keeps the `limit` lowest nonces, removing and returning the rest,
    /// highest nonce first removed.
    pub fn cap(&mut self, limit: usize) -> Vec<TransactionRef> {
        if self.items.len() <= limit {
            return Vec::new();
        }
        self.cache = None;
        let mut drops = Vec::with_capacity(self.items.len() - limit);
        while self.items.len() > limit {
            let Some((_, tx)) = self.items.pop_last() else {
                break;
            };
            drops.push(tx);
        }
        drops
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<TransactionRef> {
        self.items.last_key_value().map(|(_, tx)| tx.clone())
    }

    /// Nonce-ordered copy of the content, served from the cache when intact.
    pub fn flatten(&mut self) -> Vec<TransactionRef> {
        if self.cache.is_none() {
            self.cache = Some(self.items.values().cloned().collect());
        }
        self.cache.clone().unwrap_or_default()
    }

    pub fn has(&self, nonce: u64) -> bool {
        self.items.contains_key(&nonce)
    }

    pub fn nonces(&self) -> Vec<u64> {
        self.items.keys().copied().collect()
    }
}

/// Per-account list of transactions. The pending variant (`strict`) holds a
/// contiguous run from the account nonce; the queued variant may have gaps.
#[derive(Debug)]
pub struct TxList {
    strict: bool,
    txs: TxSortedMap,
    // Highest cost and gas seen, used to short circuit balance filtering.
    cost_cap: u128,
    gas_cap: u64,
}

impl TxList {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            txs: TxSortedMap::new(),
            cost_cap: 0,
            gas_cap: 0,
        }
    }

    pub fn overlaps(&self, tx: &TransactionRef) -> bool {
        self.txs.has(tx.nonce())
    }

    /// Tries to insert `tx`. An occupied nonce is only replaced when the new
    /// price clears the old one by at least `price_bump` percent, compared
    /// with exact integer arithmetic. Returns whether the insert happened and
    /// the transaction it displaced.
    pub fn add(&mut self, tx: TransactionRef, price_bump: u128) -> (bool, Option<TransactionRef>) {
        let old = self.txs.get(tx.nonce()).cloned();
        if let Some(old) = &old {
            let threshold = old.gas_price().saturating_mul(100 + price_bump);
            if tx.gas_price().saturating_mul(100) < threshold {
                return (false, None);
            }
        }
        if tx.cost() > self.cost_cap {
            self.cost_cap = tx.cost();
        }
        if tx.gas() > self.gas_cap {
            self.gas_cap = tx.gas();
        }
        self.txs.put(tx);
        (true, old)
    }

    pub fn forward(&mut self, threshold: u64) -> Vec<TransactionRef> {
        self.txs.forward(threshold)
    }

    /// Drops every transaction whose cost exceeds `cost_limit` or whose gas
    /// exceeds `gas_limit`. In strict mode, everything above the lowest
    /// dropped nonce is returned as invalid and must be requeued.
    pub fn filter(
        &mut self,
        cost_limit: u128,
        gas_limit: u64,
    ) -> (Vec<TransactionRef>, Vec<TransactionRef>) {
        if self.cost_cap <= cost_limit && self.gas_cap <= gas_limit {
            return (Vec::new(), Vec::new());
        }
        self.cost_cap = cost_limit;
        self.gas_cap = gas_limit;

        let drops = self
            .txs
            .filter(|tx| tx.cost() > cost_limit || tx.gas() > gas_limit);
        let mut invalids = Vec::new();
        if self.strict && !drops.is_empty() {
            let lowest = drops.iter().map(|tx| tx.nonce()).min().unwrap_or(u64::MAX);
            invalids = self.txs.filter(|tx| tx.nonce() > lowest);
        }
        (drops, invalids)
    }

    pub fn cap(&mut self, limit: usize) -> Vec<TransactionRef> {
        self.txs.cap(limit)
    }

    /// Removes `tx` from the list. In strict mode, every transaction with a
    /// higher nonce is returned as invalid.
    pub fn remove(&mut self, tx: &TransactionRef) -> (bool, Vec<TransactionRef>) {
        let nonce = tx.nonce();
        if !self.txs.remove(nonce) {
            return (false, Vec::new());
        }
        if self.strict {
            return (true, self.txs.filter(|t| t.nonce() > nonce));
        }
        (true, Vec::new())
    }

    pub fn ready(&mut self, start: u64) -> Vec<TransactionRef> {
        self.txs.ready(start)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn flatten(&mut self) -> Vec<TransactionRef> {
        self.txs.flatten()
    }

    pub fn last(&self) -> Option<TransactionRef> {
        self.txs.last()
    }

    pub fn get(&self, nonce: u64) -> Option<&TransactionRef> {
        self.txs.get(nonce)
    }

    pub fn nonces(&self) -> Vec<u64> {
        self.txs.nonces()
    }
}
