use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::tx_lookup::{AccountSet, TxLookup};
use crate::TransactionRef;

/// Heap entry ordered so that the *worst* transaction surfaces first: the
/// cheapest gas price wins, price ties are broken by the higher nonce.
#[derive(Debug, Clone)]
pub(crate) struct PricedTransaction(pub(crate) TransactionRef);

impl Eq for PricedTransaction {}

impl PartialEq for PricedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for PricedTransaction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PricedTransaction {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .gas_price()
            .cmp(&self.0.gas_price())
            .then_with(|| self.0.nonce().cmp(&other.0.nonce()))
    }
}

/// Price ordered view over every remote transaction in the pool, used to
/// decide what to shed under pressure. Removals are lazy: they bump `stales`
/// instead of touching the heap, and dead entries are skimmed off on pop. The
/// heap is rebuilt from the lookup once a quarter of it has gone stale.
#[derive(Debug)]
pub struct TxPricedList {
    items: BinaryHeap<PricedTransaction>,
    stales: usize,
}

impl TxPricedList {
    pub fn new() -> Self {
        Self {
            items: BinaryHeap::new(),
            stales: 0,
        }
    }

    /// Inserts a transaction. Local transactions never enter the heap, they
    /// are exempt from price based eviction.
    pub fn put(&mut self, tx: TransactionRef, is_local: bool) {
        if is_local {
            return;
        }
        self.items.push(PricedTransaction(tx));
    }

    /// Notifies the list that `count` heap residents are no longer live.
    /// Rebuilds the heap when too much of it has gone stale.
    pub fn removed(&mut self, count: usize, all: &TxLookup, locals: &AccountSet) {
        self.stales += count;
        if self.stales <= self.items.len() / 4 {
            return;
        }
        self.reheap(all, locals);
    }

    fn reheap(&mut self, all: &TxLookup, locals: &AccountSet) {
        self.stales = 0;
        let live: Vec<PricedTransaction> = all
            .iter()
            .filter(|tx| !locals.contains_sender(tx))
            .map(PricedTransaction)
            .collect();
        self.items = BinaryHeap::from(live);
    }

    /// An entry is dead once its transaction left the pool or its sender was
    /// later marked local.
    fn is_dead(entry: &PricedTransaction, all: &TxLookup, locals: &AccountSet) -> bool {
        all.get(&entry.0.hash()).is_none() || locals.contains_sender(&entry.0)
    }

    /// Pops and returns everything priced below `threshold`.
    pub fn cap(
        &mut self,
        threshold: u128,
        all: &TxLookup,
        locals: &AccountSet,
    ) -> Vec<TransactionRef> {
        let mut drops = Vec::new();
        while let Some(top) = self.items.peek() {
            if Self::is_dead(top, all, locals) {
                self.items.pop();
                self.stales = self.stales.saturating_sub(1);
                continue;
            }
            if top.0.gas_price() >= threshold {
                break;
            }
            if let Some(entry) = self.items.pop() {
                drops.push(entry.0);
            }
        }
        drops
    }

    /// Whether `tx` is worse than the cheapest live remote resident. Price
    /// ties favor the incumbent.
    pub fn underpriced(&mut self, tx: &TransactionRef, all: &TxLookup, locals: &AccountSet) -> bool {
        while let Some(top) = self.items.peek() {
            if Self::is_dead(top, all, locals) {
                self.items.pop();
                self.stales = self.stales.saturating_sub(1);
                continue;
            }
            break;
        }
        match self.items.peek() {
            None => false,
            Some(cheapest) => cheapest.0.gas_price() >= tx.gas_price(),
        }
    }

    /// Pops up to `slots` live transactions to make room when the pool is
    /// full.
    pub fn discard(
        &mut self,
        slots: usize,
        all: &TxLookup,
        locals: &AccountSet,
    ) -> Vec<TransactionRef> {
        let mut drops = Vec::with_capacity(slots);
        while drops.len() < slots {
            let Some(entry) = self.items.pop() else {
                break;
            };
            if Self::is_dead(&entry, all, locals) {
                self.stales = self.stales.saturating_sub(1);
                continue;
            }
            drops.push(entry.0);
        }
        drops
    }

    pub fn stales(&self) -> usize {
        self.stales
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
