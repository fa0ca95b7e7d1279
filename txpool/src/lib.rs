mod config;
mod error;
pub mod feed;
mod journal;
mod prque;
mod sender_cacher;
mod tx_list;
mod tx_lookup;
mod tx_noncer;
mod tx_priced;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use primitive_types::H256;
use traits::{Blockchain, StateDB};
use types::block::{Block, BlockHeader};
use types::events::{ChainHeadEvent, NewTxsEvent};
use types::signer::Signer;
use types::tx::SignedTransaction;
use types::{native_asset, Address};

pub use crate::config::TxPoolConfig;
pub use crate::error::TxPoolError;
pub use crate::feed::{Feed, Subscription, SubscriptionScope};
pub use crate::sender_cacher::{SenderCacher, SENDER_CACHER};

use crate::journal::TxJournal;
use crate::prque::PriorityQueue;
use crate::tx_list::TxList;
use crate::tx_lookup::{AccountSet, TxLookup};
use crate::tx_noncer::TxNoncer;
use crate::tx_priced::TxPricedList;

pub type TransactionRef = Arc<SignedTransaction>;

/// Time interval to report transaction pool stats.
const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(8);
/// Time interval to check for evictable transactions.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Hard admission cap on the encoded transaction size.
const MAX_TX_SIZE: u64 = 32 * 1024;
/// Reorgs deeper than this are ignored; they only happen during fast sync.
const MAX_REORG_DEPTH: u64 = 64;

pub(crate) const TX_GAS: u64 = 21_000;
pub(crate) const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
pub(crate) const TX_DATA_ZERO_GAS: u64 = 4;
pub(crate) const TX_DATA_NON_ZERO_GAS: u64 = 68;

/// Status of a transaction as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Unknown,
    Queued,
    Pending,
}

/// Returns the elements of `a` not present in `b`, compared by fingerprint.
pub fn tx_difference(a: Vec<TransactionRef>, b: &[TransactionRef]) -> Vec<TransactionRef> {
    let remove: HashSet<H256> = b.iter().map(|tx| tx.hash()).collect();
    a.into_iter()
        .filter(|tx| !remove.contains(&tx.hash()))
        .collect()
}

fn data_gas(data: &[u8]) -> Result<u64, TxPoolError> {
    if data.is_empty() {
        return Ok(0);
    }
    let nz = data.iter().filter(|byte| **byte != 0).count() as u64;
    let z = data.len() as u64 - nz;
    nz.checked_mul(TX_DATA_NON_ZERO_GAS)
        .and_then(|gas| z.checked_mul(TX_DATA_ZERO_GAS).and_then(|zg| gas.checked_add(zg)))
        .ok_or(TxPoolError::GasOverflow)
}

/// Computes the intrinsic gas of a transaction: a base charge per output
/// (with a surcharge for application creation) plus byte-priced charges for
/// every input payload and the extra field.
pub fn intrinsic_gas(tx: &SignedTransaction) -> Result<u64, TxPoolError> {
    let mut gas: u64 = 0;
    for out in tx.outputs() {
        let base = if out.to.is_none() {
            TX_GAS_CONTRACT_CREATION
        } else {
            TX_GAS
        };
        gas = gas.checked_add(base).ok_or(TxPoolError::GasOverflow)?;
    }
    for input in tx.inputs() {
        gas = gas
            .checked_add(data_gas(&input.payload)?)
            .ok_or(TxPoolError::GasOverflow)?;
    }
    gas = gas
        .checked_add(data_gas(tx.extra())?)
        .ok_or(TxPoolError::GasOverflow)?;
    Ok(gas)
}

/// The pool state machine. Every index in here moves under the single pool
/// lock; cross-index invariants rely on that.
struct PoolInner {
    config: TxPoolConfig,
    signer: Signer,
    gas_price: u128,
    current_state: Arc<dyn StateDB>,
    pending_nonces: TxNoncer,
    current_max_gas: u64,

    locals: AccountSet,
    journal: Option<TxJournal>,
    pending: HashMap<Address, TxList>,
    queue: HashMap<Address, TxList>,
    beats: HashMap<Address, Instant>,
    all: TxLookup,
    priced: TxPricedList,
    tx_feed: Feed<NewTxsEvent>,
}

impl PoolInner {
    fn sender(&self, tx: &TransactionRef) -> Result<Address, TxPoolError> {
        self.signer
            .sender(tx)
            .map_err(|_| TxPoolError::InvalidSender)
    }

    /// Consensus and local-node pre-checks, in fixed order.
    fn validate_tx(&self, tx: &TransactionRef, local: bool) -> Result<(), TxPoolError> {
        if tx.size() > MAX_TX_SIZE {
            return Err(TxPoolError::OversizedData);
        }
        // An unsigned "negative" amount aliases to an enormous value.
        for out in tx.outputs() {
            if out.value > i128::MAX as u128 {
                return Err(TxPoolError::NegativeValue);
            }
        }
        if self.current_max_gas < tx.gas() {
            return Err(TxPoolError::GasLimit);
        }
        let from = self.sender(tx)?;
        // The account may be local even if the transaction arrived from the
        // network.
        let local = local || self.locals.contains(&from);
        if !local && tx.gas_price() < self.gas_price {
            return Err(TxPoolError::Underpriced);
        }
        if self.current_state.nonce(&from) > tx.nonce() {
            return Err(TxPoolError::NonceTooLow);
        }
        if self.current_state.balance(&from, &native_asset()) < tx.cost() {
            return Err(TxPoolError::InsufficientFunds {
                asset: native_asset(),
            });
        }
        for (asset, value) in tx.value_by_asset() {
            if asset == native_asset() {
                continue;
            }
            if self.current_state.balance(&from, &asset) < value {
                return Err(TxPoolError::InsufficientFunds { asset });
            }
        }
        let intrinsic = intrinsic_gas(tx)?;
        if tx.gas() < intrinsic {
            return Err(TxPoolError::IntrinsicGas);
        }
        Ok(())
    }

    /// Drops a transaction's stale price-heap residency, unless its sender is
    /// local and it never lived there.
    fn priced_removed_for(&mut self, tx: &TransactionRef) {
        if self.locals.contains_sender(tx) {
            return;
        }
        self.priced.removed(1, &self.all, &self.locals);
    }

    /// Marks the sender local. Transactions of the sender already resident in
    /// the price heap become dead entries.
    fn mark_local(&mut self, addr: Address) {
        if !self.locals.add(addr) {
            return;
        }
        let resident = self.pending.get(&addr).map(|list| list.len()).unwrap_or(0)
            + self.queue.get(&addr).map(|list| list.len()).unwrap_or(0);
        if resident > 0 {
            self.priced.removed(resident, &self.all, &self.locals);
        }
    }

    fn journal_tx(&mut self, from: Address, tx: &TransactionRef) {
        // Only journal if it's enabled and the transaction is local.
        if self.journal.is_none() || !self.locals.contains(&from) {
            return;
        }
        if let Some(journal) = self.journal.as_mut() {
            if let Err(err) = journal.insert(tx) {
                warn!(err = %err, "failed to journal local transaction");
            }
        }
    }

    /// Validates a transaction and inserts it into the queue, or replaces a
    /// pending sibling at the same nonce outright. Returns whether an existing
    /// transaction was replaced.
    fn add(&mut self, tx: TransactionRef, local: bool) -> Result<bool, TxPoolError> {
        let hash = tx.hash();
        if self.all.contains(&hash) {
            trace!(hash = ?hash, "discarding already known transaction");
            return Err(TxPoolError::AlreadyKnown);
        }
        if let Err(err) = self.validate_tx(&tx, local) {
            trace!(hash = ?hash, err = %err, "discarding invalid transaction");
            return Err(err);
        }
        // If the pool is full, make room by shedding the worst remote
        // transactions, unless the newcomer is even worse.
        if self.all.count() as u64 >= self.config.global_slots + self.config.global_queue {
            if !local && self.priced.underpriced(&tx, &self.all, &self.locals) {
                trace!(hash = ?hash, price = tx.gas_price(), "discarding underpriced transaction");
                return Err(TxPoolError::Underpriced);
            }
            let overflow =
                self.all.count() + 1 - (self.config.global_slots + self.config.global_queue) as usize;
            let drops = self.priced.discard(overflow, &self.all, &self.locals);
            for drop in drops {
                trace!(hash = ?drop.hash(), price = drop.gas_price(), "discarding freshly underpriced transaction");
                self.remove_tx(drop.hash(), false);
            }
        }
        let from = self.sender(&tx)?;
        let local = local || self.locals.contains(&from);

        // Replacing an already pending transaction goes in directly.
        let overlaps = self
            .pending
            .get(&from)
            .map(|list| list.overlaps(&tx))
            .unwrap_or(false);
        if overlaps {
            let (inserted, old) = match self.pending.get_mut(&from) {
                Some(list) => list.add(tx.clone(), self.config.price_bump),
                None => (false, None),
            };
            if !inserted {
                return Err(TxPoolError::ReplaceUnderpriced);
            }
            if let Some(old) = &old {
                self.all.remove(&old.hash());
                self.priced_removed_for(old);
            }
            self.all.add(tx.clone());
            let is_local = self.locals.contains(&from);
            self.priced.put(tx.clone(), is_local);
            self.journal_tx(from, &tx);
            trace!(hash = ?hash, from = ?from, "pooled new executable transaction");
            self.tx_feed.send(NewTxsEvent { txs: vec![tx] });
            return Ok(true);
        }
        // Fresh nonce, push into the future queue.
        let replaced = self.enqueue_tx(tx.clone())?;
        if local {
            self.mark_local(from);
        }
        self.journal_tx(from, &tx);
        trace!(hash = ?hash, from = ?from, "pooled new future transaction");
        Ok(replaced)
    }

    /// Inserts a transaction into the non-executable queue.
    fn enqueue_tx(&mut self, tx: TransactionRef) -> Result<bool, TxPoolError> {
        let from = self.sender(&tx)?;
        let price_bump = self.config.price_bump;
        let (inserted, old) = self
            .queue
            .entry(from)
            .or_insert_with(|| TxList::new(false))
            .add(tx.clone(), price_bump);
        if !inserted {
            // An older transaction was better, discard this one.
            return Err(TxPoolError::ReplaceUnderpriced);
        }
        if let Some(old) = &old {
            self.all.remove(&old.hash());
            self.priced_removed_for(old);
        }
        if self.all.get(&tx.hash()).is_none() {
            self.all.add(tx.clone());
            let is_local = self.locals.contains(&from);
            self.priced.put(tx, is_local);
        }
        self.beats.entry(from).or_insert_with(Instant::now);
        Ok(old.is_some())
    }

    /// Moves a transaction into the pending list, reporting whether it got a
    /// seat or an incumbent was better.
    fn promote_tx(&mut self, addr: Address, tx: TransactionRef) -> bool {
        let hash = tx.hash();
        let price_bump = self.config.price_bump;
        let (inserted, old) = self
            .pending
            .entry(addr)
            .or_insert_with(|| TxList::new(true))
            .add(tx.clone(), price_bump);
        if !inserted {
            self.all.remove(&hash);
            self.priced_removed_for(&tx);
            return false;
        }
        if let Some(old) = &old {
            self.all.remove(&old.hash());
            self.priced_removed_for(old);
        }
        if self.all.get(&hash).is_none() {
            self.all.add(tx.clone());
            let is_local = self.locals.contains(&addr);
            self.priced.put(tx.clone(), is_local);
        }
        self.beats.insert(addr, Instant::now());
        self.pending_nonces.set(addr, tx.nonce() + 1);
        true
    }

    /// Removes a single transaction, requeueing everything it invalidated.
    /// `outofbound` marks removals the price heap was not told about yet.
    fn remove_tx(&mut self, hash: H256, outofbound: bool) {
        let Some(tx) = self.all.get(&hash) else {
            return;
        };
        let Ok(addr) = self.sender(&tx) else {
            return;
        };
        self.all.remove(&hash);
        if outofbound {
            self.priced_removed_for(&tx);
        }
        let (removed, invalids, emptied) = match self.pending.get_mut(&addr) {
            Some(pending) => {
                let (removed, invalids) = pending.remove(&tx);
                (removed, invalids, pending.is_empty())
            }
            None => (false, Vec::new(), false),
        };
        if removed {
            if emptied {
                self.pending.remove(&addr);
                if !self.queue.contains_key(&addr) {
                    self.beats.remove(&addr);
                }
            }
            // Postpone any invalidated transactions.
            for tx in invalids {
                let _ = self.enqueue_tx(tx);
            }
            self.pending_nonces.set_if_lower(addr, tx.nonce());
            return;
        }
        // Transaction is in the future queue.
        let emptied = match self.queue.get_mut(&addr) {
            Some(future) => {
                future.remove(&tx);
                future.is_empty()
            }
            None => false,
        };
        if emptied {
            self.queue.remove(&addr);
            if !self.pending.contains_key(&addr) {
                self.beats.remove(&addr);
            }
        }
    }

    /// Moves transactions that became processable into pending, shedding
    /// whatever violates the per-account and global caps along the way.
    fn promote_executables(&mut self, accounts: Option<Vec<Address>>) {
        let mut promoted: Vec<TransactionRef> = Vec::new();
        let max_gas = self.current_max_gas;
        let account_queue = self.config.account_queue as usize;

        let accounts = accounts.unwrap_or_else(|| self.queue.keys().copied().collect());
        for addr in accounts {
            if !self.queue.contains_key(&addr) {
                continue;
            }
            // Drop all transactions that are deemed too old (low nonce).
            let current_nonce = self.current_state.nonce(&addr);
            let forwards = self
                .queue
                .get_mut(&addr)
                .map(|list| list.forward(current_nonce))
                .unwrap_or_default();
            for tx in forwards {
                trace!(hash = ?tx.hash(), "removed old queued transaction");
                self.all.remove(&tx.hash());
                self.priced_removed_for(&tx);
            }
            // Drop all transactions that are too costly.
            let balance = self.current_state.balance(&addr, &native_asset());
            let (drops, _) = self
                .queue
                .get_mut(&addr)
                .map(|list| list.filter(balance, max_gas))
                .unwrap_or_default();
            for tx in drops {
                trace!(hash = ?tx.hash(), "removed unpayable queued transaction");
                self.all.remove(&tx.hash());
                self.priced_removed_for(&tx);
            }
            // Gather all executable transactions and promote them.
            let start = self.pending_nonces.get(&addr);
            let ready = self
                .queue
                .get_mut(&addr)
                .map(|list| list.ready(start))
                .unwrap_or_default();
            for tx in ready {
                let hash = tx.hash();
                if self.promote_tx(addr, tx.clone()) {
                    trace!(hash = ?hash, "promoting queued transaction");
                    promoted.push(tx);
                }
            }
            // Drop all transactions over the allowed queue limit.
            if !self.locals.contains(&addr) {
                let caps = self
                    .queue
                    .get_mut(&addr)
                    .map(|list| list.cap(account_queue))
                    .unwrap_or_default();
                for tx in caps {
                    self.all.remove(&tx.hash());
                    self.priced_removed_for(&tx);
                    trace!(hash = ?tx.hash(), "removed cap-exceeding queued transaction");
                }
            }
            if self
                .queue
                .get(&addr)
                .map(|list| list.is_empty())
                .unwrap_or(false)
            {
                self.queue.remove(&addr);
                if !self.pending.contains_key(&addr) {
                    self.beats.remove(&addr);
                }
            }
        }
        if !promoted.is_empty() {
            self.tx_feed.send(NewTxsEvent { txs: promoted });
        }

        self.shed_pending_overflow();
        self.shed_queue_overflow();
    }

    /// If the pending limit is overflown, equalize allowances between the
    /// biggest non-local spenders until the pool fits again.
    fn shed_pending_overflow(&mut self) {
        let global_slots = self.config.global_slots;
        let account_slots = self.config.account_slots;
        let mut pending: u64 = self.pending.values().map(|list| list.len() as u64).sum();
        if pending <= global_slots {
            return;
        }
        // Assemble a spam order to penalize large transactors first.
        let mut spammers: PriorityQueue<Address> = PriorityQueue::new();
        for (addr, list) in &self.pending {
            if !self.locals.contains(addr) && list.len() as u64 > account_slots {
                spammers.push(*addr, list.len() as i64);
            }
        }
        // Gradually drop transactions from offenders.
        let mut offenders: Vec<Address> = Vec::new();
        while pending > global_slots && !spammers.is_empty() {
            let Some((offender, _)) = spammers.pop() else {
                break;
            };
            offenders.push(offender);
            if offenders.len() > 1 {
                // Equalize balances until all the same or below the threshold.
                let threshold = self
                    .pending
                    .get(&offender)
                    .map(|list| list.len())
                    .unwrap_or(0);
                loop {
                    let prev = offenders[offenders.len() - 2];
                    let prev_len = self.pending.get(&prev).map(|list| list.len()).unwrap_or(0);
                    if pending <= global_slots || prev_len <= threshold {
                        break;
                    }
                    for i in 0..offenders.len() - 1 {
                        let addr = offenders[i];
                        pending = pending.saturating_sub(self.trim_pending_one(addr));
                    }
                }
            }
        }
        // If still above threshold, reduce to the limit or min allowance.
        if pending > global_slots && !offenders.is_empty() {
            loop {
                let last = offenders[offenders.len() - 1];
                let last_len = self
                    .pending
                    .get(&last)
                    .map(|list| list.len() as u64)
                    .unwrap_or(0);
                if pending <= global_slots || last_len <= account_slots {
                    break;
                }
                for addr in offenders.clone() {
                    pending = pending.saturating_sub(self.trim_pending_one(addr));
                }
            }
        }
        self.pending.retain(|_, list| !list.is_empty());
    }

    /// Drops the highest-nonce pending transaction of `addr`, returning how
    /// many were shed.
    fn trim_pending_one(&mut self, addr: Address) -> u64 {
        let caps = match self.pending.get_mut(&addr) {
            Some(list) if !list.is_empty() => list.cap(list.len() - 1),
            _ => Vec::new(),
        };
        let shed = caps.len() as u64;
        for tx in caps {
            self.all.remove(&tx.hash());
            self.priced_removed_for(&tx);
            self.pending_nonces.set_if_lower(addr, tx.nonce());
            trace!(hash = ?tx.hash(), "removed fairness-exceeding pending transaction");
        }
        shed
    }

    /// If more transactions are queued than the hard limit, drop from the
    /// accounts idle the longest first.
    fn shed_queue_overflow(&mut self) {
        let global_queue = self.config.global_queue;
        let queued: u64 = self.queue.values().map(|list| list.len() as u64).sum();
        if queued <= global_queue {
            return;
        }
        let mut addresses: Vec<(Address, Instant)> = self
            .queue
            .keys()
            .filter(|addr| !self.locals.contains(addr))
            .map(|addr| {
                (
                    *addr,
                    self.beats.get(addr).copied().unwrap_or_else(Instant::now),
                )
            })
            .collect();
        addresses.sort_by_key(|(_, beat)| *beat);

        let mut drop = queued - global_queue;
        for (addr, _) in addresses {
            if drop == 0 {
                break;
            }
            let txs = match self.queue.get_mut(&addr) {
                Some(list) => list.flatten(),
                None => continue,
            };
            let size = txs.len() as u64;
            // Drop the whole account when it fits in the deficit.
            if size <= drop {
                for tx in &txs {
                    self.remove_tx(tx.hash(), true);
                }
                drop -= size;
                continue;
            }
            // Otherwise only drop the highest-nonce suffix.
            for tx in txs.iter().rev() {
                if drop == 0 {
                    break;
                }
                self.remove_tx(tx.hash(), true);
                drop -= 1;
            }
        }
    }

    /// Removes included and no-longer-payable transactions from pending,
    /// requeueing anything a removal cut loose.
    fn demote_unexecutables(&mut self) {
        let max_gas = self.current_max_gas;
        let addrs: Vec<Address> = self.pending.keys().copied().collect();
        for addr in addrs {
            let nonce = self.current_state.nonce(&addr);
            let forwards = self
                .pending
                .get_mut(&addr)
                .map(|list| list.forward(nonce))
                .unwrap_or_default();
            for tx in forwards {
                trace!(hash = ?tx.hash(), "removed old pending transaction");
                self.all.remove(&tx.hash());
                self.priced_removed_for(&tx);
            }
            let balance = self.current_state.balance(&addr, &native_asset());
            let (drops, invalids) = self
                .pending
                .get_mut(&addr)
                .map(|list| list.filter(balance, max_gas))
                .unwrap_or_default();
            for tx in drops {
                trace!(hash = ?tx.hash(), "removed unpayable pending transaction");
                self.all.remove(&tx.hash());
                self.priced_removed_for(&tx);
            }
            for tx in invalids {
                trace!(hash = ?tx.hash(), "demoting pending transaction");
                let _ = self.enqueue_tx(tx);
            }
            // A gap at the front should never happen; postpone everything.
            let gapped = self
                .pending
                .get(&addr)
                .map(|list| !list.is_empty() && list.get(nonce).is_none())
                .unwrap_or(false);
            if gapped {
                let caps = self
                    .pending
                    .get_mut(&addr)
                    .map(|list| list.cap(0))
                    .unwrap_or_default();
                for tx in caps {
                    error!(hash = ?tx.hash(), "demoting invalidated transaction");
                    let _ = self.enqueue_tx(tx);
                }
            }
            if self
                .pending
                .get(&addr)
                .map(|list| list.is_empty())
                .unwrap_or(false)
            {
                self.pending.remove(&addr);
                if !self.queue.contains_key(&addr) {
                    self.beats.remove(&addr);
                }
            }
        }
    }

    /// Realigns the pool content with the chain state behind `new_head`,
    /// compensating short reorgs by reinjecting dropped transactions.
    fn reset(
        &mut self,
        chain: &dyn Blockchain,
        old_head: Option<BlockHeader>,
        new_head: Option<BlockHeader>,
    ) {
        let mut reinject: Vec<TransactionRef> = Vec::new();
        if let (Some(old), Some(new)) = (old_head.as_ref(), new_head.as_ref()) {
            if old.hash() != new.parent_hash {
                let depth = old.level.abs_diff(new.level);
                if depth > MAX_REORG_DEPTH {
                    debug!(depth = depth, "skipping deep transaction reorg");
                } else {
                    // Shallow enough to pull the divergent chains into memory.
                    let mut discarded: Vec<TransactionRef> = Vec::new();
                    let mut included: Vec<TransactionRef> = Vec::new();
                    let mut rem = match chain.get_block(&old.hash(), old.level) {
                        Ok(Some(block)) => block,
                        _ => {
                            error!(block = old.level, hash = ?old.hash(), "unrooted old chain seen by tx pool");
                            return;
                        }
                    };
                    let mut add = match chain.get_block(&new.hash(), new.level) {
                        Ok(Some(block)) => block,
                        _ => {
                            error!(block = new.level, hash = ?new.hash(), "unrooted new chain seen by tx pool");
                            return;
                        }
                    };
                    while rem.level() > add.level() {
                        discarded.extend(rem.transactions().iter().cloned().map(Arc::new));
                        rem = match chain.get_block(rem.parent_hash(), rem.level().saturating_sub(1))
                        {
                            Ok(Some(block)) => block,
                            _ => {
                                error!(block = old.level, hash = ?old.hash(), "unrooted old chain seen by tx pool");
                                return;
                            }
                        };
                    }
                    while add.level() > rem.level() {
                        included.extend(add.transactions().iter().cloned().map(Arc::new));
                        add = match chain.get_block(add.parent_hash(), add.level().saturating_sub(1))
                        {
                            Ok(Some(block)) => block,
                            _ => {
                                error!(block = new.level, hash = ?new.hash(), "unrooted new chain seen by tx pool");
                                return;
                            }
                        };
                    }
                    while rem.hash() != add.hash() {
                        discarded.extend(rem.transactions().iter().cloned().map(Arc::new));
                        rem = match chain.get_block(rem.parent_hash(), rem.level().saturating_sub(1))
                        {
                            Ok(Some(block)) => block,
                            _ => {
                                error!(block = old.level, hash = ?old.hash(), "unrooted old chain seen by tx pool");
                                return;
                            }
                        };
                        included.extend(add.transactions().iter().cloned().map(Arc::new));
                        add = match chain.get_block(add.parent_hash(), add.level().saturating_sub(1))
                        {
                            Ok(Some(block)) => block,
                            _ => {
                                error!(block = new.level, hash = ?new.hash(), "unrooted new chain seen by tx pool");
                                return;
                            }
                        };
                    }
                    reinject = tx_difference(discarded, &included);
                }
            }
        }
        // Initialize the internal state to the new head.
        let new_head = match new_head {
            Some(header) => header,
            None => match chain.current_block() {
                Ok(block) => *block.header(),
                Err(err) => {
                    error!(err = %err, "failed to fetch current block during reset");
                    return;
                }
            },
        };
        let state = match chain.state_at(&new_head.state_root) {
            Ok(state) => state,
            Err(err) => {
                error!(err = %err, "failed to reset txpool state");
                return;
            }
        };
        self.current_state = state.clone();
        self.pending_nonces = TxNoncer::new(state);
        self.current_max_gas = new_head.gas_limit;

        // Inject any transactions discarded due to reorgs.
        debug!(count = reinject.len(), "reinjecting stale transactions");
        SENDER_CACHER.recover(&self.signer, &reinject);
        self.add_txs_locked(reinject, false);

        // Remove anything included in the block or invalidated by the new
        // state, then realign the tracked pending nonces.
        self.demote_unexecutables();
        let highest: Vec<(Address, u64)> = self
            .pending
            .iter()
            .filter_map(|(addr, list)| list.last().map(|tx| (*addr, tx.nonce() + 1)))
            .collect();
        for (addr, nonce) in highest {
            self.pending_nonces.set(addr, nonce);
        }
        // Check the queue and move transactions over to pending if possible.
        self.promote_executables(None);
    }

    /// Batch admission under the lock, promoting the accounts that accepted
    /// something new.
    fn add_txs_locked(
        &mut self,
        txs: Vec<TransactionRef>,
        local: bool,
    ) -> Vec<Result<(), TxPoolError>> {
        let mut dirty: HashSet<Address> = HashSet::new();
        let mut errs = Vec::with_capacity(txs.len());
        for tx in txs {
            match self.add(tx.clone(), local) {
                Ok(replaced) => {
                    if !replaced {
                        if let Ok(from) = self.sender(&tx) {
                            dirty.insert(from);
                        }
                    }
                    errs.push(Ok(()));
                }
                Err(err) => errs.push(Err(err)),
            }
        }
        if !dirty.is_empty() {
            self.promote_executables(Some(dirty.into_iter().collect()));
        }
        errs
    }

    /// Evicts every queued transaction of non-local accounts that have been
    /// silent longer than the configured lifetime.
    fn evict(&mut self) {
        let lifetime = self.config.lifetime;
        let addrs: Vec<Address> = self.queue.keys().copied().collect();
        for addr in addrs {
            // Local addresses are exempt from eviction.
            if self.locals.contains(&addr) {
                continue;
            }
            match self.beats.get(&addr).copied() {
                Some(beat) if beat.elapsed() > lifetime => {
                    let txs = self
                        .queue
                        .get_mut(&addr)
                        .map(|list| list.flatten())
                        .unwrap_or_default();
                    for tx in txs {
                        self.remove_tx(tx.hash(), true);
                    }
                }
                Some(_) => {}
                None => {
                    // Queued account without a heartbeat: give it a full
                    // lifetime from now.
                    self.beats.insert(addr, Instant::now());
                }
            }
        }
    }

    fn stats(&self) -> (usize, usize) {
        let pending = self.pending.values().map(|list| list.len()).sum();
        let queued = self.queue.values().map(|list| list.len()).sum();
        (pending, queued)
    }

    /// Every local transaction currently pooled, grouped by sender.
    fn local(&mut self) -> HashMap<Address, Vec<TransactionRef>> {
        let addrs: Vec<Address> = self.locals.iter().copied().collect();
        let mut txs: HashMap<Address, Vec<TransactionRef>> = HashMap::new();
        for addr in addrs {
            if let Some(list) = self.pending.get_mut(&addr) {
                txs.entry(addr).or_default().extend(list.flatten());
            }
            if let Some(list) = self.queue.get_mut(&addr) {
                txs.entry(addr).or_default().extend(list.flatten());
            }
        }
        txs
    }
}

/// Gathers, orders and shields the transactions waiting for inclusion in a
/// block. Admission is thread safe; a background task follows the chain head
/// and keeps the content consistent with the live account state.
pub struct TxPool {
    config: TxPoolConfig,
    signer: Signer,
    chain: Arc<dyn Blockchain>,
    inner: RwLock<PoolInner>,
    tx_feed: Feed<NewTxsEvent>,
    scope: SubscriptionScope,
    shutdown: Notify,
    stopped: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TxPool {
    /// Creates the pool against the chain's current head, replays the local
    /// journal and spawns the maintenance loop. Must run inside a tokio
    /// runtime.
    pub fn new(
        config: TxPoolConfig,
        chain_id: u64,
        chain: Arc<dyn Blockchain>,
    ) -> Result<Arc<TxPool>> {
        let config = config.sanitize();
        let signer = Signer::new(chain_id);
        let tx_feed: Feed<NewTxsEvent> = Feed::new();

        let current = chain.current_block()?;
        let state = chain.state_at(&current.header().state_root)?;

        let journal = if !config.no_locals && !config.journal.is_empty() {
            Some(TxJournal::new(&config.journal))
        } else {
            None
        };

        let mut inner = PoolInner {
            config: config.clone(),
            signer,
            gas_price: config.price_limit,
            current_state: state.clone(),
            pending_nonces: TxNoncer::new(state),
            current_max_gas: current.header().gas_limit,
            locals: AccountSet::new(signer),
            journal,
            pending: HashMap::new(),
            queue: HashMap::new(),
            beats: HashMap::new(),
            all: TxLookup::new(),
            priced: TxPricedList::new(),
            tx_feed: tx_feed.clone(),
        };
        inner.reset(chain.as_ref(), None, Some(*current.header()));

        // If journaling is enabled, load from disk and compact the file.
        if let Some(mut journal) = inner.journal.take() {
            if let Err(err) = journal
                .load(|txs| inner.add_txs_locked(txs.into_iter().map(Arc::new).collect(), true))
            {
                warn!(err = %err, "failed to load transaction journal");
            }
            let locals = inner.local();
            if let Err(err) = journal.rotate(locals) {
                warn!(err = %err, "failed to rotate transaction journal");
            }
            inner.journal = Some(journal);
        }

        let head_rx = chain.subscribe_chain_head();
        let pool = Arc::new(TxPool {
            config,
            signer,
            chain,
            inner: RwLock::new(inner),
            tx_feed,
            scope: SubscriptionScope::new(),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        });
        let handle = tokio::spawn(TxPool::run_loop(pool.clone(), head_rx, current));
        if let Ok(mut slot) = pool.loop_handle.lock() {
            *slot = Some(handle);
        }
        Ok(pool)
    }

    /// Main maintenance loop: chain head resets, stats reporting, queue
    /// eviction and journal rotation.
    async fn run_loop(pool: Arc<TxPool>, mut head_rx: UnboundedReceiver<ChainHeadEvent>, mut head: Block) {
        let mut prev_pending = 0_usize;
        let mut prev_queued = 0_usize;
        let mut prev_stales = 0_usize;

        let start = tokio::time::Instant::now();
        let mut report =
            tokio::time::interval_at(start + STATS_REPORT_INTERVAL, STATS_REPORT_INTERVAL);
        let mut evict = tokio::time::interval_at(start + EVICTION_INTERVAL, EVICTION_INTERVAL);
        let mut journal =
            tokio::time::interval_at(start + pool.config.rejournal, pool.config.rejournal);

        loop {
            tokio::select! {
                event = head_rx.recv() => match event {
                    Some(ChainHeadEvent { block }) => {
                        if let Ok(mut inner) = pool.inner.write() {
                            inner.reset(
                                pool.chain.as_ref(),
                                Some(*head.header()),
                                Some(*block.header()),
                            );
                        }
                        head = block;
                    }
                    // Unsubscribed because the system is stopping.
                    None => break,
                },
                _ = pool.shutdown.notified() => break,
                _ = report.tick() => {
                    let snapshot = pool.inner.read().ok().map(|inner| {
                        let (pending, queued) = inner.stats();
                        (pending, queued, inner.priced.stales())
                    });
                    if let Some((pending, queued, stales)) = snapshot {
                        if pending != prev_pending || queued != prev_queued || stales != prev_stales {
                            debug!(
                                executable = pending,
                                queued = queued,
                                stales = stales,
                                "transaction pool status report"
                            );
                            prev_pending = pending;
                            prev_queued = queued;
                            prev_stales = stales;
                        }
                    }
                },
                _ = evict.tick() => {
                    if let Ok(mut inner) = pool.inner.write() {
                        inner.evict();
                    }
                },
                _ = journal.tick() => {
                    if let Ok(mut inner) = pool.inner.write() {
                        let inner = &mut *inner;
                        if inner.journal.is_some() {
                            let locals = inner.local();
                            if let Some(journal) = inner.journal.as_mut() {
                                if let Err(err) = journal.rotate(locals) {
                                    warn!(err = %err, "failed to rotate local tx journal");
                                }
                            }
                        }
                    }
                },
            }
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, PoolInner>, TxPoolError> {
        self.inner.read().map_err(|_| TxPoolError::RwPoison)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PoolInner>, TxPoolError> {
        self.inner.write().map_err(|_| TxPoolError::RwPoison)
    }

    /// Terminates the pool: cancels subscriptions, stops the loop and closes
    /// the journal. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scope.close();
        self.shutdown.notify_one();
        let handle = self.loop_handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Ok(mut inner) = self.inner.write() {
            if let Some(mut journal) = inner.journal.take() {
                if let Err(err) = journal.close() {
                    warn!(err = %err, "failed to close transaction journal");
                }
            }
        }
        info!("transaction pool stopped");
    }

    /// Registers a subscriber for events about transactions entering the
    /// pending set.
    pub fn subscribe_new_txs(&self) -> Subscription<NewTxsEvent> {
        self.scope.track(self.tx_feed.subscribe())
    }

    pub fn gas_price(&self) -> Result<u128> {
        Ok(self.read()?.gas_price)
    }

    /// Updates the minimum accepted gas price, dropping every remote
    /// transaction now priced below it.
    pub fn set_gas_price(&self, price: u128) -> Result<()> {
        let mut inner = self.write()?;
        let inner = &mut *inner;
        inner.gas_price = price;
        let drops = inner.priced.cap(price, &inner.all, &inner.locals);
        for tx in drops {
            inner.remove_tx(tx.hash(), false);
        }
        info!(price = price, "transaction pool price threshold updated");
        Ok(())
    }

    /// Number of (pending, queued) transactions.
    pub fn stats(&self) -> Result<(usize, usize)> {
        Ok(self.read()?.stats())
    }

    /// Full pool content grouped by account and sorted by nonce.
    pub fn content(
        &self,
    ) -> Result<(
        HashMap<Address, Vec<TransactionRef>>,
        HashMap<Address, Vec<TransactionRef>>,
    )> {
        let mut inner = self.write()?;
        let inner = &mut *inner;
        let mut pending = HashMap::new();
        for (addr, list) in inner.pending.iter_mut() {
            pending.insert(*addr, list.flatten());
        }
        let mut queued = HashMap::new();
        for (addr, list) in inner.queue.iter_mut() {
            queued.insert(*addr, list.flatten());
        }
        Ok((pending, queued))
    }

    /// Pool content of a single account.
    pub fn content_from(
        &self,
        addr: &Address,
    ) -> Result<(Vec<TransactionRef>, Vec<TransactionRef>)> {
        let mut inner = self.write()?;
        let inner = &mut *inner;
        let pending = inner
            .pending
            .get_mut(addr)
            .map(|list| list.flatten())
            .unwrap_or_default();
        let queued = inner
            .queue
            .get_mut(addr)
            .map(|list| list.flatten())
            .unwrap_or_default();
        Ok((pending, queued))
    }

    /// All currently processable transactions, grouped by origin account and
    /// sorted by nonce.
    pub fn pending(&self) -> Result<HashMap<Address, Vec<TransactionRef>>> {
        let mut inner = self.write()?;
        let inner = &mut *inner;
        let mut pending = HashMap::new();
        for (addr, list) in inner.pending.iter_mut() {
            pending.insert(*addr, list.flatten());
        }
        Ok(pending)
    }

    /// Returns a transaction if it is contained in the pool.
    pub fn get(&self, hash: &H256) -> Result<Option<TransactionRef>> {
        Ok(self.read()?.all.get(hash))
    }

    /// Status of a batch of transactions identified by fingerprint.
    pub fn status(&self, hashes: &[H256]) -> Result<Vec<TxStatus>> {
        let inner = self.read()?;
        let mut status = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let Some(tx) = inner.all.get(hash) else {
                status.push(TxStatus::Unknown);
                continue;
            };
            match inner.signer.sender(&tx) {
                Ok(from)
                    if inner
                        .pending
                        .get(&from)
                        .map(|list| list.get(tx.nonce()).is_some())
                        .unwrap_or(false) =>
                {
                    status.push(TxStatus::Pending)
                }
                Ok(_) => status.push(TxStatus::Queued),
                Err(_) => status.push(TxStatus::Unknown),
            }
        }
        Ok(status)
    }

    /// Enqueues a single transaction, marking the sender local so it skips
    /// pricing constraints and eviction.
    pub fn add_local(&self, tx: SignedTransaction) -> Result<()> {
        self.add_tx(tx, !self.config.no_locals)
    }

    /// Enqueues a single transaction under full pricing constraints.
    pub fn add_remote(&self, tx: SignedTransaction) -> Result<()> {
        self.add_tx(tx, false)
    }

    /// Batch variant of [`TxPool::add_local`]; results align with the input.
    pub fn add_locals(
        &self,
        txs: Vec<SignedTransaction>,
    ) -> Result<Vec<Result<(), TxPoolError>>> {
        self.add_txs(txs, !self.config.no_locals)
    }

    /// Batch variant of [`TxPool::add_remote`]; results align with the input.
    pub fn add_remotes(
        &self,
        txs: Vec<SignedTransaction>,
    ) -> Result<Vec<Result<(), TxPoolError>>> {
        self.add_txs(txs, false)
    }

    fn add_tx(&self, tx: SignedTransaction, local: bool) -> Result<()> {
        let tx = Arc::new(tx);
        let mut inner = self.write()?;
        let replaced = inner.add(tx.clone(), local)?;
        if !replaced {
            let from = inner.sender(&tx)?;
            inner.promote_executables(Some(vec![from]));
        }
        Ok(())
    }

    fn add_txs(
        &self,
        txs: Vec<SignedTransaction>,
        local: bool,
    ) -> Result<Vec<Result<(), TxPoolError>>> {
        let txs: Vec<TransactionRef> = txs.into_iter().map(Arc::new).collect();
        SENDER_CACHER.recover(&self.signer, &txs);
        let mut inner = self.write()?;
        Ok(inner.add_txs_locked(txs, local))
    }

    /// Thread safe wrapper around `reset`, driven by the maintenance loop in
    /// production and called directly by tests.
    pub fn locked_reset(
        &self,
        old_head: Option<BlockHeader>,
        new_head: Option<BlockHeader>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner.reset(self.chain.as_ref(), old_head, new_head);
        Ok(())
    }
}
