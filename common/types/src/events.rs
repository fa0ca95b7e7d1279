use std::sync::Arc;

use crate::block::Block;
use crate::tx::SignedTransaction;

/// Broadcast when transactions enter the pending set or replace a pending
/// sibling.
#[derive(Clone, Debug)]
pub struct NewTxsEvent {
    pub txs: Vec<Arc<SignedTransaction>>,
}

/// Delivered by the chain whenever the head block changes.
#[derive(Clone, Debug)]
pub struct ChainHeadEvent {
    pub block: Block,
}
