use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;

use primitive_types::H256;
use types::block::Block;
use types::events::ChainHeadEvent;
use types::{Address, AssetId};

/// Read only view of account state at a fixed state root.
pub trait StateDB: Send + Sync {
    /// Next expected sequence number for the account.
    fn nonce(&self, address: &Address) -> u64;
    /// Balance of the account in the given asset.
    fn balance(&self, address: &Address, asset: &AssetId) -> u128;
}

/// The chain collaborator the transaction pool runs against.
pub trait Blockchain: Send + Sync {
    fn current_block(&self) -> Result<Block>;
    /// Block lookup used while walking parent pointers during a reorg.
    fn get_block(&self, hash: &H256, level: u64) -> Result<Option<Block>>;
    fn state_at(&self, root: &H256) -> Result<Arc<dyn StateDB>>;
    /// Subscribes to head changes. A closed channel terminates the consumer.
    fn subscribe_chain_head(&self) -> UnboundedReceiver<ChainHeadEvent>;
}
