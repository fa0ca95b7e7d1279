use std::sync::{Arc, RwLock};

use derive_getters::Getters;
use serde::{Deserialize, Serialize};

use codec::impl_codec;
use codec::Codec;
use crypto::SHA256;
use primitive_types::H256;

use crate::tx::SignedTransaction;
use crate::Address;

#[derive(Debug, Serialize, Deserialize, Copy, Clone, Getters)]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub merkle_root: H256,
    pub state_root: H256,
    pub coinbase: Address,
    #[getter(skip)]
    pub level: u64,
    pub time: u32,
    pub gas_limit: u64,
    pub nonce: u128,
}

impl BlockHeader {
    pub fn hash(&self) -> H256 {
        H256::from(SHA256::digest(&self.encode().unwrap()))
    }

    pub fn level(&self) -> u64 {
        self.level
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Block {
    header: BlockHeader,
    transactions: Box<[SignedTransaction]>,
    #[serde(skip)]
    hash: Arc<RwLock<Option<H256>>>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<SignedTransaction>) -> Self {
        Self {
            header,
            transactions: transactions.into_boxed_slice(),
            hash: Arc::new(Default::default()),
        }
    }

    pub fn hash(&self) -> H256 {
        if let Ok(hash) = self.hash.read() {
            if let Some(hash) = *hash {
                return hash;
            }
        }
        let computed = self.header.hash();
        if let Ok(mut hash) = self.hash.write() {
            *hash = Some(computed);
        }
        computed
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.transactions
    }

    pub fn level(&self) -> u64 {
        self.header.level
    }

    pub fn parent_hash(&self) -> &H256 {
        &self.header.parent_hash
    }
}

impl_codec!(Block);
impl_codec!(BlockHeader);
