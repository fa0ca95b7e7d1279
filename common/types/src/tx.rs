use std::collections::BTreeMap;
use std::fmt::Formatter;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tiny_keccak::Hasher;

use codec::impl_codec;
use codec::Codec;
use primitive_types::{H160, H256};

use crate::{Address, AssetId};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub payload: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub asset: AssetId,
    /// `None` marks an application-creation output.
    pub to: Option<Address>,
    pub value: u128,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransactionData {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub extra: Vec<u8>,

    // Signature values
    pub v: u64,
    pub r: H256,
    pub s: H256,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct SignedTransaction {
    data: TransactionData,

    //caches
    #[serde(skip)]
    hash: Arc<RwLock<Option<H256>>>,
    #[serde(skip)]
    size: Arc<RwLock<Option<u64>>>,
    #[serde(skip)]
    from: Arc<RwLock<Option<H160>>>,
}

impl std::fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("hash", &self.hash())
            .field("nonce", &self.data.nonce)
            .field("gas_price", &self.data.gas_price)
            .field("gas", &self.data.gas)
            .field("outputs", &self.data.outputs)
            .finish()
    }
}

impl PartialEq for SignedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash().eq(&other.hash())
    }
}

impl Eq for SignedTransaction {}

impl std::hash::Hash for SignedTransaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(self.hash().as_bytes())
    }
}

fn cached<T, F>(cell: &RwLock<Option<T>>, compute: F) -> T
where
    T: Copy,
    F: FnOnce() -> T,
{
    if let Ok(cache) = cell.read() {
        if let Some(value) = *cache {
            return value;
        }
    }
    let value = compute();
    if let Ok(mut cache) = cell.write() {
        *cache = Some(value);
    }
    value
}

impl SignedTransaction {
    pub fn new(data: TransactionData) -> Self {
        Self {
            data,
            hash: Default::default(),
            size: Default::default(),
            from: Default::default(),
        }
    }

    pub fn data(&self) -> &TransactionData {
        &self.data
    }

    pub fn nonce(&self) -> u64 {
        self.data.nonce
    }

    pub fn gas(&self) -> u64 {
        self.data.gas
    }

    pub fn gas_price(&self) -> u128 {
        self.data.gas_price
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.data.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.data.outputs
    }

    pub fn extra(&self) -> &[u8] {
        &self.data.extra
    }

    /// Content fingerprint of the canonical encoding. Uniquely identifies the
    /// transaction.
    pub fn hash(&self) -> H256 {
        cached(&self.hash, || {
            let mut out = [0_u8; 32];
            let mut sha3 = tiny_keccak::Sha3::v256();
            sha3.update(&self.data.encode().unwrap());
            sha3.finalize(&mut out);
            H256::from(out)
        })
    }

    /// Encoded storage size of the transaction.
    pub fn size(&self) -> u64 {
        cached(&self.size, || self.data.encoded_size().unwrap_or_default())
    }

    /// Total native cost the sender must be able to cover:
    /// `gas_price * gas + sum of native outputs`.
    pub fn cost(&self) -> u128 {
        let value: u128 = self
            .data
            .outputs
            .iter()
            .filter(|out| out.asset == crate::native_asset())
            .fold(0_u128, |acc, out| acc.saturating_add(out.value));
        self.data
            .gas_price
            .saturating_mul(self.data.gas as u128)
            .saturating_add(value)
    }

    /// Per-asset totals of every output.
    pub fn value_by_asset(&self) -> BTreeMap<AssetId, u128> {
        let mut values: BTreeMap<AssetId, u128> = BTreeMap::new();
        for out in &self.data.outputs {
            let total = values.entry(out.asset).or_insert(0);
            *total = total.saturating_add(out.value);
        }
        values
    }

    /// Whether any output creates an application rather than paying a
    /// recipient.
    pub fn is_create(&self) -> bool {
        self.data.outputs.iter().any(|out| out.to.is_none())
    }

    /// Whether the signature carries replay protection.
    pub fn protected(&self) -> bool {
        self.data.v != 27 && self.data.v != 28
    }

    /// The chain id the transaction was signed for, if protected.
    pub fn chain_id(&self) -> u64 {
        if self.protected() && self.data.v >= 35 {
            (self.data.v - 35) / 2
        } else {
            0
        }
    }

    pub fn cached_sender(&self) -> Option<H160> {
        self.from.read().ok().and_then(|from| *from)
    }

    pub fn set_sender(&self, address: H160) {
        if let Ok(mut from) = self.from.write() {
            *from = Some(address);
        }
    }
}

impl_codec!(TransactionData);
impl_codec!(SignedTransaction);
impl_codec!(TxInput);
impl_codec!(TxOutput);
