use std::hash::Hash;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use codec::impl_codec;
use crypto::ecdsa::{SignatureParts, SigningPair};

use crate::{Address, BigArray};

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub pri_key: [u8; 32],
    #[serde(with = "BigArray")]
    pub pub_key: [u8; 33],
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.address.eq(&other.address)
    }
}

impl Eq for Account {}

impl Hash for Account {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(self.address.as_bytes())
    }
}

impl Account {
    pub fn address_encoded(&self) -> String {
        format!("{:?}", self.address)
    }

    /// Produces a split recoverable signature over `payload`.
    pub fn sign(&self, payload: &[u8]) -> Result<SignatureParts> {
        let pair = SigningPair::from_secret_bytes(&self.pri_key)?;
        Ok(pair.sign(payload)?)
    }
}

impl_codec!(Account);
