use thiserror::Error;

use codec::Codec;
use crypto::ecdsa::SignatureParts;
use primitive_types::H256;

use crate::tx::{SignedTransaction, TransactionData};
use crate::Address;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignerError {
    #[error("signature is considered unprotected")]
    UnprotectedSignature,
    #[error("invalid chain id for signer")]
    InvalidChainId,
    #[error("invalid transaction v, r, s values")]
    InvalidSignature,
}

/// Recovers transaction senders from their signature values. The protected
/// variant bakes the chain id into `v` (`v = 35 + 2 * chain_id + parity`),
/// the unprotected one uses the bare `v = 27 + parity` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signer {
    Protected { chain_id: u64 },
    Unprotected,
}

impl Signer {
    pub fn new(chain_id: u64) -> Self {
        if chain_id == 0 {
            Signer::Unprotected
        } else {
            Signer::Protected { chain_id }
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Signer::Protected { chain_id } => *chain_id,
            Signer::Unprotected => 0,
        }
    }

    /// The canonical byte payload covered by the signature: the transaction
    /// with the signature slots holding `(chain_id, 0, 0)`.
    pub fn unsigned_payload(&self, data: &TransactionData) -> Vec<u8> {
        let mut unsigned = data.clone();
        unsigned.v = self.chain_id();
        unsigned.r = H256::zero();
        unsigned.s = H256::zero();
        unsigned.encode().unwrap()
    }

    /// Extracts the recovery parity back out of a stored `v` value,
    /// enforcing this signer's replay-protection scheme.
    fn parity(&self, tx: &SignedTransaction) -> Result<u8, SignerError> {
        let v = tx.data().v;
        match self {
            Signer::Protected { chain_id } => {
                if !tx.protected() {
                    return Err(SignerError::UnprotectedSignature);
                }
                if tx.chain_id() != *chain_id {
                    return Err(SignerError::InvalidChainId);
                }
                let parity = v
                    .checked_sub(35 + 2 * chain_id)
                    .ok_or(SignerError::InvalidSignature)?;
                if parity > 1 {
                    return Err(SignerError::InvalidSignature);
                }
                Ok(parity as u8)
            }
            Signer::Unprotected => {
                if tx.protected() {
                    return Err(SignerError::InvalidSignature);
                }
                Ok((v - 27) as u8)
            }
        }
    }

    /// Recovers the sender address, caching it on the transaction.
    pub fn sender(&self, tx: &SignedTransaction) -> Result<Address, SignerError> {
        if let Some(from) = tx.cached_sender() {
            return Ok(from);
        }
        let data = tx.data();
        let parity = self.parity(tx)?;
        let sig = SignatureParts::new(data.r, data.s, parity)
            .map_err(|_| SignerError::InvalidSignature)?;
        let payload = self.unsigned_payload(data);
        let from = sig
            .recover_address(&payload)
            .map_err(|_| SignerError::InvalidSignature)?;
        tx.set_sender(from);
        Ok(from)
    }

    /// Folds a split signature into the `(r, s, v)` values a transaction
    /// stores, encoding the parity per this signer's scheme.
    pub fn signature_values(&self, sig: &SignatureParts) -> (H256, H256, u64) {
        let v = match self {
            Signer::Protected { chain_id } => 35 + 2 * chain_id + sig.parity as u64,
            Signer::Unprotected => 27 + sig.parity as u64,
        };
        (sig.r, sig.s, v)
    }
}
