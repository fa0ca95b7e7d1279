use k256::ecdsa::signature::DigestSigner;
use k256::ecdsa::signature::Signature as _;
use k256::ecdsa::{recoverable, SigningKey};
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use primitive_types::{H160, H256};

use crate::error::Error;

pub const SECRET_KEY_LENGTH: usize = 32;
pub const PUBLIC_KEY_LENGTH: usize = 33;
pub const SIGNATURE_LENGTH: usize = 65;

/// Signing half of an account. Signatures come out already split into the
/// `(r, s, parity)` form transactions carry, so callers never touch raw
/// 65 byte blobs.
pub struct SigningPair {
    inner: SigningKey,
}

impl SigningPair {
    pub fn generate<T>(csprng: &mut T) -> Self
    where
        T: CryptoRng + RngCore,
    {
        Self {
            inner: SigningKey::random(csprng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let inner = SigningKey::from_bytes(bytes).map_err(|_| Error::InvalidSecretKey)?;
        Ok(Self { inner })
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        let mut out = [0_u8; SECRET_KEY_LENGTH];
        out.copy_from_slice(self.inner.to_bytes().as_slice());
        out
    }

    /// Compressed public key.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let mut out = [0_u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(self.inner.verifying_key().to_bytes().as_slice());
        out
    }

    /// The account address funds are debited from when this pair signs.
    pub fn address(&self) -> H160 {
        crate::address_from_pub_key(&self.public_bytes())
    }

    /// Signs the SHA-256 prehash of `payload`.
    pub fn sign(&self, payload: &[u8]) -> Result<SignatureParts, Error> {
        let mut prehash = Sha256::default();
        prehash.update(payload);
        let sig: recoverable::Signature = self.inner.sign_digest(prehash);
        SignatureParts::from_bytes(sig.as_bytes())
    }
}

/// A recoverable signature in the split form transactions store. The parity
/// bit is kept separate so replay-protection schemes can fold it into their
/// own `v` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParts {
    pub r: H256,
    pub s: H256,
    pub parity: u8,
}

impl SignatureParts {
    pub fn new(r: H256, s: H256, parity: u8) -> Result<Self, Error> {
        if parity > 1 {
            return Err(Error::MalformedSignature);
        }
        Ok(Self { r, s, parity })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(Error::MalformedSignature);
        }
        Self::new(
            H256::from_slice(&bytes[..32]),
            H256::from_slice(&bytes[32..64]),
            bytes[64],
        )
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut out = [0_u8; SIGNATURE_LENGTH];
        out[..32].copy_from_slice(self.r.as_bytes());
        out[32..64].copy_from_slice(self.s.as_bytes());
        out[64] = self.parity;
        out
    }

    /// Recovers the compressed public key that signed SHA-256(payload).
    pub fn recover_pub_key(&self, payload: &[u8]) -> Result<[u8; PUBLIC_KEY_LENGTH], Error> {
        let sig = recoverable::Signature::from_bytes(&self.to_bytes())
            .map_err(|_| Error::MalformedSignature)?;
        let mut prehash = Sha256::default();
        prehash.update(payload);
        let key = sig
            .recover_verify_key_from_digest(prehash)
            .map_err(|_| Error::UnrecoverableSignature)?;
        let mut out = [0_u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(key.to_bytes().as_slice());
        Ok(out)
    }

    /// Recovers the sender address behind the signature.
    pub fn recover_address(&self, payload: &[u8]) -> Result<H160, Error> {
        Ok(crate::address_from_pub_key(&self.recover_pub_key(payload)?))
    }
}
