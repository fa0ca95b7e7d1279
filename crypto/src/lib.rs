use primitive_types::H160;
use ripemd160::Ripemd160;
use sha2::{Digest, Sha256};

pub mod ecdsa;
pub mod error;

pub const HASH_LEN: usize = 32;

pub struct SHA256;

impl SHA256 {
    pub fn digest(input: &[u8]) -> [u8; HASH_LEN] {
        let out = Sha256::digest(input);
        out.into()
    }
}

pub struct RIPEMD160;

impl RIPEMD160 {
    pub fn digest(input: &[u8]) -> H160 {
        let out = Ripemd160::digest(input);
        H160::from_slice(out.as_slice())
    }
}

/// Derives an account address from a compressed secp256k1 public key.
pub fn address_from_pub_key(pub_key: &[u8]) -> H160 {
    RIPEMD160::digest(&SHA256::digest(pub_key))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_address_derivation_is_stable() {
        let key = [7_u8; 33];
        assert_eq!(address_from_pub_key(&key), address_from_pub_key(&key));
        assert_ne!(address_from_pub_key(&key), H160::zero());
    }
}
