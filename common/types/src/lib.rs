use primitive_types::H160;
use serde_big_array::big_array;

pub mod account;
pub mod block;
pub mod events;
pub mod signer;
pub mod tx;

pub type Hash = [u8; 32];
pub type Address = H160;
pub type AssetId = H160;

/// The asset in which fees are paid.
pub fn native_asset() -> AssetId {
    AssetId::zero()
}

big_array! { BigArray; 33, }
