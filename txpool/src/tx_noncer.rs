use std::collections::HashMap;
use std::sync::Arc;

use traits::StateDB;
use types::Address;

/// Tracks the next executable nonce per account, falling back to the state
/// view for accounts it has not seen yet. Rebuilt from scratch at every chain
/// head reset.
pub struct TxNoncer {
    fallback: Arc<dyn StateDB>,
    nonces: HashMap<Address, u64>,
}

impl TxNoncer {
    pub fn new(fallback: Arc<dyn StateDB>) -> Self {
        Self {
            fallback,
            nonces: HashMap::new(),
        }
    }

    pub fn get(&mut self, address: &Address) -> u64 {
        let fallback = &self.fallback;
        *self
            .nonces
            .entry(*address)
            .or_insert_with(|| fallback.nonce(address))
    }

    pub fn set(&mut self, address: Address, nonce: u64) {
        self.nonces.insert(address, nonce);
    }

    /// Lowers the tracked nonce to `nonce` if the current value is higher.
    pub fn set_if_lower(&mut self, address: Address, nonce: u64) {
        let fallback = &self.fallback;
        let entry = self
            .nonces
            .entry(address)
            .or_insert_with(|| fallback.nonce(&address));
        if *entry > nonce {
            *entry = nonce;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use types::AssetId;

    use super::*;

    struct FixedState {
        nonces: Mutex<HashMap<Address, u64>>,
    }

    impl StateDB for FixedState {
        fn nonce(&self, address: &Address) -> u64 {
            self.nonces
                .lock()
                .map(|nonces| nonces.get(address).copied().unwrap_or_default())
                .unwrap_or_default()
        }

        fn balance(&self, _address: &Address, _asset: &AssetId) -> u128 {
            0
        }
    }

    #[test]
    fn test_fallback_and_overrides() {
        let addr = Address::repeat_byte(1);
        let state = Arc::new(FixedState {
            nonces: Mutex::new(HashMap::from([(addr, 5)])),
        });
        let mut noncer = TxNoncer::new(state);

        assert_eq!(noncer.get(&addr), 5);
        noncer.set(addr, 9);
        assert_eq!(noncer.get(&addr), 9);
        noncer.set_if_lower(addr, 11);
        assert_eq!(noncer.get(&addr), 9);
        noncer.set_if_lower(addr, 3);
        assert_eq!(noncer.get(&addr), 3);
    }
}
