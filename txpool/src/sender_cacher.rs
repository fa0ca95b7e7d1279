use std::thread;

use once_cell::sync::Lazy;

use types::signer::Signer;

use crate::TransactionRef;

/// Process-wide recovery fan-out, shared by every pool in the binary.
pub static SENDER_CACHER: Lazy<SenderCacher> = Lazy::new(SenderCacher::new);

/// Spreads signature recovery over the machine's cores so that batched
/// admissions hit warm sender caches instead of recovering under the pool
/// lock. Purely an optimization: admission re-derives anything missing.
pub struct SenderCacher {
    threads: usize,
}

impl SenderCacher {
    fn new() -> Self {
        Self {
            threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    pub fn recover(&self, signer: &Signer, txs: &[TransactionRef]) {
        let pending: Vec<&TransactionRef> = txs
            .iter()
            .filter(|tx| tx.cached_sender().is_none())
            .collect();
        if pending.is_empty() {
            return;
        }
        let workers = self.threads.min(pending.len());
        if workers <= 1 {
            for tx in pending {
                let _ = signer.sender(tx);
            }
            return;
        }
        let chunk = (pending.len() + workers - 1) / workers;
        thread::scope(|scope| {
            for txs in pending.chunks(chunk) {
                scope.spawn(move || {
                    for tx in txs {
                        let _ = signer.sender(tx);
                    }
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use account::{create_account, sign_tx};
    use types::tx::{TransactionData, TxOutput};
    use types::Address;

    use super::*;

    #[test]
    fn test_recover_warms_caches() {
        let signer = Signer::new(1);
        let mut txs = Vec::new();
        for nonce in 0..8_u64 {
            let account = create_account();
            let tx = sign_tx(
                &account,
                &signer,
                TransactionData {
                    nonce,
                    gas_price: 1,
                    gas: 21_000,
                    inputs: vec![],
                    outputs: vec![TxOutput {
                        asset: types::native_asset(),
                        to: Some(Address::repeat_byte(1)),
                        value: 1,
                    }],
                    extra: vec![],
                    v: 0,
                    r: Default::default(),
                    s: Default::default(),
                },
            )
            .unwrap();
            txs.push(Arc::new(tx));
        }
        assert!(txs.iter().all(|tx| tx.cached_sender().is_none()));
        SENDER_CACHER.recover(&signer, &txs);
        assert!(txs.iter().all(|tx| tx.cached_sender().is_some()));
    }
}
