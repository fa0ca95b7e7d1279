use anyhow::Result;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

use crypto::ecdsa::SigningPair;
use types::account::Account;
use types::signer::Signer;
use types::tx::{SignedTransaction, TransactionData};

/// Generates a fresh account with a secp256k1 keypair and derived address.
pub fn create_account() -> Account {
    let mut csprng = ChaCha20Rng::from_entropy();
    let pair = SigningPair::generate(&mut csprng);
    Account {
        address: pair.address(),
        pri_key: pair.secret_bytes(),
        pub_key: pair.public_bytes(),
    }
}

/// Signs the unsigned transaction body and fills in the `(v, r, s)` values
/// the way `signer` encodes them.
pub fn sign_tx(
    account: &Account,
    signer: &Signer,
    mut data: TransactionData,
) -> Result<SignedTransaction> {
    let payload = signer.unsigned_payload(&data);
    let sig = account.sign(&payload)?;
    let (r, s, v) = signer.signature_values(&sig);
    data.r = r;
    data.s = s;
    data.v = v;
    Ok(SignedTransaction::new(data))
}
