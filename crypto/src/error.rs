use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid secret key material")]
    InvalidSecretKey,
    #[error("malformed signature values")]
    MalformedSignature,
    #[error("signature does not recover to a valid key")]
    UnrecoverableSignature,
}
