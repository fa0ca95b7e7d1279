use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Canonical byte encoding shared by fingerprint hashing, journal records
/// and block payloads. Everything that is hashed or persisted goes through
/// this one trait so identities stay stable across call sites.
pub trait Codec: Sized + Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| e.into())
    }

    /// Encoded length without materializing the buffer. Admission size caps
    /// call this on every incoming transaction.
    fn encoded_size(&self) -> Result<u64> {
        bincode::serialized_size(self).map_err(|e| e.into())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        bincode::deserialize(buf).map_err(|e| e.into())
    }
}

#[macro_export]
macro_rules! impl_codec {
    ($type : ty) => {
        impl $crate::Codec for $type {}
    };
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
    struct Record {
        seq: u64,
        payload: Vec<u8>,
    }

    impl_codec!(Record);

    #[test]
    fn test_round_trip_and_size() {
        let record = Record {
            seq: 7,
            payload: vec![1, 2, 3],
        };
        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len() as u64, record.encoded_size().unwrap());
        assert_eq!(Record::decode(&bytes).unwrap(), record);
    }
}
