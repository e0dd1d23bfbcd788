//! Marshalling of envelopes and records.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

pub trait Marshaller: Send + Sync + 'static {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn unmarshal<T: DeserializeOwned>(&self, buff: &[u8]) -> Result<T, CodecError>;
}

/// JSON marshaller. Field order follows declaration order, so equal
/// values always marshal to equal bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Marshal(Box::new(e)))
    }

    fn unmarshal<T: DeserializeOwned>(&self, buff: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buff).map_err(|e| CodecError::Unmarshal(Box::new(e)))
    }
}
