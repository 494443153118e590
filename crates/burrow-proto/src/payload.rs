//! Binary serialization of command payloads

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::CodecError;
use crate::MAX_FRAME_SIZE;

/// Serializes request and reply value objects to the bytes carried in an envelope
///
/// The bincode size limit is [`MAX_FRAME_SIZE`], the process-wide ceiling.
/// A session configured with a smaller frame size checks payload lengths
/// against its own limit before anything is framed.
pub struct PayloadCodec;

impl PayloadCodec {
    fn options() -> impl Options {
        bincode::options()
            .with_fixint_encoding()
            .with_limit(MAX_FRAME_SIZE as u64)
            .reject_trailing_bytes()
    }

    /// Encode a value object
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(Self::options().serialize(value)?)
    }

    /// Decode a value object
    ///
    /// Fails if the bytes do not describe exactly one `T`.
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        Ok(Self::options().deserialize(bytes)?)
    }
}
