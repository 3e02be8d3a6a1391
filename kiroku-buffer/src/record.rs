//! MessagePack encoding of buffered entries.
//!
//! Each appended record becomes a self-delimiting 2-element array
//! `[timestamp, record]`; a chunk is the plain concatenation of these.
//! Timestamps encode as integers, or as the forward protocol's ext type
//! 0 (8 bytes, big-endian seconds then nanoseconds) when event-time
//! precision was requested.

use byteorder::{BigEndian, WriteBytesExt};
use serde::Serialize;

use kiroku_core::error::{Error, Result};
use kiroku_core::time::Timestamp;

/// Record payload: a string-keyed map of JSON-shaped values.
pub type RecordMap = serde_json::Map<String, serde_json::Value>;

const EVENT_TIME_EXT_TYPE: i8 = 0;
const EVENT_TIME_EXT_LEN: u32 = 8;

/// Pluggable value encoder consulted before the default encoding.
///
/// Return `Ok(false)` to decline a value and fall through to the next
/// module (and finally the default MessagePack encoding).
pub trait EncoderModule: Send + Sync {
    fn encode_value(&self, value: &serde_json::Value, out: &mut Vec<u8>) -> Result<bool>;
}

/// Turns `(timestamp, record)` pairs into chunk bytes.
pub struct RecordEncoder {
    modules: Vec<Box<dyn EncoderModule>>,
}

impl std::fmt::Debug for RecordEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEncoder")
            .field("modules", &self.modules.len())
            .finish()
    }
}

impl Default for RecordEncoder {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RecordEncoder {
    pub fn new(modules: Vec<Box<dyn EncoderModule>>) -> Self {
        Self { modules }
    }

    /// Encode one `[timestamp, record]` entry.
    pub fn encode_entry(&self, timestamp: Timestamp, record: &RecordMap) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        rmp::encode::write_array_len(&mut out, 2).map_err(encode_error)?;
        self.encode_timestamp(&mut out, timestamp)?;
        self.encode_map(&mut out, record)?;
        Ok(out)
    }

    /// Encode an entry whose record map is already MessagePack; the map
    /// bytes are pasted verbatim after the timestamp.
    pub fn encode_entry_raw(&self, timestamp: Timestamp, map_bytes: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16 + map_bytes.len());
        rmp::encode::write_array_len(&mut out, 2).map_err(encode_error)?;
        self.encode_timestamp(&mut out, timestamp)?;
        out.extend_from_slice(map_bytes);
        Ok(out)
    }

    fn encode_timestamp(&self, out: &mut Vec<u8>, timestamp: Timestamp) -> Result<()> {
        match timestamp {
            Timestamp::Unix(secs) => {
                rmp::encode::write_sint(out, secs).map_err(encode_error)?;
            }
            Timestamp::EventTime(time) => {
                rmp::encode::write_ext_meta(out, EVENT_TIME_EXT_LEN, EVENT_TIME_EXT_TYPE)
                    .map_err(encode_error)?;
                out.write_u32::<BigEndian>(time.secs).map_err(Error::from)?;
                out.write_u32::<BigEndian>(time.nanos).map_err(Error::from)?;
            }
        }
        Ok(())
    }

    fn encode_map(&self, out: &mut Vec<u8>, record: &RecordMap) -> Result<()> {
        rmp::encode::write_map_len(out, record.len() as u32).map_err(encode_error)?;
        for (key, value) in record {
            rmp::encode::write_str(out, key).map_err(encode_error)?;
            self.encode_value(out, value)?;
        }
        Ok(())
    }

    fn encode_value(&self, out: &mut Vec<u8>, value: &serde_json::Value) -> Result<()> {
        for module in &self.modules {
            if module.encode_value(value, out)? {
                return Ok(());
            }
        }
        let mut serializer = rmp_serde::Serializer::new(&mut *out);
        value.serialize(&mut serializer).map_err(|e| Error::Encode {
            message: format!("failed to encode record value: {}", e),
            source: Some(Box::new(e)),
        })
    }
}

fn encode_error<E>(e: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Encode {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}
