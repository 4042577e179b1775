//! Extension type decoding.
//!
//! Applications register a decoder per `i8` type id; the decoder receives
//! `(type_id, payload)` and returns a [`Value`]. The reserved Timestamp
//! type (−1) is built in and decodes to a map with `"seconds"` and
//! `"nanoseconds"` entries, matching the three payload layouts of the
//! format spec (4, 8 and 12 bytes).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Reserved extension type id for the MessagePack Timestamp.
pub const TIMESTAMP_EXT_TYPE: i8 = -1;

/// Decoder callback: `(type_id, payload) -> Value`.
pub type ExtDecoder = Box<dyn Fn(i8, &[u8]) -> Result<Value> + Send + Sync>;

/// Registry of extension decoders keyed by type id.
///
/// Registering a decoder for −1 overrides the builtin Timestamp handling.
#[derive(Default)]
pub struct ExtRegistry {
    decoders: HashMap<i8, ExtDecoder>,
}

impl ExtRegistry {
    /// Create an empty registry (Timestamp still decodes via the builtin).
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder for a type id, replacing any previous one.
    pub fn register<F>(&mut self, type_id: i8, decoder: F)
    where
        F: Fn(i8, &[u8]) -> Result<Value> + Send + Sync + 'static,
    {
        self.decoders.insert(type_id, Box::new(decoder));
    }

    /// Remove a decoder. Returns whether one was registered.
    pub fn unregister(&mut self, type_id: i8) -> bool {
        self.decoders.remove(&type_id).is_some()
    }

    /// Decode an extension payload.
    ///
    /// Lookup order: registered decoder, then the builtin Timestamp for
    /// type −1, otherwise [`Error::Unsupported`].
    pub fn decode(&self, type_id: i8, data: &[u8]) -> Result<Value> {
        if let Some(decoder) = self.decoders.get(&type_id) {
            return decoder(type_id, data);
        }
        if type_id == TIMESTAMP_EXT_TYPE {
            return decode_timestamp(data);
        }
        Err(Error::Unsupported(type_id))
    }
}

impl std::fmt::Debug for ExtRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<i8> = self.decoders.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("ExtRegistry").field("types", &ids).finish()
    }
}

/// Decode a Timestamp payload into `{"seconds": Int, "nanoseconds": UInt}`.
///
/// Payload layouts per the format spec:
/// - 4 bytes: `u32` seconds
/// - 8 bytes: 30-bit nanoseconds over 34-bit seconds
/// - 12 bytes: `u32` nanoseconds, then `i64` seconds
pub fn decode_timestamp(data: &[u8]) -> Result<Value> {
    let (seconds, nanoseconds) = match data.len() {
        4 => {
            let secs = u32::from_be_bytes(data.try_into().expect("4-byte slice"));
            (i64::from(secs), 0u32)
        }
        8 => {
            let packed = u64::from_be_bytes(data.try_into().expect("8-byte slice"));
            let nanos = (packed >> 34) as u32;
            let secs = (packed & 0x3_ffff_ffff) as i64;
            (secs, nanos)
        }
        12 => {
            let nanos = u32::from_be_bytes(data[..4].try_into().expect("4-byte slice"));
            let secs = i64::from_be_bytes(data[4..].try_into().expect("8-byte slice"));
            (secs, nanos)
        }
        _ => return Err(Error::Data("timestamp payload must be 4, 8 or 12 bytes")),
    };

    Ok(Value::map_from([
        (Value::from("seconds"), Value::Int(seconds)),
        (Value::from("nanoseconds"), Value::UInt(u64::from(nanoseconds))),
    ]))
}
