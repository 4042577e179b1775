//! Buffer-mode MessagePack encoder.
//!
//! Walks a [`Value`] tree and emits the narrowest encoding that preserves
//! each value: positive/negative fixint before the sized integer forms,
//! fixstr/fixarray/fixmap before the 16/32-bit headers, and single-precision
//! floats whenever the double round-trips through `f32`.
//!
//! # Example
//!
//! ```
//! use wirepack::{codec::encode, Value};
//!
//! let bytes = encode(&Value::Array(vec![Value::Int(1), Value::Nil])).unwrap();
//! assert_eq!(&bytes[..], &[0x92, 0x01, 0xc0]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::marker;
use super::{BIN_MAX, DEPTH_MAX, STR_MAX};
use crate::error::{Error, Result};
use crate::value::Value;

/// Typed bulk-array encoding hint.
///
/// Writes an array header followed by element-wise primitive writes,
/// skipping the per-element generic dispatch. The wire format is identical
/// to encoding the equivalent generic [`Value::Array`].
#[derive(Debug, Clone, Copy)]
pub enum PackedArray<'a> {
    Int(&'a [i64]),
    Float(&'a [f32]),
    Double(&'a [f64]),
    Str(&'a [String]),
}

/// Incremental MessagePack writer over a growable scratch buffer.
///
/// Unsupported values (an `Ext` with a reserved negative type id) are
/// written as nil and remembered as a sticky error, so size accounting
/// stays valid for the rest of the tree; the error surfaces from
/// [`finish`](Encoder::finish).
pub struct Encoder {
    buf: BytesMut,
    deferred: Option<Error>,
}

impl Encoder {
    /// Create an encoder with a small initial scratch buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(128),
            deferred: None,
        }
    }

    /// Encode one value into the scratch buffer.
    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        self.write_recursive(value, 0)
    }

    /// Encode a typed bulk array into the scratch buffer.
    pub fn write_packed(&mut self, packed: &PackedArray<'_>) -> Result<()> {
        match packed {
            PackedArray::Int(items) => {
                self.write_array_header(items.len())?;
                for &item in *items {
                    self.write_int(item);
                }
            }
            PackedArray::Float(items) => {
                self.write_array_header(items.len())?;
                for &item in *items {
                    self.write_f32(item);
                }
            }
            PackedArray::Double(items) => {
                self.write_array_header(items.len())?;
                for &item in *items {
                    self.write_f64(item);
                }
            }
            PackedArray::Str(items) => {
                self.write_array_header(items.len())?;
                for item in *items {
                    self.write_str(item)?;
                }
            }
        }
        Ok(())
    }

    /// Finalize: return the written bytes, trimmed to exact size, or the
    /// sticky error recorded during encoding.
    pub fn finish(self) -> Result<Bytes> {
        match self.deferred {
            Some(err) => Err(err),
            None => Ok(self.buf.freeze()),
        }
    }

    fn write_recursive(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth >= DEPTH_MAX {
            return Err(Error::TooBig);
        }

        match value {
            Value::Nil => self.buf.put_u8(marker::NIL),
            Value::Bool(false) => self.buf.put_u8(marker::FALSE),
            Value::Bool(true) => self.buf.put_u8(marker::TRUE),
            Value::Int(i) => self.write_int(*i),
            Value::UInt(u) => self.write_uint(*u),
            Value::Float(f) => self.write_f32(*f),
            Value::Double(d) => self.write_f64(*d),
            Value::Str(s) => self.write_str(s)?,
            Value::Bin(b) => self.write_bin(b)?,
            Value::Array(items) => {
                self.write_array_header(items.len())?;
                for item in items {
                    self.write_recursive(item, depth + 1)?;
                }
            }
            Value::Map(pairs) => {
                self.write_map_header(pairs.len())?;
                for (key, val) in pairs {
                    self.write_recursive(key, depth + 1)?;
                    self.write_recursive(val, depth + 1)?;
                }
            }
            Value::Ext(type_id, data) => self.write_ext(*type_id, data)?,
        }
        Ok(())
    }

    fn write_int(&mut self, i: i64) {
        if i >= 0 {
            return self.write_uint(i as u64);
        }
        if i >= -32 {
            self.buf.put_u8(i as i8 as u8);
        } else if i >= i64::from(i8::MIN) {
            self.buf.put_u8(marker::INT8);
            self.buf.put_i8(i as i8);
        } else if i >= i64::from(i16::MIN) {
            self.buf.put_u8(marker::INT16);
            self.buf.put_i16(i as i16);
        } else if i >= i64::from(i32::MIN) {
            self.buf.put_u8(marker::INT32);
            self.buf.put_i32(i as i32);
        } else {
            self.buf.put_u8(marker::INT64);
            self.buf.put_i64(i);
        }
    }

    fn write_uint(&mut self, u: u64) {
        if u < 0x80 {
            self.buf.put_u8(u as u8);
        } else if u <= u64::from(u8::MAX) {
            self.buf.put_u8(marker::UINT8);
            self.buf.put_u8(u as u8);
        } else if u <= u64::from(u16::MAX) {
            self.buf.put_u8(marker::UINT16);
            self.buf.put_u16(u as u16);
        } else if u <= u64::from(u32::MAX) {
            self.buf.put_u8(marker::UINT32);
            self.buf.put_u32(u as u32);
        } else {
            self.buf.put_u8(marker::UINT64);
            self.buf.put_u64(u);
        }
    }

    fn write_f32(&mut self, f: f32) {
        self.buf.put_u8(marker::FLOAT32);
        self.buf.put_f32(f);
    }

    fn write_f64(&mut self, d: f64) {
        // Narrow to single precision when the value survives the round trip.
        let narrowed = d as f32;
        if f64::from(narrowed) == d {
            self.write_f32(narrowed);
        } else {
            self.buf.put_u8(marker::FLOAT64);
            self.buf.put_f64(d);
        }
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        let len = s.len();
        if len > STR_MAX {
            return Err(Error::TooBig);
        }
        if len < 32 {
            self.buf.put_u8(0xa0 | len as u8);
        } else if len <= usize::from(u8::MAX) {
            self.buf.put_u8(marker::STR8);
            self.buf.put_u8(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.put_u8(marker::STR16);
            self.buf.put_u16(len as u16);
        } else {
            self.buf.put_u8(marker::STR32);
            self.buf.put_u32(len as u32);
        }
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn write_bin(&mut self, b: &[u8]) -> Result<()> {
        let len = b.len();
        if len > BIN_MAX {
            return Err(Error::TooBig);
        }
        if len <= usize::from(u8::MAX) {
            self.buf.put_u8(marker::BIN8);
            self.buf.put_u8(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.put_u8(marker::BIN16);
            self.buf.put_u16(len as u16);
        } else {
            self.buf.put_u8(marker::BIN32);
            self.buf.put_u32(len as u32);
        }
        self.buf.put_slice(b);
        Ok(())
    }

    fn write_array_header(&mut self, len: usize) -> Result<()> {
        if len < 16 {
            self.buf.put_u8(0x90 | len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.put_u8(marker::ARRAY16);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(marker::ARRAY32);
            self.buf.put_u32(len as u32);
        } else {
            return Err(Error::TooBig);
        }
        Ok(())
    }

    fn write_map_header(&mut self, len: usize) -> Result<()> {
        if len < 16 {
            self.buf.put_u8(0x80 | len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.put_u8(marker::MAP16);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(marker::MAP32);
            self.buf.put_u32(len as u32);
        } else {
            return Err(Error::TooBig);
        }
        Ok(())
    }

    fn write_ext(&mut self, type_id: i8, data: &[u8]) -> Result<()> {
        // Negative type ids are reserved by the format; only the Timestamp
        // (-1) is encodable. Others degrade to nil with a sticky error so
        // the surrounding containers keep their declared sizes.
        if type_id < 0 && type_id != super::TIMESTAMP_EXT_TYPE {
            self.buf.put_u8(marker::NIL);
            if self.deferred.is_none() {
                self.deferred = Some(Error::Unsupported(type_id));
            }
            return Ok(());
        }

        let len = data.len();
        if len > BIN_MAX {
            return Err(Error::TooBig);
        }
        match len {
            1 => self.buf.put_u8(marker::FIXEXT1),
            2 => self.buf.put_u8(marker::FIXEXT2),
            4 => self.buf.put_u8(marker::FIXEXT4),
            8 => self.buf.put_u8(marker::FIXEXT8),
            16 => self.buf.put_u8(marker::FIXEXT16),
            _ if len <= usize::from(u8::MAX) => {
                self.buf.put_u8(marker::EXT8);
                self.buf.put_u8(len as u8);
            }
            _ if len <= usize::from(u16::MAX) => {
                self.buf.put_u8(marker::EXT16);
                self.buf.put_u16(len as u16);
            }
            _ => {
                self.buf.put_u8(marker::EXT32);
                self.buf.put_u32(len as u32);
            }
        }
        self.buf.put_i8(type_id);
        self.buf.put_slice(data);
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode one value to MessagePack bytes.
pub fn encode(value: &Value) -> Result<Bytes> {
    let mut enc = Encoder::new();
    enc.write_value(value)?;
    enc.finish()
}

/// Encode a typed bulk array to MessagePack bytes.
pub fn encode_packed(packed: &PackedArray<'_>) -> Result<Bytes> {
    let mut enc = Encoder::new();
    enc.write_packed(packed)?;
    enc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bytes_of(value: &Value) -> Vec<u8> {
        encode(value).unwrap().to_vec()
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(bytes_of(&Value::Nil), [0xc0]);
        assert_eq!(bytes_of(&Value::Bool(false)), [0xc2]);
        assert_eq!(bytes_of(&Value::Bool(true)), [0xc3]);
    }

    #[test]
    fn test_integer_narrowest_form() {
        assert_eq!(bytes_of(&Value::Int(0)), [0x00]);
        assert_eq!(bytes_of(&Value::Int(127)), [0x7f]);
        assert_eq!(bytes_of(&Value::Int(128)), [0xcc, 0x80]);
        assert_eq!(bytes_of(&Value::Int(256)), [0xcd, 0x01, 0x00]);
        assert_eq!(bytes_of(&Value::Int(65536)), [0xce, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(
            bytes_of(&Value::Int(1 << 32)),
            [0xcf, 0, 0, 0, 1, 0, 0, 0, 0]
        );

        assert_eq!(bytes_of(&Value::Int(-1)), [0xff]);
        assert_eq!(bytes_of(&Value::Int(-32)), [0xe0]);
        assert_eq!(bytes_of(&Value::Int(-33)), [0xd0, 0xdf]);
        assert_eq!(bytes_of(&Value::Int(-129)), [0xd1, 0xff, 0x7f]);
        assert_eq!(
            bytes_of(&Value::Int(-40000)),
            [0xd2, 0xff, 0xff, 0x63, 0xc0]
        );
        assert_eq!(
            bytes_of(&Value::Int(i64::MIN)),
            [0xd3, 0x80, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_uint_narrowest_form() {
        assert_eq!(bytes_of(&Value::UInt(127)), [0x7f]);
        assert_eq!(bytes_of(&Value::UInt(255)), [0xcc, 0xff]);
        assert_eq!(bytes_of(&Value::UInt(65535)), [0xcd, 0xff, 0xff]);
        assert_eq!(
            bytes_of(&Value::UInt(u64::MAX)),
            [0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_float_rule() {
        // 1.5 survives the f32 round trip: 5 bytes.
        assert_eq!(bytes_of(&Value::Double(1.5)).len(), 5);
        // 0.1 does not: 9 bytes.
        assert_eq!(bytes_of(&Value::Double(0.1)).len(), 9);
        // Float is always single precision.
        assert_eq!(bytes_of(&Value::Float(0.25)), [0xca, 0x3e, 0x80, 0x00, 0x00]);
        // NaN never compares equal to itself, so it goes out wide.
        assert_eq!(bytes_of(&Value::Double(f64::NAN)).len(), 9);
    }

    #[test]
    fn test_str_forms() {
        assert_eq!(bytes_of(&Value::from("")), [0xa0]);
        assert_eq!(
            bytes_of(&Value::from("hello")),
            [0xa5, b'h', b'e', b'l', b'l', b'o']
        );

        let s31 = "x".repeat(31);
        assert_eq!(bytes_of(&Value::from(s31.clone()))[0], 0xa0 | 31);

        let s32 = "x".repeat(32);
        let enc = bytes_of(&Value::from(s32));
        assert_eq!(&enc[..2], &[marker::STR8, 32]);

        let s300 = "x".repeat(300);
        let enc = bytes_of(&Value::from(s300));
        assert_eq!(&enc[..3], &[marker::STR16, 0x01, 0x2c]);
    }

    #[test]
    fn test_bin_forms() {
        let b = Value::Bin(Bytes::from(vec![1u8, 2, 3]));
        assert_eq!(bytes_of(&b), [marker::BIN8, 3, 1, 2, 3]);

        let big = Value::Bin(Bytes::from(vec![0u8; 300]));
        let enc = bytes_of(&big);
        assert_eq!(&enc[..3], &[marker::BIN16, 0x01, 0x2c]);
    }

    #[test]
    fn test_container_headers() {
        let arr = Value::Array(vec![Value::Nil; 16]);
        let enc = bytes_of(&arr);
        assert_eq!(&enc[..3], &[marker::ARRAY16, 0, 16]);

        let map = Value::map_from((0..16).map(|i| (Value::Int(i), Value::Nil)));
        let enc = bytes_of(&map);
        assert_eq!(&enc[..3], &[marker::MAP16, 0, 16]);
    }

    #[test]
    fn test_known_map_bytes() {
        let map = Value::map_from([
            (Value::from("hello"), Value::from("world")),
            (Value::from("n"), Value::from(42i64)),
        ]);
        assert_eq!(
            bytes_of(&map),
            [
                0x82, 0xa5, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0xa5, 0x77, 0x6f, 0x72, 0x6c, 0x64,
                0xa1, 0x6e, 0x2a
            ]
        );
    }

    #[test]
    fn test_known_array_bytes() {
        let arr = Value::Array(vec![
            Value::Int(127),
            Value::Int(128),
            Value::Int(256),
            Value::Int(65536),
        ]);
        assert_eq!(
            bytes_of(&arr),
            [0x94, 0x7f, 0xcc, 0x80, 0xcd, 0x01, 0x00, 0xce, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_ext_forms() {
        let e = Value::Ext(5, Bytes::from(vec![0xaa]));
        assert_eq!(bytes_of(&e), [marker::FIXEXT1, 5, 0xaa]);

        let e4 = Value::Ext(5, Bytes::from(vec![1, 2, 3, 4]));
        assert_eq!(bytes_of(&e4), [marker::FIXEXT4, 5, 1, 2, 3, 4]);

        let e3 = Value::Ext(5, Bytes::from(vec![1, 2, 3]));
        assert_eq!(bytes_of(&e3), [marker::EXT8, 3, 5, 1, 2, 3]);
    }

    #[test]
    fn test_reserved_ext_encodes_nil_with_deferred_error() {
        // Type -2 is format-reserved: the slot becomes nil, the array keeps
        // its declared length, and the error surfaces at finish.
        let arr = Value::Array(vec![
            Value::Int(1),
            Value::Ext(-2, Bytes::from(vec![0u8])),
            Value::Int(2),
        ]);
        let mut enc = Encoder::new();
        enc.write_value(&arr).unwrap();
        assert_eq!(enc.finish(), Err(Error::Unsupported(-2)));
    }

    #[test]
    fn test_timestamp_ext_encodes() {
        let e = Value::Ext(-1, Bytes::from(vec![0, 0, 0, 10]));
        assert_eq!(bytes_of(&e), [marker::FIXEXT4, 0xff, 0, 0, 0, 10]);
    }

    #[test]
    fn test_depth_limit() {
        let mut v = Value::Array(vec![]);
        for _ in 0..32 {
            v = Value::Array(vec![v]);
        }
        // 33 nested arrays in total.
        assert_eq!(encode(&v), Err(Error::TooBig));

        let mut ok = Value::Array(vec![]);
        for _ in 0..31 {
            ok = Value::Array(vec![ok]);
        }
        assert!(encode(&ok).is_ok());
    }

    #[test]
    fn test_oversized_str_aborts() {
        let s = "x".repeat(STR_MAX + 1);
        assert_eq!(encode(&Value::from(s)), Err(Error::TooBig));
    }

    #[test]
    fn test_encode_deterministic() {
        let v = Value::map_from([
            (Value::from("k"), Value::Array(vec![Value::Int(1), Value::Double(0.1)])),
            (Value::from("b"), Value::Bin(Bytes::from(vec![9u8, 8]))),
        ]);
        assert_eq!(encode(&v).unwrap(), encode(&v).unwrap());
    }

    #[test]
    fn test_packed_matches_generic() {
        let ints = [127i64, 128, 256, 65536];
        let generic = Value::Array(ints.iter().map(|&i| Value::Int(i)).collect());
        assert_eq!(
            encode_packed(&PackedArray::Int(&ints)).unwrap(),
            encode(&generic).unwrap()
        );

        let floats = [1.0f32, -2.5];
        let generic = Value::Array(floats.iter().map(|&f| Value::Float(f)).collect());
        assert_eq!(
            encode_packed(&PackedArray::Float(&floats)).unwrap(),
            encode(&generic).unwrap()
        );

        let strs = ["a".to_string(), "bb".to_string()];
        let generic = Value::Array(strs.iter().map(|s| Value::Str(s.clone())).collect());
        assert_eq!(
            encode_packed(&PackedArray::Str(&strs)).unwrap(),
            encode(&generic).unwrap()
        );
    }
}
