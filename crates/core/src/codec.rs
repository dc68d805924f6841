//! Order-preserving scalar codec
//!
//! Every scalar encodes to a self-describing, prefix-free byte run whose
//! lexicographic order matches the value order within one type:
//!
//! ```text
//! Bool    0x01 | 0x00 / 0x01
//! Int     0x02 | i64 big-endian with the sign bit flipped
//! UInt    0x03 | u64 big-endian
//! Float   0x04 | IEEE bits, negatives inverted, positives sign-flipped
//! String  0x05 | utf-8, 0x00 escaped as 0x00 0xFF, terminated by 0x00 0x00
//! Bytes   0x06 | same escaping as String
//! ```
//!
//! Prefix-freeness lets encoded values be concatenated (composite index
//! values, set-item and map-key reference segments) and still split and sort
//! correctly. Inverting every byte of a prefix-free run reverses its order,
//! which is what reversed index components rely on.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{CoreError, Result};
use crate::value::Value;

const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_UINT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// Encode a scalar value, appending to `out`
///
/// # Errors
///
/// Returns a codec error for non-scalar values.
pub fn encode_scalar_into(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*v));
        }
        Value::Int(v) => {
            out.push(TAG_INT);
            let mut buf = [0u8; 8];
            BigEndian::write_u64(&mut buf, (*v as u64) ^ (1 << 63));
            out.extend_from_slice(&buf);
        }
        Value::UInt(v) => {
            out.push(TAG_UINT);
            let mut buf = [0u8; 8];
            BigEndian::write_u64(&mut buf, *v);
            out.extend_from_slice(&buf);
        }
        Value::Float(v) => {
            out.push(TAG_FLOAT);
            let bits = v.to_bits();
            let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
            let mut buf = [0u8; 8];
            BigEndian::write_u64(&mut buf, ordered);
            out.extend_from_slice(&buf);
        }
        Value::String(v) => {
            out.push(TAG_STRING);
            write_escaped(v.as_bytes(), out);
        }
        Value::Bytes(v) => {
            out.push(TAG_BYTES);
            write_escaped(v, out);
        }
        other => {
            return Err(CoreError::TypeMismatch {
                expected: "scalar".to_string(),
                actual: other.type_name().to_string(),
            })
        }
    }
    Ok(())
}

/// Encode a scalar value into a fresh buffer
pub fn encode_scalar(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(10);
    encode_scalar_into(value, &mut out)?;
    Ok(out)
}

/// Decode one scalar from the front of `bytes`
///
/// Returns the value and the number of bytes consumed.
pub fn decode_scalar(bytes: &[u8]) -> Result<(Value, usize)> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| CoreError::codec("empty scalar encoding"))?;
    match tag {
        TAG_BOOL => {
            let b = *rest
                .first()
                .ok_or_else(|| CoreError::codec("truncated bool"))?;
            Ok((Value::Bool(b != 0), 2))
        }
        TAG_INT => {
            let raw = read_u64(rest)?;
            Ok((Value::Int((raw ^ (1 << 63)) as i64), 9))
        }
        TAG_UINT => Ok((Value::UInt(read_u64(rest)?), 9)),
        TAG_FLOAT => {
            let ordered = read_u64(rest)?;
            let bits = if ordered >> 63 == 1 {
                ordered ^ (1 << 63)
            } else {
                !ordered
            };
            Ok((Value::Float(f64::from_bits(bits)), 9))
        }
        TAG_STRING => {
            let (raw, used) = read_escaped(rest)?;
            let s = String::from_utf8(raw).map_err(|e| CoreError::codec(e.to_string()))?;
            Ok((Value::String(s), used + 1))
        }
        TAG_BYTES => {
            let (raw, used) = read_escaped(rest)?;
            Ok((Value::Bytes(raw), used + 1))
        }
        other => Err(CoreError::codec(format!("unknown scalar tag {:#04x}", other))),
    }
}

/// Decode a buffer that holds exactly one scalar
pub fn decode_scalar_exact(bytes: &[u8]) -> Result<Value> {
    let (value, used) = decode_scalar(bytes)?;
    if used != bytes.len() {
        return Err(CoreError::codec(format!(
            "{} trailing bytes after scalar",
            bytes.len() - used
        )));
    }
    Ok(value)
}

/// Size in bytes of the encoding, when it is the same for every value of the type
pub fn fixed_width(value: &Value) -> Option<usize> {
    match value {
        Value::Bool(_) => Some(2),
        Value::Int(_) | Value::UInt(_) | Value::Float(_) => Some(9),
        _ => None,
    }
}

/// Invert every byte, reversing the order of prefix-free encodings
pub fn invert(bytes: &mut [u8]) {
    for b in bytes.iter_mut() {
        *b = !*b;
    }
}

fn read_u64(bytes: &[u8]) -> Result<u64> {
    if bytes.len() < 8 {
        return Err(CoreError::codec("truncated 8-byte number"));
    }
    Ok(BigEndian::read_u64(&bytes[..8]))
}

fn write_escaped(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        if b == ESCAPE {
            out.push(ESCAPE);
            out.push(ESCAPED_ZERO);
        } else {
            out.push(b);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

fn read_escaped(bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut raw = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == ESCAPE {
            match bytes.get(i + 1) {
                Some(&TERMINATOR) => return Ok((raw, i + 2)),
                Some(&ESCAPED_ZERO) => {
                    raw.push(0);
                    i += 2;
                }
                _ => return Err(CoreError::codec("invalid escape sequence")),
            }
        } else {
            raw.push(b);
            i += 1;
        }
    }
    Err(CoreError::codec("unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc(v: Value) -> Vec<u8> {
        encode_scalar(&v).unwrap()
    }

    #[test]
    fn test_decode_consumes_exact_length() {
        let mut buf = enc(Value::from("a\0b"));
        let first_len = buf.len();
        buf.extend(enc(Value::Int(-4)));

        let (first, used) = decode_scalar(&buf).unwrap();
        assert_eq!(first, Value::from("a\0b"));
        assert_eq!(used, first_len);
        let (second, _) = decode_scalar(&buf[used..]).unwrap();
        assert_eq!(second, Value::Int(-4));
    }

    #[test]
    fn test_non_scalar_rejected() {
        assert!(encode_scalar(&Value::List(vec![])).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut buf = enc(Value::UInt(3));
        buf.push(0);
        assert!(decode_scalar_exact(&buf).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        assert!(decode_scalar(&[0x7F, 1, 2]).is_err());
    }

    #[test]
    fn test_inverted_order() {
        let mut a = enc(Value::from("apple"));
        let mut b = enc(Value::from("apples"));
        assert!(a < b);
        invert(&mut a);
        invert(&mut b);
        assert!(a > b);
    }

    proptest! {
        #[test]
        fn prop_int_order_preserved(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(a.cmp(&b), enc(Value::Int(a)).cmp(&enc(Value::Int(b))));
        }

        #[test]
        fn prop_float_order_preserved(a in -1e12f64..1e12, b in -1e12f64..1e12) {
            prop_assert_eq!(
                a.total_cmp(&b),
                enc(Value::Float(a)).cmp(&enc(Value::Float(b)))
            );
        }

        #[test]
        fn prop_string_order_preserved(a in ".{0,12}", b in ".{0,12}") {
            prop_assert_eq!(
                a.as_bytes().cmp(b.as_bytes()),
                enc(Value::from(a.as_str())).cmp(&enc(Value::from(b.as_str())))
            );
        }

        #[test]
        fn prop_bytes_decode_exact(raw in proptest::collection::vec(any::<u8>(), 0..32)) {
            let v = Value::Bytes(raw);
            prop_assert_eq!(decode_scalar_exact(&enc(v.clone())).unwrap(), v);
        }
    }
}
