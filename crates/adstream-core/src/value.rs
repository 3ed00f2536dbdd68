use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;

use crate::error::AdError;

/// One attribute value as delivered by the transport: the parsed textual
/// form next to the raw bytes. ldap3 splits entry values into `attrs`
/// (valid UTF-8) and `bin_attrs`; both are folded into this shape so
/// decoders always see both representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    pub text: String,
    pub bytes: Vec<u8>,
}

impl RawValue {
    pub fn from_text(text: String) -> Self {
        Self {
            bytes: text.as_bytes().to_vec(),
            text,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            bytes,
        }
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

/// A normalized search result: requested attribute names mapped to
/// decoded values, shaped by the schema's cardinality.
pub type AdObject = BTreeMap<String, AttributeValue>;

/// Either a scalar (single-valued attribute) or an ordered list
/// (multi-valued attribute).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(Value),
    Multiple(Vec<Value>),
}

/// Decoders assignable to attributes during schema bootstrap. Each one is
/// a pure function of the attribute name and a single raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Boolean,
    Int32,
    NtFileTime,
    GeneralizedTime,
    Guid,
    Sid,
    OctetString,
}

impl Decoder {
    pub fn decode(self, attribute: &str, value: &RawValue) -> Result<Value, AdError> {
        match self {
            Decoder::Boolean => decode_boolean(attribute, value),
            Decoder::Int32 => decode_int32(attribute, value),
            Decoder::NtFileTime => decode_filetime(attribute, value),
            Decoder::GeneralizedTime => decode_generalized_time(attribute, value),
            Decoder::Guid => decode_guid(attribute, value),
            Decoder::Sid => decode_sid(attribute, value),
            Decoder::OctetString => Ok(decode_octet_string(value)),
        }
    }
}

fn decode_err(attribute: &str, value: &RawValue, reason: impl Into<String>) -> AdError {
    AdError::Decode {
        attribute: attribute.to_string(),
        value: value.text.clone(),
        reason: reason.into(),
    }
}

fn decode_boolean(attribute: &str, value: &RawValue) -> Result<Value, AdError> {
    match value.text.as_str() {
        "TRUE" => Ok(Value::Bool(true)),
        "FALSE" => Ok(Value::Bool(false)),
        _ => Err(decode_err(
            attribute,
            value,
            "boolean values are literally TRUE or FALSE",
        )),
    }
}

fn decode_int32(attribute: &str, value: &RawValue) -> Result<Value, AdError> {
    if value.text.is_empty() {
        return Ok(Value::Null);
    }
    value
        .text
        .parse::<i32>()
        .map(|n| Value::Int(n.into()))
        .map_err(|e| decode_err(attribute, value, format!("not a 32-bit integer: {e}")))
}

/// Milliseconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET_MS: i64 = 11_644_473_600_000;
/// AD stores "never" as i64::MAX in filetime attributes; 0 means unset.
const FILETIME_NEVER: u64 = i64::MAX as u64;

/// A count of 100-nanosecond ticks since 1601-01-01 UTC, formatted as a
/// UTC `YYYY-MM-DD HH:mm:ss` timestamp. The arithmetic is exact integer
/// division, so even the largest tick counts keep full precision; the
/// sentinels 0 and 9223372036854775807 decode to null.
fn decode_filetime(attribute: &str, value: &RawValue) -> Result<Value, AdError> {
    let ticks: u64 = value
        .text
        .parse()
        .map_err(|e| decode_err(attribute, value, format!("not a filetime tick count: {e}")))?;
    if ticks == 0 || ticks == FILETIME_NEVER {
        return Ok(Value::Null);
    }
    let millis = (ticks / 10_000) as i64 - FILETIME_EPOCH_OFFSET_MS;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| decode_err(attribute, value, "tick count out of range"))?;
    Ok(Value::Text(timestamp.format("%Y-%m-%d %H:%M:%S").to_string()))
}

fn decode_generalized_time(attribute: &str, value: &RawValue) -> Result<Value, AdError> {
    let text = value.text.as_str();
    if text.len() < 14 || !text.as_bytes()[..14].iter().all(u8::is_ascii_digit) {
        return Err(decode_err(
            attribute,
            value,
            "expected a YYYYMMDDhhmmss prefix",
        ));
    }
    let timestamp = NaiveDateTime::parse_from_str(&text[..14], "%Y%m%d%H%M%S")
        .map_err(|e| decode_err(attribute, value, format!("bad generalized time: {e}")))?;
    Ok(Value::Text(timestamp.format("%Y-%m-%d %H:%M:%S").to_string()))
}

/// The order AD stores GUID bytes in: the first three groups are
/// little-endian, the rest are sequential.
const GUID_BYTE_ORDER: [usize; 16] = [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15];

fn decode_guid(attribute: &str, value: &RawValue) -> Result<Value, AdError> {
    if value.bytes.len() != 16 {
        return Err(decode_err(
            attribute,
            value,
            format!("a GUID is 16 bytes, got {}", value.bytes.len()),
        ));
    }
    let mut out = String::with_capacity(38);
    out.push('{');
    for (position, &index) in GUID_BYTE_ORDER.iter().enumerate() {
        if matches!(position, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{:02X}", value.bytes[index]));
    }
    out.push('}');
    Ok(Value::Text(out))
}

fn decode_sid(attribute: &str, value: &RawValue) -> Result<Value, AdError> {
    let bytes = &value.bytes;
    if bytes.len() < 8 {
        return Err(decode_err(attribute, value, "SID shorter than its header"));
    }
    let revision = bytes[0];
    if revision != 1 {
        return Err(decode_err(
            attribute,
            value,
            format!("unsupported SID revision {revision}"),
        ));
    }
    let count = bytes[1] as usize;
    if bytes.len() != 8 + 4 * count {
        return Err(decode_err(
            attribute,
            value,
            format!(
                "SID length {} does not match {count} sub-authorities",
                bytes.len()
            ),
        ));
    }
    let mut authority: u64 = 0;
    for &byte in &bytes[2..8] {
        authority = (authority << 8) | u64::from(byte);
    }
    let mut out = format!("S-{revision}-{authority}");
    for i in 0..count {
        let offset = 8 + 4 * i;
        let sub = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        out.push('-');
        out.push_str(&sub.to_string());
    }
    Ok(Value::Text(out))
}

fn decode_octet_string(value: &RawValue) -> Value {
    let mut out = String::with_capacity(value.bytes.len() * 3);
    for (i, byte) in value.bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    Value::Text(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RawValue {
        RawValue::from_text(s.to_string())
    }

    fn bin(b: &[u8]) -> RawValue {
        RawValue::from_bytes(b.to_vec())
    }

    #[test]
    fn test_boolean() {
        assert_eq!(
            Decoder::Boolean.decode("x-flag", &text("TRUE")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Decoder::Boolean.decode("x-flag", &text("FALSE")).unwrap(),
            Value::Bool(false)
        );
        assert!(Decoder::Boolean.decode("x-flag", &text("true")).is_err());
        assert!(Decoder::Boolean.decode("x-flag", &text("")).is_err());
    }

    #[test]
    fn test_int32() {
        assert_eq!(
            Decoder::Int32.decode("uac", &text("66048")).unwrap(),
            Value::Int(66048)
        );
        assert_eq!(
            Decoder::Int32.decode("uac", &text("-5")).unwrap(),
            Value::Int(-5)
        );
        assert_eq!(Decoder::Int32.decode("uac", &text("")).unwrap(), Value::Null);
        assert!(Decoder::Int32.decode("uac", &text("12x")).is_err());
        assert!(Decoder::Int32.decode("uac", &text("4294967296")).is_err());
    }

    #[test]
    fn test_filetime_epoch() {
        // 1601→1970 offset in ticks lands exactly on the Unix epoch
        let unix_epoch = (11_644_473_600_000u64 * 10_000).to_string();
        assert_eq!(
            Decoder::NtFileTime.decode("lastLogonTimestamp", &text(&unix_epoch)).unwrap(),
            Value::Text("1970-01-01 00:00:00".to_string())
        );
    }

    #[test]
    fn test_filetime_one_day_later() {
        let ticks = (11_644_473_600_000u64 + 86_400_000) * 10_000;
        assert_eq!(
            Decoder::NtFileTime
                .decode("accountExpires", &text(&ticks.to_string()))
                .unwrap(),
            Value::Text("1970-01-02 00:00:00".to_string())
        );
    }

    #[test]
    fn test_filetime_sentinels() {
        assert_eq!(
            Decoder::NtFileTime
                .decode("accountExpires", &text("9223372036854775807"))
                .unwrap(),
            Value::Null
        );
        assert_eq!(
            Decoder::NtFileTime.decode("accountExpires", &text("0")).unwrap(),
            Value::Null
        );
        assert!(Decoder::NtFileTime.decode("accountExpires", &text("nope")).is_err());
    }

    #[test]
    fn test_generalized_time() {
        assert_eq!(
            Decoder::GeneralizedTime
                .decode("whenCreated", &text("20240131235959.0Z"))
                .unwrap(),
            Value::Text("2024-01-31 23:59:59".to_string())
        );
        assert_eq!(
            Decoder::GeneralizedTime
                .decode("whenCreated", &text("19981231120000Z"))
                .unwrap(),
            Value::Text("1998-12-31 12:00:00".to_string())
        );
        assert!(Decoder::GeneralizedTime.decode("whenCreated", &text("2024")).is_err());
        assert!(Decoder::GeneralizedTime
            .decode("whenCreated", &text("20241331000000Z"))
            .is_err());
    }

    #[test]
    fn test_guid() {
        let bytes: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            Decoder::Guid.decode("objectGUID", &bin(&bytes)).unwrap(),
            Value::Text("{03020100-0504-0706-0809-0A0B0C0D0E0F}".to_string())
        );
        assert!(Decoder::Guid.decode("objectGUID", &bin(&bytes[..15])).is_err());
    }

    #[test]
    fn test_sid() {
        // S-1-5-21-1000: revision 1, two sub-authorities, authority 5
        let bytes = [
            1, 2, 0, 0, 0, 0, 0, 5, //
            21, 0, 0, 0, //
            0xE8, 0x03, 0, 0,
        ];
        assert_eq!(
            Decoder::Sid.decode("objectSid", &bin(&bytes)).unwrap(),
            Value::Text("S-1-5-21-1000".to_string())
        );
    }

    #[test]
    fn test_sid_rejects_bad_shapes() {
        let mut bad_revision = vec![2, 0, 0, 0, 0, 0, 0, 5];
        assert!(Decoder::Sid.decode("objectSid", &bin(&bad_revision)).is_err());
        bad_revision[0] = 1;
        bad_revision[1] = 3; // claims 3 sub-authorities but carries none
        assert!(Decoder::Sid.decode("objectSid", &bin(&bad_revision)).is_err());
        assert!(Decoder::Sid.decode("objectSid", &bin(&[1])).is_err());
    }

    #[test]
    fn test_octet_string() {
        assert_eq!(
            Decoder::OctetString.decode("auditingPolicy", &bin(&[0xDE, 0xAD, 0x01])).unwrap(),
            Value::Text("DE AD 01".to_string())
        );
        assert_eq!(
            Decoder::OctetString.decode("auditingPolicy", &bin(&[])).unwrap(),
            Value::Text(String::new())
        );
    }

    #[test]
    fn test_raw_value_forms_agree() {
        let from_text = RawValue::from_text("hello".to_string());
        let from_bytes = RawValue::from_bytes(b"hello".to_vec());
        assert_eq!(from_text, from_bytes);
    }

    #[test]
    fn test_value_json_shapes() {
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Value::Int(17)).unwrap(), "17");
        assert_eq!(
            serde_json::to_string(&AttributeValue::Multiple(vec![Value::Int(1), Value::Null]))
                .unwrap(),
            "[1,null]"
        );
    }
}
