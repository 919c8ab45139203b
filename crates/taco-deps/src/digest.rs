//! Deterministic fingerprints of JSON values.
//!
//! [`canonical_json`] renders a value with object keys sorted and array order
//! preserved, so semantically equal documents produce identical bytes.
//! [`digest_value`] is the base58 encoding of the SHA-256 of those bytes.
//!
//! Integral floating-point numbers render as integers: `1.0` and `1` are the
//! same Terraform output value and must digest identically.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Magnitude above which integral floats keep exponent notation.
const INTEGRAL_FLOAT_LIMIT: f64 = 1e21;

/// Renders `value` as canonical JSON text.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                out.push_str(&n.to_string());
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < INTEGRAL_FLOAT_LIMIT {
                    out.push_str(&format!("{f:.0}"));
                } else {
                    out.push_str(&n.to_string());
                }
            }
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a &str cannot fail.
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => out.push_str("\"\""),
    }
}

/// base58(SHA-256(canonical JSON)) of `value`.
pub fn digest_value(value: &Value) -> String {
    let hash = Sha256::digest(canonical_json(value).as_bytes());
    bs58::encode(hash).into_string()
}

/// Digest of any serializable value, coerced through a JSON round-trip.
pub fn digest_serializable<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(digest_value(&serde_json::to_value(value)?))
}

/// Digest of a possibly absent value. Absent digests to `""`, which no
/// present value (not even `null`) can produce.
pub fn digest_optional(value: Option<&Value>) -> String {
    value.map(digest_value).unwrap_or_default()
}
