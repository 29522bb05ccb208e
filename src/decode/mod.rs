//! Column codecs: conversion of PostgreSQL wire values into Rust field types.
//!
//! Every type a model field can have implements [`PgDecode`] with one function
//! per wire format. Binary payloads follow PostgreSQL's `send`/`recv`
//! representation (decoded with `postgres-protocol`); text payloads follow the
//! server's output functions.
//!
//! Null never reaches a codec. The field keeps its [`Default`] value, which
//! for `Option<T>` is `None`.
//!
//! # Example
//!
//! ```rust
//! use pg_capture_consumer::decode::PgDecode;
//!
//! assert_eq!(i32::decode_text("42").unwrap(), 42);
//! assert_eq!(i32::decode_binary(&42i32.to_be_bytes()).unwrap(), 42);
//! assert_eq!(Vec::<u8>::decode_text("\\xdeadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
//! ```

mod array;
mod temporal;


use postgres_protocol::types;

use crate::error::BoxError;

pub(crate) use temporal::micros_to_datetime;
#[cfg(test)]
pub(crate) use temporal::{date_to_days, datetime_to_micros};

/// A value that can be decoded from either PostgreSQL wire format.
pub trait PgDecode: Default + Send + Sized + 'static {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError>;

    fn decode_text(raw: &str) -> Result<Self, BoxError>;
}

impl PgDecode for bool {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        types::bool_from_sql(raw)
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        match raw.trim() {
            "t" | "true" => Ok(true),
            "f" | "false" => Ok(false),
            other => Err(format!("invalid boolean: {:?}", other).into()),
        }
    }
}

macro_rules! impl_integer {
    ($ty:ty, $from_sql:path) => {
        impl PgDecode for $ty {
            fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
                $from_sql(raw)
            }

            fn decode_text(raw: &str) -> Result<Self, BoxError> {
                Ok(raw.trim().parse::<$ty>()?)
            }
        }
    };
}

impl_integer!(i16, types::int2_from_sql);
impl_integer!(i32, types::int4_from_sql);
impl_integer!(i64, types::int8_from_sql);

macro_rules! impl_float {
    ($ty:ident, $from_sql:path) => {
        impl PgDecode for $ty {
            fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
                $from_sql(raw)
            }

            fn decode_text(raw: &str) -> Result<Self, BoxError> {
                match raw.trim() {
                    "NaN" => Ok($ty::NAN),
                    "Infinity" => Ok($ty::INFINITY),
                    "-Infinity" => Ok($ty::NEG_INFINITY),
                    other => Ok(other.parse::<$ty>()?),
                }
            }
        }
    };
}

impl_float!(f32, types::float4_from_sql);
impl_float!(f64, types::float8_from_sql);

impl PgDecode for String {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        types::text_from_sql(raw).map(str::to_owned)
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        Ok(raw.to_owned())
    }
}

/// `bytea`. Text input accepts both the `hex` and the legacy `escape` output
/// formats.
impl PgDecode for Vec<u8> {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        Ok(types::bytea_from_sql(raw).to_vec())
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        match raw.strip_prefix("\\x") {
            Some(hex) => decode_hex(hex),
            None => decode_bytea_escape(raw),
        }
    }
}

/// `json` and `jsonb`. Binary `jsonb` starts with the version byte `1`;
/// binary `json` is the stored text as-is, leading whitespace included.
impl PgDecode for serde_json::Value {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        match raw.split_first() {
            Some((&1, document)) => Ok(serde_json::from_slice(document)?),
            _ => Ok(serde_json::from_slice(raw)?),
        }
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl<T: PgDecode> PgDecode for Option<T> {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        T::decode_binary(raw).map(Some)
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        T::decode_text(raw).map(Some)
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, BoxError> {
    let hex = hex.as_bytes();
    if hex.len() % 2 != 0 {
        return Err("odd number of digits in hex bytea".into());
    }

    hex.chunks(2)
        .map(|pair| -> Result<u8, BoxError> {
            Ok((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?)
        })
        .collect()
}

fn hex_digit(c: u8) -> Result<u8, BoxError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(format!("invalid hex digit {:?}", c as char).into()),
    }
}

fn decode_bytea_escape(raw: &str) -> Result<Vec<u8>, BoxError> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        match bytes.get(i + 1..i + 4) {
            Some(octal) if octal.iter().all(|d| (b'0'..=b'7').contains(d)) => {
                let value = octal
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + (d - b'0') as u16);
                out.push(u8::try_from(value)?);
                i += 4;
            }
            _ if bytes.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            _ => return Err("invalid escape sequence in bytea".into()),
        }
    }

    Ok(out)
}
