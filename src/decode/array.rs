//! One-dimensional arrays of scalar codecs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use fallible_iterator::FallibleIterator;
use postgres_protocol::types;

use super::PgDecode;
use crate::error::BoxError;

fn decode_binary_elements<T: PgDecode>(raw: &[u8]) -> Result<Vec<Option<T>>, BoxError> {
    let array = types::array_from_sql(raw)?;
    if array.dimensions().count()? > 1 {
        return Err("multi-dimensional arrays are not supported".into());
    }

    array
        .values()
        .map(|value| match value {
            Some(raw) => T::decode_binary(raw).map(Some),
            None => Ok(None),
        })
        .collect()
}

fn decode_text_elements<T: PgDecode>(raw: &str) -> Result<Vec<Option<T>>, BoxError> {
    parse_text_array(raw)?
        .into_iter()
        .map(|element| element.map(|text| T::decode_text(&text)).transpose())
        .collect()
}

/// Splits an array literal such as `{1,"a b",NULL}` into its elements.
///
/// Accepts an optional `[lower:upper]=` bounds prefix. Unquoted `NULL` is a
/// null element; quoted elements honour backslash escapes.
fn parse_text_array(text: &str) -> Result<Vec<Option<String>>, BoxError> {
    let body = match (text.starts_with('['), text.find('=')) {
        (true, Some(eq)) => &text[eq + 1..],
        _ => text,
    };
    let inner = body
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("malformed array literal: {:?}", text))?;

    let mut elements = Vec::new();
    if inner.trim().is_empty() {
        return Ok(elements);
    }

    let mut chars = inner.chars().peekable();
    loop {
        match chars.peek() {
            Some('{') => return Err("multi-dimensional arrays are not supported".into()),
            Some('"') => {
                chars.next();
                let mut element = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => element.push(chars.next().ok_or("unterminated escape")?),
                        Some('"') => break,
                        Some(c) => element.push(c),
                        None => return Err("unterminated quoted array element".into()),
                    }
                }
                elements.push(Some(element));
            }
            _ => {
                let mut element = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    if c == '{' || c == '"' {
                        return Err(format!("unexpected {:?} in array element", c).into());
                    }
                    element.push(c);
                    chars.next();
                }

                let element = element.trim();
                if element.is_empty() {
                    return Err("empty array element".into());
                }
                if element.eq_ignore_ascii_case("NULL") {
                    elements.push(None);
                } else {
                    elements.push(Some(element.to_string()));
                }
            }
        }

        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(c) => {
                return Err(format!("unexpected {:?} after array element", c).into());
            }
        }
    }

    Ok(elements)
}

macro_rules! impl_array {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PgDecode for Vec<$ty> {
                fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
                    non_null(decode_binary_elements::<$ty>(raw)?)
                }

                fn decode_text(raw: &str) -> Result<Self, BoxError> {
                    non_null(decode_text_elements::<$ty>(raw)?)
                }
            }

            impl PgDecode for Vec<Option<$ty>> {
                fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
                    decode_binary_elements::<$ty>(raw)
                }

                fn decode_text(raw: &str) -> Result<Self, BoxError> {
                    decode_text_elements::<$ty>(raw)
                }
            }
        )*
    };
}

impl_array!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    NaiveDate,
    NaiveDateTime,
    DateTime<Utc>,
);

/// Arrays of a non-optional element type reject null elements rather than
/// inventing a value for them.
fn non_null<T>(elements: Vec<Option<T>>) -> Result<Vec<T>, BoxError> {
    elements
        .into_iter()
        .enumerate()
        .map(|(i, element)| {
            element.ok_or_else(|| -> BoxError {
                format!("NULL array element at index {}", i).into()
            })
        })
        .collect()
}
