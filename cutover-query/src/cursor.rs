use base64::{
    alphabet,
    engine::{general_purpose, GeneralPurpose},
    Engine,
};
use chrono::{DateTime, Utc};
use harsh::Harsh;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::QueryError;

const TOKEN: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::PAD);
const SEPARATOR: &str = "|";

/// Opaque page token handed back to callers of a paginated read.
#[derive(Debug, PartialEq, Eq, Hash, Deserialize, Serialize, Clone)]
pub struct CursorType(pub String);

impl From<String> for CursorType {
    fn from(val: String) -> Self {
        CursorType(val)
    }
}

impl From<&str> for CursorType {
    fn from(val: &str) -> Self {
        CursorType(val.to_owned())
    }
}

impl AsRef<[u8]> for CursorType {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorOrder {
    #[default]
    Asc,
    Desc,
}

fn required<'a>(field: &str, value: Option<&&'a str>) -> Result<&'a str, QueryError> {
    value
        .copied()
        .ok_or_else(|| QueryError::MissingField(field.to_owned()))
}

fn invalid(field: &str, value: impl ToString) -> QueryError {
    QueryError::InvalidField {
        field: field.to_owned(),
        value: value.to_string(),
    }
}

/// A node that can be located again from a page token.
///
/// `serialize` must emit the values of `keys()` in order; a node rebuilt by
/// `deserialize` only needs those fields populated for comparisons to work.
pub trait Cursor: Sized {
    fn keys() -> Vec<&'static str>;
    fn serialize(&self) -> Vec<String>;
    fn deserialize(values: Vec<&str>) -> Result<Self, QueryError>;

    fn serialize_utc(value: DateTime<Utc>) -> String {
        Harsh::default().encode(&[value.timestamp_micros() as u64])
    }

    /// Free text may contain the separator, so it is wrapped in base64.
    fn serialize_str(value: &str) -> String {
        TOKEN.encode(value)
    }

    fn deserialize_as<D: FromStr>(field: &str, value: Option<&&str>) -> Result<D, QueryError> {
        let value = required(field, value)?;

        value.parse().map_err(|_| invalid(field, value))
    }

    fn deserialize_as_str(field: &str, value: Option<&&str>) -> Result<String, QueryError> {
        let bytes = TOKEN.decode(required(field, value)?)?;

        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    fn deserialize_as_utc(field: &str, value: Option<&&str>) -> Result<DateTime<Utc>, QueryError> {
        let micros = Harsh::default()
            .decode(required(field, value)?)?
            .first()
            .copied()
            .ok_or_else(|| QueryError::MissingField(field.to_owned()))?;

        DateTime::from_timestamp_micros(micros as i64).ok_or_else(|| invalid(field, micros))
    }

    fn to_cursor(&self) -> CursorType {
        let joined = self.serialize().join(SEPARATOR);

        CursorType(TOKEN.encode(joined))
    }

    fn from_cursor(cursor: &CursorType) -> Result<Self, QueryError> {
        let bytes = TOKEN.decode(cursor)?;
        let joined = std::str::from_utf8(&bytes)?;

        Self::deserialize(joined.split(SEPARATOR).collect())
    }
}
