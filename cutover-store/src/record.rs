use cutover_query::{Cursor, QueryError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{cmp::Ordering, fmt};

use crate::error::Result;

/// Location of a record: the table it lives in, the partition that owns it and
/// its position inside that partition.
///
/// Single-row tables leave `clustering` empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub table: String,
    pub partition: String,
    pub clustering: String,
}

impl RecordKey {
    pub fn new(table: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            partition: partition.into(),
            clustering: String::default(),
        }
    }

    pub fn clustering(mut self, value: impl Into<String>) -> Self {
        self.clustering = value.into();
        self
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clustering.is_empty() {
            write!(f, "{}/{}", self.table, self.partition)
        } else {
            write!(f, "{}/{}/{}", self.table, self.partition, self.clustering)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub data: Value,
}

impl Record {
    pub fn new(key: RecordKey) -> Self {
        Self {
            key,
            data: Value::Null,
        }
    }

    pub fn data<D: Serialize>(mut self, value: D) -> Result<Self> {
        self.data = serde_json::to_value(&value)?;

        Ok(self)
    }

    pub fn to_data<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

impl Eq for Record {}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.key.partition, &self.key.clustering)
            .cmp(&(&other.key.partition, &other.key.clustering))
    }
}

impl Cursor for Record {
    fn keys() -> Vec<&'static str> {
        vec!["partition", "clustering"]
    }

    fn serialize(&self) -> Vec<String> {
        vec![
            Self::serialize_str(&self.key.partition),
            Self::serialize_str(&self.key.clustering),
        ]
    }

    fn deserialize(values: Vec<&str>) -> std::result::Result<Self, QueryError> {
        let mut values = values.iter();
        let partition = Self::deserialize_as_str("partition", values.next())?;
        let clustering = Self::deserialize_as_str("clustering", values.next())?;

        Ok(Record::new(RecordKey {
            partition,
            clustering,
            ..Default::default()
        }))
    }
}
