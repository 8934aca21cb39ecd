use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::Result,
    record::{Record, RecordKey},
};

/// A document stored whole under its id, one row per entity.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    fn table<'a>() -> &'a str;
    fn id(&self) -> String;

    fn key<I: Into<String>>(id: I) -> RecordKey {
        RecordKey::new(Self::table(), id)
    }

    fn to_record(&self) -> Result<Record> {
        Record::new(Self::key(self.id())).data(self)
    }

    fn from_record(record: &Record) -> Result<Self> {
        record.to_data()
    }
}
