#![forbid(unsafe_code)]
mod cursor;
mod error;
mod query;

pub use cursor::{Cursor, CursorOrder, CursorType};
pub use error::QueryError;
pub use query::*;
