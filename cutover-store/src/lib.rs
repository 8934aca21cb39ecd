#![forbid(unsafe_code)]

mod engine;
mod entity;
mod error;
mod record;
mod store;

pub use cutover_query::{Cursor, CursorOrder, CursorType, Edge, PageInfo, QueryArgs, QueryResult};
pub use engine::*;
pub use entity::*;
pub use error::*;
pub use record::*;
pub use store::*;
