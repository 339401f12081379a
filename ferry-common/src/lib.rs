//! Data model shared by both producers (`DataIterator`, `BinlogStreamer`)
//! and the built-in `WriteTarget` listener: table schemas, row values, and
//! the logical DML events that flow between them.

pub mod event;
pub mod listener;
pub mod mysql_value;
pub mod schema;
pub mod throttle;
pub mod value;

pub use event::DMLEvent;
pub use listener::{BatchListener, DoneListener};
pub use schema::{ColumnSpec, PrimaryKey, SchemaCache, SqlType, TableIdentity, TableSchema};
pub use throttle::Throttle;
pub use value::{DfValue, RowValue};
