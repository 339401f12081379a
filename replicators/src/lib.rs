//! The `BinlogStreamer`: follows the source's binary log from a captured
//! starting [`ChangePosition`], decoding row events against the
//! [`ferry_common::SchemaCache`] into [`ferry_common::DMLEvent`] batches.

pub mod mysql_connector;
pub mod recorded;

pub use mysql_connector::{BinlogStreamer, FlushHandle};
