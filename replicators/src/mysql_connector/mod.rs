mod connector;

pub use connector::{BinlogStreamer, FlushHandle};
