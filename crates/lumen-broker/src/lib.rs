//! The external network broker: newline-delimited JSON over TCP plus a UDP
//! discovery broadcast, exposing live audio features to subscribers outside
//! the frame pipeline.

mod client;
mod error;
mod protocol;
mod task;

pub use client::Client;
pub use error::BrokerError;
pub use protocol::{ERR_INVALID_JSON, ERR_INVALID_UTF8, ERR_UNKNOWN_COMMAND, apply_subscription, broadcast_line, process_line};
pub use task::BrokerTask;
