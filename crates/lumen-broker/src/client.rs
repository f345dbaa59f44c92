//! Per-connection state shared between a client's reader thread and the
//! frame-loop publish step.

use std::collections::BTreeSet;
use std::io::Write;
use std::net::TcpStream;

/// A connected subscriber: its writable socket half plus the set of event
/// names it currently wants pushed to it.
pub struct Client {
    pub stream: TcpStream,
    pub subscriptions: BTreeSet<String>,
}

impl Client {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            subscriptions: BTreeSet::new(),
        }
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.subscriptions.contains(event)
    }

    /// Write one already-newline-terminated line. Errors (a dead peer) are
    /// left to the caller, which drops the client from the table.
    pub fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stream.write_all(line.as_bytes())
    }
}
