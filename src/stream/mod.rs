// src/stream/mod.rs

//! Output stream handling.
//!
//! - [`multiplexer`] runs one reader per stream, forwards every line to a
//!   [`Sink`], publishes a single readiness event and collects failure lines.
//! - [`signal`] holds the regex-based line predicates.
//! - [`sink`] defines the line consumer trait and two implementations.

use std::fmt;

pub mod multiplexer;
pub mod signal;
pub mod sink;

pub use multiplexer::{Attachment, DrainSummary, ReadyEvent, StreamMultiplexer};
pub use signal::{FailureSignal, LineSignal, ReadinessSignal};
pub use sink::{Sink, StdioSink, TracingSink};

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}
