// src/stream/sink.rs

use std::fmt::Debug;
use std::io::Write;

use tracing::info;

use super::StreamKind;

/// Append-only consumer of output lines.
///
/// Lines of one stream arrive in order; no ordering holds across streams.
pub trait Sink: Send + Sync + Debug {
    fn line(&self, stream: StreamKind, line: &str);
}

/// Forwards every line to `tracing` under the `hostrun::output` target.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn line(&self, stream: StreamKind, line: &str) {
        info!(target: "hostrun::output", stream = %stream, "{}", line);
    }
}

/// Echoes lines to the terminal: stdout lines to stdout, stderr lines to
/// stderr.
#[derive(Debug, Clone, Default)]
pub struct StdioSink;

impl Sink for StdioSink {
    fn line(&self, stream: StreamKind, line: &str) {
        // Write errors (closed terminal) are not worth failing a run over.
        let _ = match stream {
            StreamKind::Stdout => writeln!(std::io::stdout().lock(), "{line}"),
            StreamKind::Stderr => writeln!(std::io::stderr().lock(), "{line}"),
        };
    }
}
