//! Module for the byte transport to the adapter.
//!
//! The transport is a dumb, line-oriented pipe: it knows nothing about
//! ELM327 AT commands, UDS, or ISO-TP. It sends lines terminated by `\r`
//! and reads until the adapter's `>` prompt byte appears or a timeout
//! elapses. See [`crate::hardware`] for concrete implementations.

use std::time::Duration;

/// Transport result
pub type TransportResult<T> = Result<T, TransportError>;

/// Error produced by the byte transport to the adapter
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying I/O error
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    /// The transport timed out waiting for the `>` prompt with nothing
    /// read
    #[error("timed out waiting for adapter prompt")]
    Timeout,
    /// The connection has been closed
    #[error("transport is closed")]
    Closed,
}

/// A bidirectional, line-oriented text channel to an ELM327-class adapter.
///
/// Implementors must not interpret the content of what they send or
/// receive; they are a framed pipe. See [`crate::hardware::tcp`],
/// [`crate::hardware::serial`] and [`crate::hardware::mock`] for the
/// variants this crate ships.
pub trait Transport: Send {
    /// Appends a carriage return to `line`, transmits it, then blocks for
    /// `post_send_delay` to accommodate adapter latency.
    fn send(&mut self, line: &str, post_send_delay: Duration) -> TransportResult<()>;

    /// Reads chunks until a `>` prompt byte appears or `timeout` elapses.
    /// Returns the accumulated text, lossy-decoded as ASCII.
    fn read_until_prompt(&mut self, timeout: Duration) -> TransportResult<String>;

    /// Closes the underlying connection. Further operations must fail
    /// with [`TransportError::Closed`].
    fn close(&mut self) -> TransportResult<()>;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<dyn Transport>")
    }
}
