//! An in-memory scripted [`Transport`] for tests, grounded on the
//! closure-driven mock ECU pattern used by this crate's predecessors'
//! integration tests: the caller supplies a closure mapping the sent
//! line to a canned response body.

use std::time::Duration;

use crate::transport::{Transport, TransportError, TransportResult};

/// A scripted transport: every `send`d line is recorded, and the next
/// `read_until_prompt` call answers with whatever the responder closure
/// returns for that line (or [`TransportError::Timeout`] on `None`).
pub struct MockTransport<F: FnMut(&str) -> Option<String>> {
    responder: F,
    sent: Vec<String>,
    pending: Option<String>,
    closed: bool,
}

impl<F: FnMut(&str) -> Option<String>> MockTransport<F> {
    /// Builds a mock whose responses are computed by `responder`, keyed
    /// on the exact line that was sent (without the trailing `\r`).
    pub fn new(responder: F) -> Self {
        Self {
            responder,
            sent: Vec::new(),
            pending: None,
            closed: false,
        }
    }

    /// Every line sent so far, in order.
    pub fn sent_lines(&self) -> &[String] {
        &self.sent
    }
}

impl<F: FnMut(&str) -> Option<String> + Send> Transport for MockTransport<F> {
    fn send(&mut self, line: &str, post_send_delay: Duration) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent.push(line.to_string());
        self.pending = (self.responder)(line);
        std::thread::sleep(post_send_delay.min(Duration::from_millis(1)));
        Ok(())
    }

    fn read_until_prompt(&mut self, _timeout: Duration) -> TransportResult<String> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.pending.take() {
            Some(body) => Ok(format!("{body}\r>")),
            None => Err(TransportError::Timeout),
        }
    }

    fn close(&mut self) -> TransportResult<()> {
        self.closed = true;
        Ok(())
    }
}
