#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]

//! A UDS diagnostic protocol engine for low-cost ELM327-class OBD-II
//! adapters, driving reads against Renault ZOE (and similar Renault EV
//! platform) ECUs.
//!
//! The crate is organized around the pipeline a single [`engine::Engine`]
//! drives end to end:
//!
//! * [`transport`] — a dumb, line-oriented byte pipe to the adapter.
//! * [`hardware`] — concrete transports: TCP (WiFi ELM327), serial (USB/BT
//!   ELM327) and an in-memory mock for tests.
//! * [`hexline`] — tolerant extraction of a flat byte stream from adapter
//!   response text.
//! * [`adapter`] — the ELM327 command state machine: init sequence, ECU
//!   header/filter selection, session bring-up, TesterPresent cadence.
//! * [`isotp`] — ISO-TP (ISO 15765-2) multi-frame reassembly with one
//!   flow-control retry.
//! * [`uds`] — the UDS request layer (services 0x21 / 0x22), negative
//!   response handling, the short-lived 0x21 response cache.
//! * [`database`] — the in-memory field/ECU/frame catalog.
//! * [`decode`] — big-endian bit extraction and affine scaling.
//! * [`engine`] — the public façade, `read_field` and friends.

pub mod adapter;
pub mod database;
pub mod decode;
pub mod engine;
pub mod hardware;
pub mod hexline;
pub mod isotp;
pub mod transport;
pub mod uds;

use transport::TransportError;

/// Result type returned by the engine façade.
pub type DiagResult<T> = Result<T, DiagError>;

/// Top level error surfaced by structural failures of the engine.
///
/// Per-request conditions that are expected in normal operation (a
/// negative response, a sleeping bus, an incomplete ISO-TP reassembly)
/// are not represented here: they are surfaced as `None` from
/// [`engine::Engine::read_field`] together with [`engine::StatusHint`].
#[derive(Debug)]
pub enum DiagError {
    /// Underlying transport failure (I/O error, closed connection, timeout
    /// with nothing read).
    Transport(TransportError),
    /// The adapter did not acknowledge the initialization sequence.
    Initialization(String),
    /// The requested SID is not present in the database, or lacks a
    /// request descriptor.
    FieldUnknown(String),
    /// The field's request descriptor names a service other than 0x21 or
    /// 0x22.
    UnsupportedRequest(u8),
}

impl std::fmt::Display for DiagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagError::Transport(e) => write!(f, "transport error: {e}"),
            DiagError::Initialization(s) => write!(f, "adapter initialization failed: {s}"),
            DiagError::FieldUnknown(sid) => write!(f, "unknown diagnostic field SID: {sid}"),
            DiagError::UnsupportedRequest(service) => {
                write!(f, "unsupported request service 0x{service:02X}")
            }
        }
    }
}

impl std::error::Error for DiagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiagError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for DiagError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}
