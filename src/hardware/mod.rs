//! Concrete [`crate::transport::Transport`] implementations.
//!
//! * [`tcp`] — WiFi ELM327 adapters, a plain TCP socket.
//! * [`serial`] — USB/Bluetooth-SPP ELM327 adapters, gated behind the
//!   `serial` feature.
//! * [`mock`] — an in-memory scripted double for tests.

pub mod mock;
pub mod tcp;

#[cfg(feature = "serial")]
pub mod serial;
