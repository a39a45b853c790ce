//! The public façade: connect, initialize, and read decoded field
//! values against a [`Database`].

use crate::adapter::{AdapterController, Tunables};
use crate::database::Database;
pub use crate::hexline::StatusHint;
use crate::transport::{Transport, TransportResult};
use crate::uds::{UdsEngine, UdsOutcome};
use crate::{decode, DiagError, DiagResult};

/// Drives one physical adapter connection end to end: initialization,
/// ECU selection, session bring-up and field reads.
///
/// Strictly synchronous and single-threaded: no method may be called
/// reentrantly, and every blocking point is an explicit sleep or bounded
/// read inside [`crate::transport::Transport`].
pub struct Engine<T: Transport> {
    uds: UdsEngine<T>,
    database: Database,
    last_status: Option<StatusHint>,
}

impl<T: Transport> std::fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("last_status", &self.last_status)
            .finish()
    }
}

impl<T: Transport> Engine<T> {
    /// Wraps an already-connected transport. Call [`Engine::initialize`]
    /// before the first [`Engine::read_field`].
    pub fn new(transport: T, tunables: Tunables, database: Database) -> Self {
        let adapter = AdapterController::new(transport, tunables);
        Self {
            uds: UdsEngine::new(adapter),
            database,
            last_status: None,
        }
    }

    /// Runs the adapter initialization sequence. Must be
    /// called once before any [`Engine::read_field`] call.
    pub fn initialize(&mut self) -> DiagResult<()> {
        self.uds.adapter().initialize()
    }

    /// Closes the underlying transport.
    pub fn close(&mut self) -> TransportResult<()> {
        self.uds.adapter().close()
    }

    /// The most recent adapter-reported status condition, if the last
    /// [`Engine::read_field`] call returned `None` because of one.
    pub fn last_status(&self) -> Option<StatusHint> {
        self.last_status
    }

    /// Access to the field/ECU/frame catalog this engine reads against.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Looks up `sid` in the database, resolves its ECU addressing pair,
    /// switches headers and session state as needed, issues the UDS
    /// request, and decodes the result.
    ///
    /// Returns `Ok(None)` for any expected per-request condition (a
    /// negative response, a sleeping bus, an incomplete ISO-TP
    /// reassembly, a response too short for the field's bit range) —
    /// check [`Engine::last_status`] for adapter-level detail. Returns
    /// `Err` only for structural failures: unknown SID, unsupported
    /// service, or a transport failure.
    pub fn read_field(&mut self, sid: &str) -> DiagResult<Option<f64>> {
        let field = self
            .database
            .field(sid)
            .ok_or_else(|| DiagError::FieldUnknown(sid.to_string()))?
            .clone();

        let (mut request_id, response_id) = self.database.resolve_ecu_pair(field.frame_id);
        if let Some(override_resp) = field.response_can_id {
            self.select_and_prepare(request_id, override_resp)?;
        } else {
            self.select_and_prepare(request_id, response_id)?;
        }
        request_id &= 0x7FF;

        self.last_status = None;
        let outcome = self.uds.read_by_id(request_id, field.request)?;

        match outcome {
            UdsOutcome::Positive(payload) => {
                let needed_bytes = field.end_bit / 8 + 1;
                if payload.len() < needed_bytes {
                    log::debug!(
                        "engine: response for {sid} too short ({} bytes, need {needed_bytes})",
                        payload.len()
                    );
                    return Ok(None);
                }
                let raw = decode::extract_bits(&payload, field.start_bit, field.end_bit);
                Ok(Some(decode::decode_value(raw, field.resolution, field.offset)))
            }
            UdsOutcome::Negative { code } => {
                log::debug!("engine: negative response 0x{code:02X} for {sid}");
                Ok(None)
            }
            UdsOutcome::None(status) => {
                self.last_status = status;
                Ok(None)
            }
        }
    }

    fn select_and_prepare(&mut self, request_id: u16, response_id: u16) -> DiagResult<()> {
        self.uds.adapter().select_frame(request_id, Some(response_id))?;
        let required = self.database.session_required(request_id & 0x7FF);
        self.uds.adapter().ensure_session(request_id, false, required);
        Ok(())
    }
}
