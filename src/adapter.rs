//! The ELM327-class adapter controller.
//!
//! Owns the transport and drives the adapter's command state machine:
//! the idempotent initialization sequence, ECU header/filter selection,
//! diagnostic session bring-up, and the TesterPresent keep-alive
//! cadence.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::hexline::{self, ParsedResponse};
use crate::transport::{Transport, TransportResult};
use crate::DiagResult;

/// Tunable knobs for the adapter and ISO-TP layers. All defaults match
/// the reference Android/CanZE behavior.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    /// Per-read timeout on `read_until_prompt`.
    pub elm_timeout_s: f64,
    /// Sleep after each send.
    pub cmd_sleep_ms: u64,
    /// CAN auto-format (`ATCAF`).
    pub caf: u8,
    /// Flow-control STmin (`ATFCSD 3000xx`).
    pub fc_stmin_ms: u8,
    /// Sleep after a header switch.
    pub header_settle_ms: u64,
    /// One-shot sleep before the first 0x21 request after a header switch.
    pub delay_before_21_ms: u64,
    /// Program the response filter via `ATCF`/`ATCM` instead of `ATCRA`.
    pub use_mask_filter: bool,
    /// Permit one flow-control reassert retry on FF-without-CF.
    pub fc_retry_enabled: bool,
    /// Total window to assemble a multi-frame response.
    pub isotp_collect_timeout_s: f64,
    /// Per-chunk timeout while collecting Consecutive Frames.
    pub cf_read_timeout_s: f64,
    /// TesterPresent cadence.
    pub tp_interval_ms: u64,
    /// Adapter response timeout (`ATST`), as a raw hex byte.
    pub atst_hex: Option<u8>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            elm_timeout_s: 12.0,
            cmd_sleep_ms: 120,
            caf: 0,
            fc_stmin_ms: 0,
            header_settle_ms: 0,
            delay_before_21_ms: 0,
            use_mask_filter: false,
            fc_retry_enabled: true,
            isotp_collect_timeout_s: 2.5,
            cf_read_timeout_s: 1.2,
            tp_interval_ms: 1500,
            atst_hex: None,
        }
    }
}

impl Tunables {
    /// Sets the adapter response timeout from a millisecond value,
    /// rounded to 4-ms units as `ATST` expects.
    pub fn with_atst_ms(mut self, ms: u32) -> Self {
        let units = ((ms as f64 / 4.0).round() as i64).clamp(0, 0xFF) as u8;
        self.atst_hex = Some(units);
        self
    }

    /// Sets the adapter response timeout directly, as a raw `ATST` byte.
    pub fn with_atst_hex(mut self, hex: u8) -> Self {
        self.atst_hex = Some(hex);
        self
    }

    /// Sets the CAN auto-format mode.
    pub fn with_caf(mut self, caf: u8) -> Self {
        self.caf = caf;
        self
    }

    /// Sets the header-settle delay.
    pub fn with_header_settle_ms(mut self, ms: u64) -> Self {
        self.header_settle_ms = ms;
        self
    }
}

/// The ELM327-class adapter command state machine.
pub struct AdapterController<T: Transport> {
    transport: T,
    tunables: Tunables,
    current_request_id: Option<u16>,
    session_started: HashSet<u16>,
    last_tester_present: Instant,
    just_switched: bool,
    first_21_delay_by_req: HashMap<u16, u64>,
}

impl<T: Transport> std::fmt::Debug for AdapterController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterController")
            .field("current_request_id", &self.current_request_id)
            .field("session_started", &self.session_started)
            .field("just_switched", &self.just_switched)
            .finish()
    }
}

impl<T: Transport> AdapterController<T> {
    /// Wraps a transport with adapter-layer state. The battery
    /// controller (0x7BB) keeps its own default first-0x21 delay entry,
    /// matching the reference implementation; override with
    /// [`AdapterController::set_first_21_delay`].
    pub fn new(transport: T, tunables: Tunables) -> Self {
        Self {
            transport,
            tunables,
            current_request_id: None,
            session_started: HashSet::new(),
            last_tester_present: Instant::now(),
            just_switched: false,
            first_21_delay_by_req: HashMap::new(),
        }
    }

    /// Current tunables.
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Header currently programmed into the adapter, if any.
    pub fn current_request_id(&self) -> Option<u16> {
        self.current_request_id
    }

    /// Overrides the one-shot pre-0x21 delay for a specific ECU's
    /// request id (e.g. the battery controller at 0x7BB).
    pub fn set_first_21_delay(&mut self, request_id: u16, delay_ms: u64) {
        self.first_21_delay_by_req.insert(request_id, delay_ms);
    }

    fn elm_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.tunables.elm_timeout_s)
    }

    /// Sends one AT/protocol line and parses the response, without
    /// interpreting it further. Used for adapter commands whose response
    /// is discarded except for the status hint.
    fn send_and_read(&mut self, line: &str) -> TransportResult<ParsedResponse> {
        self.transport
            .send(line, Duration::from_millis(self.tunables.cmd_sleep_ms))?;
        let text = self.transport.read_until_prompt(self.elm_timeout())?;
        Ok(hexline::parse_response(&text))
    }

    fn send_ignoring_response(&mut self, line: &str) -> DiagResult<()> {
        self.send_and_read(line)?;
        Ok(())
    }

    /// Runs the deterministic ELM327 initialization sequence. Idempotent
    /// in effect — re-running it simply reprograms the adapter to the
    /// same state.
    pub fn initialize(&mut self) -> DiagResult<()> {
        log::debug!("adapter: soft reset");
        self.transport
            .send("ATZ", Duration::from_millis(300))
            .map_err(crate::DiagError::from)?;
        self.transport
            .read_until_prompt(Duration::from_secs(3))
            .map_err(crate::DiagError::from)?;

        for cmd in ["ATE0", "ATS0", "ATH0", "ATL0", "ATAL"] {
            self.send_ignoring_response(cmd)?;
        }
        self.send_ignoring_response(&format!("ATCAF{}", self.tunables.caf))?;
        self.send_ignoring_response("ATFCSH7E4")?;
        self.send_ignoring_response(&format!("ATFCSD 3000{:02X}", self.tunables.fc_stmin_ms))?;
        self.send_ignoring_response("ATFCSM1")?;
        self.send_ignoring_response("ATSP6")?;

        if let Some(atst) = self.tunables.atst_hex {
            self.send_ignoring_response(&format!("ATST {atst:02X}"))?;
        }

        self.send_ignoring_response("ATSH7E4")?;
        self.send_ignoring_response("ATFCSH7E4")?;
        self.send_ignoring_response("ATCRA 7EC")?;
        self.current_request_id = Some(0x7E4);
        self.just_switched = false;
        log::debug!("adapter: initialization complete, default header 0x7E4/0x7EC");
        Ok(())
    }

    /// Programs the adapter's headers and response filter for a new ECU
    /// pair. Idempotent: a second call with the same `request_id` is a
    /// no-op.
    pub fn select_frame(&mut self, request_id: u16, response_id: Option<u16>) -> DiagResult<()> {
        let request_id = request_id & 0x7FF;
        if self.current_request_id == Some(request_id) {
            return Ok(());
        }
        let response_id = response_id.unwrap_or(request_id.wrapping_add(8)) & 0x7FF;

        log::debug!("adapter: selecting frame 0x{request_id:03X}/0x{response_id:03X}");
        self.send_ignoring_response(&format!("ATSH{request_id:03X}"))?;
        self.send_ignoring_response(&format!("ATFCSH{request_id:03X}"))?;
        if self.tunables.use_mask_filter {
            self.send_ignoring_response(&format!("ATCF {response_id:03X}"))?;
            self.send_ignoring_response("ATCM 7FF")?;
        } else {
            self.send_ignoring_response(&format!("ATCRA {response_id:03X}"))?;
        }
        self.current_request_id = Some(request_id);

        if self.tunables.header_settle_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.tunables.header_settle_ms));
        }
        self.just_switched = true;
        Ok(())
    }

    /// Best-effort diagnostic session bring-up for `request_id`. Tries
    /// extended (0xC0), Renault supplier (0xF2), LGChem supplier (0xF3)
    /// and default (0x81) modes in order; the first whose response
    /// contains `50 <mode>` is accepted. Non-fatal on failure; inserted
    /// into `session_started` at most once, no repeat commands on
    /// subsequent calls.
    pub fn ensure_session(&mut self, request_id: u16, force: bool, required: bool) {
        let request_id = request_id & 0x7FF;
        if self.session_started.contains(&request_id) {
            return;
        }
        if !force && !required {
            return;
        }
        for (request, expect_hi, expect_lo) in [
            ("0210C0", 0x50u8, 0xC0u8),
            ("0210F2", 0x50, 0xF2),
            ("0210F3", 0x50, 0xF3),
            ("021081", 0x50, 0x81),
        ] {
            let parsed = match self.send_and_read(request) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("adapter: session bring-up send failed: {e}");
                    continue;
                }
            };
            if contains_pair(&parsed.bytes, expect_hi, expect_lo) {
                log::debug!("adapter: session started for 0x{request_id:03X} via {request}");
                self.session_started.insert(request_id);
                return;
            }
        }
        log::debug!("adapter: session bring-up exhausted for 0x{request_id:03X}, continuing best-effort");
    }

    /// Sends `0x3E 0x00` (TesterPresent) if `tp_interval_ms` has elapsed
    /// since the last one, discarding the response. Cheap to call before
    /// every request.
    pub fn maybe_send_tester_present(&mut self) {
        if self.last_tester_present.elapsed() < Duration::from_millis(self.tunables.tp_interval_ms)
        {
            return;
        }
        log::trace!("adapter: sending TesterPresent");
        let _ = self.send_and_read("023E00");
        self.last_tester_present = Instant::now();
    }

    /// Reasserts flow-control parameters (`ATCFC1`, `ATFCSD 300005`,
    /// `ATAL`) used by the ISO-TP layer's single retry when a First Frame
    /// arrives with no Consecutive Frames. Safe to send `ATCFC1` at any
    /// point, regardless of current flow-control mode.
    pub fn reassert_flow_control(&mut self) {
        log::warn!("adapter: reasserting flow control after FF-without-CF");
        for cmd in ["ATCFC1", "ATFCSD 300005", "ATAL"] {
            let _ = self.send_and_read(cmd);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    /// Whether the adapter was just switched to a new header and has not
    /// yet issued its first post-switch 0x21 request.
    pub fn just_switched(&self) -> bool {
        self.just_switched
    }

    /// Clears the just-switched flag (consumed by the first 0x21 after a
    /// header switch).
    pub fn clear_just_switched(&mut self) {
        self.just_switched = false;
    }

    /// Resolves the one-shot pre-0x21 delay for `request_id`: a per-ECU
    /// override if set, else the global `delay_before_21_ms` tunable.
    pub fn delay_before_21_ms(&self, request_id: u16) -> u64 {
        self.first_21_delay_by_req
            .get(&request_id)
            .copied()
            .unwrap_or(self.tunables.delay_before_21_ms)
    }

    /// Sends a raw protocol-data line and returns its response as
    /// separate per-physical-line byte chunks, preserving frame
    /// boundaries an adapter may have printed in one burst (e.g. a First
    /// Frame immediately followed by a Consecutive Frame). Used by
    /// [`crate::uds`] to issue UDS requests over the same
    /// transport/adapter state.
    pub fn transact_lines(&mut self, line: &str) -> TransportResult<(Vec<Vec<u8>>, Option<hexline::StatusHint>)> {
        self.transport
            .send(line, Duration::from_millis(self.tunables.cmd_sleep_ms))?;
        let text = self.transport.read_until_prompt(self.elm_timeout())?;
        Ok(hexline::parse_lines(&text))
    }

    /// Reads more lines from the transport with the given timeout,
    /// returning them as separate per-physical-line byte chunks. Used by
    /// the UDS layer while collecting Consecutive Frames.
    pub fn read_more_lines(&mut self, timeout: Duration) -> TransportResult<(Vec<Vec<u8>>, Option<hexline::StatusHint>)> {
        let text = self.transport.read_until_prompt(timeout)?;
        Ok(hexline::parse_lines(&text))
    }

    /// Closes the underlying transport. The engine must be reconnected
    /// from scratch afterwards; all adapter state resets.
    pub fn close(&mut self) -> TransportResult<()> {
        self.transport.close()
    }
}

fn contains_pair(bytes: &[u8], hi: u8, lo: u8) -> bool {
    bytes.windows(2).any(|w| w[0] == hi && w[1] == lo)
}
