//! The UDS request layer: services 0x21 (ReadDataByLocalIdentifier) and
//! 0x22 (ReadDataByIdentifier), negative-response detection, and the
//! short-lived 0x21 response cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::adapter::AdapterController;
use crate::database::{RequestDescriptor, Service};
use crate::hexline::StatusHint;
use crate::isotp::{self, Assembled};
use crate::transport::{Transport, TransportResult};

const RDBLID_CACHE_TTL: Duration = Duration::from_secs(1);

/// Outcome of one UDS request attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdsOutcome {
    /// A positive response, service id and identifier echo bytes
    /// included (byte 0 is the response SID, e.g. `0x62`). Field bit
    /// offsets in the database are numbered against this full byte
    /// string, not just the trailing data bytes.
    Positive(Vec<u8>),
    /// A negative response (`0x7F <service> <code>`).
    Negative { code: u8 },
    /// No usable response: adapter-reported condition (`StatusHint`), a
    /// malformed/short response, or an ISO-TP sequencing failure.
    None(Option<StatusHint>),
}

/// Drives UDS requests over an [`AdapterController`], reusing its
/// transport and header/session state.
pub struct UdsEngine<T: Transport> {
    adapter: AdapterController<T>,
    rdblid_cache: HashMap<(u16, u16), (Instant, UdsOutcome)>,
}

impl<T: Transport> std::fmt::Debug for UdsEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdsEngine").field("adapter", &self.adapter).finish()
    }
}

impl<T: Transport> UdsEngine<T> {
    /// Wraps an already-initialized [`AdapterController`].
    pub fn new(adapter: AdapterController<T>) -> Self {
        Self {
            adapter,
            rdblid_cache: HashMap::new(),
        }
    }

    /// Access to the underlying adapter controller, e.g. to call
    /// [`AdapterController::select_frame`] or
    /// [`AdapterController::close`].
    pub fn adapter(&mut self) -> &mut AdapterController<T> {
        &mut self.adapter
    }

    /// Issues one UDS read request for `request` against the ECU
    /// currently selected via [`AdapterController::select_frame`].
    ///
    /// Service 0x21 responses are cached for one second keyed on
    /// `(request_id, identifier)`, matching the reference
    /// implementation's rationale: several fields on the same frame are
    /// typically read back to back immediately after a poll.
    pub fn read_by_id(
        &mut self,
        request_id: u16,
        request: RequestDescriptor,
    ) -> TransportResult<UdsOutcome> {
        if request.service == Service::ReadDataByLocalIdentifier {
            if let Some((seen_at, outcome)) = self.rdblid_cache.get(&(request_id, request.identifier)) {
                if seen_at.elapsed() < RDBLID_CACHE_TTL {
                    log::trace!("uds: 0x21 cache hit for 0x{:04X}", request.identifier);
                    return Ok(outcome.clone());
                }
            }
        }

        self.adapter.maybe_send_tester_present();

        if self.adapter.just_switched() && request.service == Service::ReadDataByLocalIdentifier {
            let delay = self.adapter.delay_before_21_ms(request_id);
            if delay > 0 {
                std::thread::sleep(Duration::from_millis(delay));
            }
            self.adapter.clear_just_switched();
        }

        let outcome = self.attempt_read(request, true)?;

        if request.service == Service::ReadDataByLocalIdentifier
            && matches!(outcome, UdsOutcome::Positive(_))
        {
            self.rdblid_cache
                .insert((request_id, request.identifier), (Instant::now(), outcome.clone()));
        }
        Ok(outcome)
    }

    /// Sends `request`'s UDS command line and assembles its response. On
    /// a First-Frame-without-Consecutive-Frames stall, reasserts flow
    /// control and re-sends the same request exactly once when
    /// `allow_retry` is set — the recursive call passes `false` so a
    /// second stall gives up rather than retrying forever.
    fn attempt_read(&mut self, request: RequestDescriptor, allow_retry: bool) -> TransportResult<UdsOutcome> {
        let line = build_request_line(request);
        let (mut lines, status) = self.adapter.transact_lines(&line)?;

        if lines.is_empty() {
            return Ok(UdsOutcome::None(status));
        }

        // The adapter may have printed a First Frame and its Consecutive
        // Frames in the same burst; only the first physical line seeds
        // `isotp::assemble`, the rest are already-available chunks.
        let initial = lines.remove(0);
        let mut pending: std::collections::VecDeque<Vec<u8>> = lines.into();

        let assembled = isotp::assemble::<crate::transport::TransportError>(
            &initial,
            || {
                if let Some(chunk) = pending.pop_front() {
                    return Ok(Some(chunk));
                }
                let read = self.adapter.read_more_lines(Duration::from_secs_f64(
                    self.adapter.tunables().cf_read_timeout_s,
                ));
                let (more_lines, _status) = match read {
                    Ok(v) => v,
                    // A per-chunk timeout just means nothing arrived yet;
                    // keep waiting until the overall deadline. Only a
                    // closed/IO-failed transport is a real error.
                    Err(crate::transport::TransportError::Timeout) => return Ok(None),
                    Err(e) => return Err(e),
                };
                if more_lines.is_empty() {
                    return Ok(None);
                }
                let mut more_lines = more_lines.into_iter();
                let first = more_lines.next();
                pending.extend(more_lines);
                Ok(first)
            },
            {
                let deadline = Instant::now()
                    + Duration::from_secs_f64(self.adapter.tunables().isotp_collect_timeout_s);
                move || Instant::now() >= deadline
            },
        )?;

        match assembled {
            Assembled::Complete(payload) => Ok(interpret_payload(request, &payload)),
            Assembled::FirstFrameOnly { total_len, collected } => {
                if allow_retry && self.adapter.tunables().fc_retry_enabled {
                    log::warn!(
                        "uds: First Frame (total {total_len}) stalled at {} bytes, reasserting flow control and retrying the request once",
                        collected.len()
                    );
                    self.adapter.reassert_flow_control();
                    self.attempt_read(request, false)
                } else {
                    Ok(UdsOutcome::None(None))
                }
            }
            Assembled::SequenceError => Ok(UdsOutcome::None(None)),
        }
    }
}

fn build_request_line(request: RequestDescriptor) -> String {
    match request.service {
        Service::ReadDataByLocalIdentifier => {
            format!("0221{:02X}", request.identifier as u8)
        }
        Service::ReadDataByIdentifier => {
            format!("0322{:04X}", request.identifier)
        }
    }
}

fn interpret_payload(request: RequestDescriptor, payload: &[u8]) -> UdsOutcome {
    if payload.len() >= 3 && payload[0] == 0x7F {
        return UdsOutcome::Negative { code: payload[2] };
    }
    let expected_sid = request.service.sid() + 0x40;
    let id_len = request.service.identifier_len();
    if payload.len() < 1 + id_len || payload[0] != expected_sid {
        return UdsOutcome::None(None);
    }
    if request.service == Service::ReadDataByIdentifier {
        let hi = (request.identifier >> 8) as u8;
        let lo = (request.identifier & 0xFF) as u8;
        if payload[1] != hi || payload[2] != lo {
            return UdsOutcome::None(None);
        }
    }
    UdsOutcome::Positive(payload.to_vec())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapter::Tunables;
    use crate::hardware::mock::MockTransport;

    fn engine_with<F>(responder: F) -> UdsEngine<MockTransport<F>>
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let mock = MockTransport::new(responder);
        let adapter = AdapterController::new(mock, Tunables::default());
        UdsEngine::new(adapter)
    }

    #[test]
    fn single_frame_positive_response() {
        let mut eng = engine_with(|line| {
            if line.starts_with("0322") {
                Some("07 62 20 02 0F A0 00 00".to_string())
            } else {
                Some(String::new())
            }
        });
        let req = RequestDescriptor {
            service: Service::ReadDataByIdentifier,
            identifier: 0x2002,
        };
        let outcome = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(
            outcome,
            UdsOutcome::Positive(vec![0x62, 0x20, 0x02, 0x0F, 0xA0, 0x00, 0x00])
        );
    }

    #[test]
    fn negative_response_is_surfaced_not_erred() {
        let mut eng = engine_with(|_| Some("03 7F 22 31".to_string()));
        let req = RequestDescriptor {
            service: Service::ReadDataByIdentifier,
            identifier: 0x2002,
        };
        let outcome = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(outcome, UdsOutcome::Negative { code: 0x31 });
    }

    #[test]
    fn no_data_is_none_with_status_hint() {
        let mut eng = engine_with(|_| Some("NO DATA".to_string()));
        let req = RequestDescriptor {
            service: Service::ReadDataByIdentifier,
            identifier: 0x2002,
        };
        let outcome = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(outcome, UdsOutcome::None(Some(StatusHint::NoData)));
    }

    #[test]
    fn rdblid_response_is_cached_for_one_second() {
        let mut eng = engine_with(|line| {
            if line.starts_with("0221") {
                Some("03 61 01 64".to_string())
            } else {
                Some(String::new())
            }
        });
        let req = RequestDescriptor {
            service: Service::ReadDataByLocalIdentifier,
            identifier: 0x01,
        };
        let first = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(first, UdsOutcome::Positive(vec![0x61, 0x01, 0x64]));
        assert!(eng.rdblid_cache.contains_key(&(0x7E4, 0x01)));
    }

    #[test]
    fn mismatched_did_echo_is_not_positive() {
        let mut eng = engine_with(|line| {
            if line.starts_with("0322") {
                // Echoes DID 0x2003 while 0x2002 was requested.
                Some("07 62 20 03 0F A0 00 00".to_string())
            } else {
                Some(String::new())
            }
        });
        let req = RequestDescriptor {
            service: Service::ReadDataByIdentifier,
            identifier: 0x2002,
        };
        let outcome = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(outcome, UdsOutcome::None(None));
    }

    #[test]
    fn failed_rdblid_response_is_not_cached() {
        let mut eng = engine_with(|_| Some("NO DATA".to_string()));
        let req = RequestDescriptor {
            service: Service::ReadDataByLocalIdentifier,
            identifier: 0x01,
        };
        let outcome = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(outcome, UdsOutcome::None(Some(StatusHint::NoData)));
        assert!(!eng.rdblid_cache.contains_key(&(0x7E4, 0x01)));
    }

    #[test]
    fn negative_rdblid_response_is_not_cached() {
        let mut eng = engine_with(|_| Some("03 7F 21 31".to_string()));
        let req = RequestDescriptor {
            service: Service::ReadDataByLocalIdentifier,
            identifier: 0x01,
        };
        let outcome = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(outcome, UdsOutcome::Negative { code: 0x31 });
        assert!(!eng.rdblid_cache.contains_key(&(0x7E4, 0x01)));
    }

    #[test]
    fn fc_retry_resends_the_request_and_completes() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_seen = attempts.clone();
        let responder = move |line: &str| {
            if line.starts_with("0322") {
                let n = attempts_seen.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    // First Frame only, no Consecutive Frame ever arrives.
                    Some("10 0A 62 21 01 02 03 04".to_string())
                } else {
                    // Retried request: FF and CF arrive in the same burst.
                    Some("10 0A 62 21 01 02 03 04\r21 05 06 07 08".to_string())
                }
            } else {
                Some(String::new())
            }
        };
        let mock = MockTransport::new(responder);
        let mut tunables = Tunables::default();
        tunables.isotp_collect_timeout_s = 0.05;
        tunables.cf_read_timeout_s = 0.01;
        let adapter = AdapterController::new(mock, tunables);
        let mut eng = UdsEngine::new(adapter);

        let req = RequestDescriptor {
            service: Service::ReadDataByIdentifier,
            identifier: 0x2101,
        };
        let outcome = eng.read_by_id(0x7E4, req).unwrap();
        assert_eq!(
            outcome,
            UdsOutcome::Positive(vec![0x62, 0x21, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
        );
        assert_eq!(
            attempts.load(Ordering::SeqCst),
            2,
            "must resend the UDS request itself after the flow-control reassert, not just read more bytes"
        );
    }
}
