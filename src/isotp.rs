//! ISO-TP (ISO 15765-2) multi-frame reassembly layered over the
//! adapter's text line protocol.
//!
//! Unlike a socketCAN-backed ISO-TP channel, the adapter itself performs
//! segmentation/flow-control over the physical bus; what reaches us is
//! already a parsed byte stream per request cycle (one or more PDUs).
//! This module only has to recognise PCI shapes in that stream and
//! stitch multi-frame payloads back together, tolerating adapter clones
//! that drop Consecutive Frames under load.

/// Outcome of attempting to assemble one ISO-TP payload from a parsed
/// byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// A complete payload, bytes starting at the positive (or negative)
    /// response service id.
    Complete(Vec<u8>),
    /// A First Frame was seen but no Consecutive Frame arrived before the
    /// per-read timeout and the total deadline has not yet elapsed — the
    /// caller should retry the flow-control reassert once.
    FirstFrameOnly { total_len: usize, collected: Vec<u8> },
    /// A Consecutive Frame's sequence number did not match what was
    /// expected.
    SequenceError,
}

/// Attempts to assemble a complete ISO-TP payload from an initial parsed
/// byte run, given a closure that reads and parses one more chunk from
/// the transport.
///
/// `read_more` should return `Ok(None)` on a per-chunk timeout (more data
/// may still arrive before the deadline) and `Err` on a transport
/// failure.
///
/// Bounded by `deadline_exceeded` (an already-elapsed-aware predicate
/// the caller supplies) and `collected_len < total_len`.
pub fn assemble<E>(
    initial: &[u8],
    mut read_more: impl FnMut() -> Result<Option<Vec<u8>>, E>,
    mut deadline_exceeded: impl FnMut() -> bool,
) -> Result<Assembled, E> {
    if initial.is_empty() {
        return Ok(Assembled::Complete(Vec::new()));
    }

    let pci_type = initial[0] >> 4;
    match pci_type {
        0x0 => {
            // Single Frame: length is the low nibble, payload follows.
            let len = (initial[0] & 0x0F) as usize;
            let payload = initial.get(1..1 + len.min(initial.len().saturating_sub(1)));
            Ok(Assembled::Complete(payload.unwrap_or(&[]).to_vec()))
        }
        0x1 => assemble_first_frame(initial, &mut read_more, &mut deadline_exceeded),
        _ => Ok(Assembled::Complete(segment_concatenate(initial))),
    }
}

fn assemble_first_frame<E>(
    initial: &[u8],
    read_more: &mut impl FnMut() -> Result<Option<Vec<u8>>, E>,
    deadline_exceeded: &mut impl FnMut() -> bool,
) -> Result<Assembled, E> {
    if initial.len() < 2 {
        return Ok(Assembled::FirstFrameOnly {
            total_len: 0,
            collected: Vec::new(),
        });
    }
    let total_len = (((initial[0] & 0x0F) as usize) << 8) | initial[1] as usize;
    let mut collected: Vec<u8> = initial[2..].to_vec();
    let mut expected_sn: u8 = 1;

    while collected.len() < total_len && !deadline_exceeded() {
        let chunk = match read_more()? {
            Some(c) => c,
            None => continue, // per-chunk timeout, keep trying until the overall deadline
        };
        if chunk.is_empty() {
            continue;
        }
        let mut j = 0usize;
        while j < chunk.len() {
            let pci = chunk[j];
            if (pci >> 4) == 0x2 {
                let sn = pci & 0x0F;
                if sn != (expected_sn & 0x0F) {
                    return Ok(Assembled::SequenceError);
                }
                expected_sn = expected_sn.wrapping_add(1);
                let remaining_in_chunk = chunk.len() - (j + 1);
                let remaining_needed = total_len - collected.len();
                let take = 7.min(remaining_in_chunk).min(remaining_needed);
                collected.extend_from_slice(&chunk[j + 1..j + 1 + take]);
                j += 1 + 7.min(remaining_in_chunk);
            } else {
                j += 1;
            }
        }
    }

    if collected.len() >= total_len {
        collected.truncate(total_len);
        Ok(Assembled::Complete(collected))
    } else {
        Ok(Assembled::FirstFrameOnly {
            total_len,
            collected,
        })
    }
}

/// Fallback for streams that do not begin with a Single or First Frame
/// PCI nibble: some adapter configurations already strip ISO-TP framing
/// and hand back the raw UDS response directly, so the first byte is a
/// positive response SID (`0x41`-`0x7E`) or the negative response marker
/// `0x7F`. Scans past any leading byte that is neither — an echoed
/// prompt fragment, a stray Consecutive Frame left over from a prior
/// stalled read — and returns the stream starting at the first
/// response-looking byte found, so the negative-response check in
/// [`crate::uds`] still sees `0x7F` at offset 0 when one is present.
/// Returns an empty payload if no such byte is found at all.
fn segment_concatenate(data: &[u8]) -> Vec<u8> {
    match data.iter().position(|&b| b == 0x7F || (0x40..=0x7E).contains(&b)) {
        Some(start) => data[start..].to_vec(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn never_exceeded() -> impl FnMut() -> bool {
        || false
    }

    #[test]
    fn single_frame_is_immediate() {
        let sf = [0x03, 0x22, 0xF1, 0x90];
        let res = assemble::<()>(&sf, || Ok(None), never_exceeded()).unwrap();
        assert_eq!(res, Assembled::Complete(vec![0x22, 0xF1, 0x90]));
    }

    #[test]
    fn first_frame_plus_consecutive_frames_round_trip() {
        // Total length 10: FF carries 6 payload bytes, one CF carries the rest.
        let ff = [0x10, 0x0A, 0x62, 0x21, 0x01, 0x02, 0x03, 0x04];
        let mut reads = vec![vec![0x21, 0x05, 0x06, 0x07, 0x08]];
        let res = assemble::<()>(
            &ff,
            || Ok(reads.pop().map(|v| v)),
            never_exceeded(),
        )
        .unwrap();
        match res {
            Assembled::Complete(payload) => {
                assert_eq!(payload.len(), 10);
                assert_eq!(
                    payload,
                    vec![0x62, 0x21, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
                );
            }
            other => panic!("expected complete assembly, got {other:?}"),
        }
    }

    #[test]
    fn s5_truncates_to_declared_length() {
        // FF declares total length 10, but the CF brings 4 extra bytes past it.
        let ff = [0x10, 0x0A, 0x62, 0x21, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut reads = vec![vec![0x21, 0x07, 0x08, 0x09, 0x0A]];
        let res = assemble::<()>(&ff, || Ok(reads.pop()), never_exceeded()).unwrap();
        match res {
            Assembled::Complete(payload) => assert_eq!(payload.len(), 10),
            other => panic!("expected complete assembly, got {other:?}"),
        }
    }

    #[test]
    fn wrong_sequence_number_errors() {
        let ff = [0x10, 0x0A, 0x62, 0x21, 0x01, 0x02, 0x03, 0x04];
        let mut reads = vec![vec![0x22, 0x05, 0x06, 0x07, 0x08]]; // should be sn=1
        let res = assemble::<()>(&ff, || Ok(reads.pop()), never_exceeded()).unwrap();
        assert_eq!(res, Assembled::SequenceError);
    }

    #[test]
    fn unframed_response_is_passed_through() {
        // No PCI nibble at all — adapter already stripped ISO-TP framing.
        let data = [0x62, 0x20, 0x02, 0x0F, 0xA0];
        let res = assemble::<()>(&data, || Ok(None), never_exceeded()).unwrap();
        assert_eq!(res, Assembled::Complete(data.to_vec()));
    }

    #[test]
    fn unframed_response_skips_leading_junk_byte() {
        // 0x21 (a stray CF-shaped byte) has the same high nibble range as
        // the fallback branch itself, so it still reaches
        // `segment_concatenate` to be scanned past.
        let data = [0x21, 0x62, 0x20, 0x02];
        let res = assemble::<()>(&data, || Ok(None), never_exceeded()).unwrap();
        assert_eq!(res, Assembled::Complete(vec![0x62, 0x20, 0x02]));
    }

    #[test]
    fn unframed_negative_response_is_found_past_junk() {
        let data = [0x21, 0x7F, 0x22, 0x31];
        let res = assemble::<()>(&data, || Ok(None), never_exceeded()).unwrap();
        assert_eq!(res, Assembled::Complete(vec![0x7F, 0x22, 0x31]));
    }

    #[test]
    fn unframed_response_with_no_recognizable_byte_is_empty() {
        let data = [0x21, 0x01, 0x02];
        let res = assemble::<()>(&data, || Ok(None), never_exceeded()).unwrap();
        assert_eq!(res, Assembled::Complete(Vec::new()));
    }

    #[test]
    fn first_frame_without_consecutive_frames_reports_partial() {
        let ff = [0x10, 0x0A, 0x62, 0x21, 0x01, 0x02, 0x03, 0x04];
        let mut calls = 0;
        let res = assemble::<()>(
            &ff,
            || {
                calls += 1;
                Ok(None)
            },
            || calls > 2,
        )
        .unwrap();
        match res {
            Assembled::FirstFrameOnly { total_len, collected } => {
                assert_eq!(total_len, 10);
                assert_eq!(collected.len(), 6);
            }
            other => panic!("expected FirstFrameOnly, got {other:?}"),
        }
    }
}
