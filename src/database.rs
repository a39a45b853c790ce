//! The in-memory field/ECU/frame catalog.
//!
//! The engine only ever consumes these parsed structures: loading them
//! from `_Ecus.csv` / `_Frames.csv` / `<ECU>_Fields.csv` is an external
//! collaborator's job (see the design notes). A [`Database`] is
//! read-only after construction and may be shared by multiple
//! [`crate::engine::Engine`]s.

use std::collections::HashMap;

/// UDS service used by a field's request descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Service {
    /// ReadDataByLocalIdentifier — legacy 8-bit identifier.
    ReadDataByLocalIdentifier,
    /// ReadDataByIdentifier — 16-bit identifier.
    ReadDataByIdentifier,
}

impl Service {
    /// The UDS service id byte.
    pub fn sid(self) -> u8 {
        match self {
            Service::ReadDataByLocalIdentifier => 0x21,
            Service::ReadDataByIdentifier => 0x22,
        }
    }

    /// Byte width of the identifier this service expects (1 or 2).
    pub fn identifier_len(self) -> usize {
        match self {
            Service::ReadDataByLocalIdentifier => 1,
            Service::ReadDataByIdentifier => 2,
        }
    }

    /// Maps a raw service byte to a [`Service`], if supported.
    pub fn from_sid(sid: u8) -> Option<Self> {
        match sid {
            0x21 => Some(Service::ReadDataByLocalIdentifier),
            0x22 => Some(Service::ReadDataByIdentifier),
            _ => None,
        }
    }
}

/// A field's UDS request: which service, which identifier, and the
/// identifier's wire width.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// ReadDataByLocalIdentifier (0x21) or ReadDataByIdentifier (0x22).
    pub service: Service,
    /// The DID (16-bit) or LID (8-bit) value.
    pub identifier: u16,
}

/// Electronic Control Unit descriptor: addressing pair plus metadata
/// carried through from the original CanZE `_Ecus.csv` schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuDescriptor {
    /// Human-readable ECU name.
    pub name: String,
    /// Short mnemonic (e.g. `"LBC"`, `"EVC"`).
    pub mnemonic: String,
    /// 11-bit CAN id, tester → ECU.
    pub request_can_id: u16,
    /// 11-bit CAN id, ECU → tester.
    pub response_can_id: u16,
    /// Network tags this ECU is reachable on (e.g. `"DIAG"`, `"MULTIMEDIA"`).
    pub networks: Vec<String>,
    /// Alternate names this ECU is known by.
    pub aliases: Vec<String>,
    /// Whether a diagnostic session must be brought up before reads.
    pub session_required: bool,
    /// CAN ids this ECU uses to report DTCs. Opaque to this crate — DTC
    /// decoding is out of scope.
    pub dtc_response_ids: Vec<u16>,
}

impl EcuDescriptor {
    /// Validates the addressing invariant: request and response ids must
    /// be distinct and both fit in 11 bits.
    pub fn is_valid(&self) -> bool {
        self.request_can_id != self.response_can_id
            && self.request_can_id <= 0x7FF
            && self.response_can_id <= 0x7FF
    }
}

/// CAN frame descriptor. Timing metadata is opaque passthrough as far as
/// the core is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// 11-bit CAN id.
    pub frame_id: u16,
    /// Owning ECU mnemonic.
    pub ecu_mnemonic: String,
    /// Broadcast interval in ms on this vehicle's bus, informational.
    pub interval_ms: Option<u32>,
}

/// A single decodable field: a bit range within a UDS response, a
/// request descriptor to fetch it, and a scaling law to decode it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Stable string key, stable across runs.
    pub sid: String,
    /// 11-bit CAN id used to look up ECU addressing.
    pub frame_id: u16,
    /// Inclusive start bit, big-endian numbering (bit 0 = MSB of byte 0).
    pub start_bit: usize,
    /// Inclusive end bit.
    pub end_bit: usize,
    /// Scale factor, default 1.0.
    pub resolution: f64,
    /// Offset, default 0.0.
    pub offset: f64,
    /// Decimal places to display; informational only.
    pub decimals: u8,
    /// Display unit; informational only.
    pub unit: String,
    /// UDS request used to fetch this field's frame.
    pub request: RequestDescriptor,
    /// Overrides the ECU pair's response id for this field, if set.
    pub response_can_id: Option<u16>,
    /// Human-readable name, if the database supplied one.
    pub name: Option<String>,
    /// Raw option tokens from the database (e.g. signedness markers).
    /// Carried as opaque metadata; the core performs no sign extension.
    pub options: Vec<String>,
    /// Free-form raw value enumeration string from the database.
    /// Opaque metadata.
    pub raw_values: Option<String>,
}

impl FieldDescriptor {
    /// Validates the bit-range invariant: `start_bit <= end_bit` and the
    /// range spans at most 64 bits.
    pub fn is_valid(&self) -> bool {
        self.start_bit <= self.end_bit && (self.end_bit - self.start_bit + 1) <= 64
    }
}

/// The read-only, in-memory catalog an [`crate::engine::Engine`] queries
/// by SID.
#[derive(Debug, Clone, Default)]
pub struct Database {
    fields_by_sid: HashMap<String, FieldDescriptor>,
    ecus: Vec<EcuDescriptor>,
    frames: HashMap<u16, FrameDescriptor>,
}

impl Database {
    /// Creates an empty database; populate it with [`Database::add_ecu`],
    /// [`Database::add_frame`] and [`Database::add_field`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an ECU descriptor.
    pub fn add_ecu(&mut self, ecu: EcuDescriptor) {
        self.ecus.push(ecu);
    }

    /// Registers a frame descriptor.
    pub fn add_frame(&mut self, frame: FrameDescriptor) {
        self.frames.insert(frame.frame_id, frame);
    }

    /// Registers a field descriptor, keyed by its SID.
    pub fn add_field(&mut self, field: FieldDescriptor) {
        self.fields_by_sid.insert(field.sid.clone(), field);
    }

    /// Looks up a field by SID.
    pub fn field(&self, sid: &str) -> Option<&FieldDescriptor> {
        self.fields_by_sid.get(sid)
    }

    /// Looks up a frame by CAN id.
    pub fn frame(&self, frame_id: u16) -> Option<&FrameDescriptor> {
        self.frames.get(&frame_id)
    }

    /// All registered ECU descriptors.
    pub fn ecus(&self) -> &[EcuDescriptor] {
        &self.ecus
    }

    /// Resolves the `(request_id, response_id)` pair for an 11-bit CAN
    /// id, trying in order:
    ///
    /// 1. An exact match against a known ECU's request or response id.
    /// 2. A reverse search for any known pair whose response id matches.
    /// 3. The standard UDS addressing heuristic `request = frame_id - 8`.
    pub fn resolve_ecu_pair(&self, frame_id: u16) -> (u16, u16) {
        let fid = frame_id & 0x7FF;
        for ecu in &self.ecus {
            if ecu.request_can_id == fid || ecu.response_can_id == fid {
                return (ecu.request_can_id, ecu.response_can_id);
            }
        }
        for ecu in &self.ecus {
            if ecu.response_can_id == fid {
                return (ecu.request_can_id, ecu.response_can_id);
            }
        }
        (fid.wrapping_sub(8) & 0x7FF, fid)
    }

    /// Whether a diagnostic session is required for the ECU whose
    /// request id is `request_can_id`.
    pub fn session_required(&self, request_can_id: u16) -> bool {
        self.ecus
            .iter()
            .find(|e| e.request_can_id == request_can_id)
            .map(|e| e.session_required)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lbc() -> EcuDescriptor {
        EcuDescriptor {
            name: "LG Chem Battery Controller".into(),
            mnemonic: "LBC".into(),
            request_can_id: 0x7BB,
            response_can_id: 0x7BB + 0x8,
            networks: vec!["DIAG".into()],
            aliases: vec![],
            session_required: true,
            dtc_response_ids: vec![],
        }
    }

    #[test]
    fn resolves_exact_match_either_direction() {
        let mut db = Database::new();
        db.add_ecu(lbc());
        assert_eq!(db.resolve_ecu_pair(0x7BB), (0x7BB, 0x7C3));
        assert_eq!(db.resolve_ecu_pair(0x7C3), (0x7BB, 0x7C3));
    }

    #[test]
    fn falls_back_to_heuristic_when_unknown() {
        let db = Database::new();
        assert_eq!(db.resolve_ecu_pair(0x7EC), (0x7E4, 0x7EC));
    }

    #[test]
    fn ecu_addressing_invariant() {
        assert!(lbc().is_valid());
        let mut bad = lbc();
        bad.response_can_id = bad.request_can_id;
        assert!(!bad.is_valid());
    }
}
