use bytes::{BufMut, BytesMut};

const ANNEX_B_START: [u8; 4] = [0, 0, 0, 1];

const NAL_IDR: u8 = 5;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

/// Reassembles H.264 NAL units from RTP payloads (RFC 6184) into complete
/// Annex B access units.
///
/// Payloads are fed in RTP order together with the marker bit; a complete
/// access unit is returned on the marked payload. Frames arriving before
/// the first IDR are discarded, since the decoder cannot start mid-GOP.
pub struct H264Depacketizer {
    unit: BytesMut,
    keyframe_seen: bool,
    fragment_open: bool,
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self {
            unit: BytesMut::new(),
            keyframe_seen: false,
            fragment_open: false,
        }
    }

    /// Feed one RTP payload plus its marker bit.
    ///
    /// Returns `Some(access_unit)` when the marked payload completes a unit
    /// that is decodable (at or after the first IDR).
    pub fn push(&mut self, payload: &[u8], marker: bool) -> Option<Vec<u8>> {
        if payload.is_empty() {
            return None;
        }

        match payload[0] & 0x1F {
            // Single NAL unit packet (types 1-23)
            1..=23 => self.append_nal(payload),
            NAL_STAP_A => self.append_stap_a(payload),
            NAL_FU_A => {
                if !self.append_fu_a(payload) {
                    return None;
                }
            }
            other => {
                log::debug!("ignoring NAL packet type {other}");
                return None;
            }
        }

        if marker {
            self.fragment_open = false;
            self.finish_unit()
        } else {
            None
        }
    }

    fn append_nal(&mut self, nal: &[u8]) {
        self.unit.put_slice(&ANNEX_B_START);
        self.unit.put_slice(nal);
    }

    /// STAP-A: one aggregation header, then length-prefixed NALs.
    fn append_stap_a(&mut self, payload: &[u8]) {
        let mut rest = &payload[1..];
        while rest.len() >= 2 {
            let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            rest = &rest[2..];
            if len == 0 || len > rest.len() {
                break;
            }
            self.append_nal(&rest[..len]);
            rest = &rest[len..];
        }
    }

    /// FU-A: fragmented NAL. Returns false when the fragment must be
    /// dropped (middle without a start, truncated header).
    fn append_fu_a(&mut self, payload: &[u8]) -> bool {
        if payload.len() < 2 {
            return false;
        }
        let indicator = payload[0];
        let header = payload[1];
        let is_start = header & 0x80 != 0;
        let is_end = header & 0x40 != 0;

        if is_start {
            if self.fragment_open {
                // The previous fragment never saw its end packet
                log::warn!("FU-A start while a fragment is open, discarding buffered unit");
                self.unit.clear();
            }
            self.fragment_open = true;
            // Rebuild the original NAL header: NRI bits from the
            // indicator, type bits from the FU header
            self.unit.put_slice(&ANNEX_B_START);
            self.unit.put_u8((indicator & 0xE0) | (header & 0x1F));
        } else if !self.fragment_open {
            return false;
        }

        self.unit.put_slice(&payload[2..]);

        if is_end {
            self.fragment_open = false;
        }
        true
    }

    fn finish_unit(&mut self) -> Option<Vec<u8>> {
        if self.unit.is_empty() {
            return None;
        }

        let unit = self.unit.split().to_vec();

        if !self.keyframe_seen {
            if contains_nal_of_type(&unit, NAL_IDR) {
                self.keyframe_seen = true;
            } else {
                return None;
            }
        }

        Some(unit)
    }
}

/// Scan Annex B data for a NAL unit with the given type.
fn contains_nal_of_type(data: &[u8], wanted: u8) -> bool {
    let mut i = 0;
    while i + 4 < data.len() {
        if data[i..i + 4] == ANNEX_B_START {
            if data[i + 4] & 0x1F == wanted {
                return true;
            }
            i += 4;
        } else {
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    // NAL type 5 (IDR), NRI 3 -> header 0x65
    const IDR: u8 = 0x65;
    // NAL type 1 (non-IDR slice) -> header 0x41
    const SLICE: u8 = 0x41;

    #[test]
    fn single_nal_with_marker_yields_unit() {
        let mut depkt = H264Depacketizer::new();
        let unit = depkt.push(&[IDR, 1, 2, 3], true).unwrap();
        assert_eq!(unit, vec![0, 0, 0, 1, IDR, 1, 2, 3]);
    }

    #[test]
    fn frames_before_first_idr_are_discarded() {
        let mut depkt = H264Depacketizer::new();
        assert!(depkt.push(&[SLICE, 9], true).is_none());

        // After an IDR, non-IDR slices pass through
        assert!(depkt.push(&[IDR, 1], true).is_some());
        assert!(depkt.push(&[SLICE, 9], true).is_some());
    }

    #[test]
    fn stap_a_unpacks_aggregated_nals() {
        // aggregation header + two NALs: [IDR, 0xAA] and [SLICE, 0xBB]
        let payload = [NAL_STAP_A, 0, 2, IDR, 0xAA, 0, 2, SLICE, 0xBB];
        let mut depkt = H264Depacketizer::new();
        let unit = depkt.push(&payload, true).unwrap();
        assert_eq!(
            unit,
            vec![0, 0, 0, 1, IDR, 0xAA, 0, 0, 0, 1, SLICE, 0xBB]
        );
    }

    #[test]
    fn fu_a_fragments_reassemble() {
        // Fragment IDR into start/middle/end
        let indicator = 0x60 | NAL_FU_A; // NRI of the original NAL
        let start = [indicator, 0x80 | NAL_IDR, 0x10, 0x11];
        let middle = [indicator, NAL_IDR, 0x12];
        let end = [indicator, 0x40 | NAL_IDR, 0x13];

        let mut depkt = H264Depacketizer::new();
        assert!(depkt.push(&start, false).is_none());
        assert!(depkt.push(&middle, false).is_none());
        let unit = depkt.push(&end, true).unwrap();

        assert_eq!(unit, vec![0, 0, 0, 1, IDR, 0x10, 0x11, 0x12, 0x13]);
    }

    #[test]
    fn orphan_fu_a_middle_is_dropped() {
        let indicator = 0x60 | NAL_FU_A;
        let middle = [indicator, NAL_IDR, 0x12];

        let mut depkt = H264Depacketizer::new();
        assert!(depkt.push(&middle, true).is_none());
    }

    #[test]
    fn new_fu_a_start_discards_incomplete_fragment() {
        let indicator = 0x60 | NAL_FU_A;
        let start_a = [indicator, 0x80 | NAL_IDR, 0xA0];
        let start_b = [indicator, 0x80 | NAL_IDR, 0xB0];
        let end_b = [indicator, 0x40 | NAL_IDR, 0xB1];

        let mut depkt = H264Depacketizer::new();
        assert!(depkt.push(&start_a, false).is_none());
        assert!(depkt.push(&start_b, false).is_none());
        let unit = depkt.push(&end_b, true).unwrap();

        // Only the second fragment survives
        assert_eq!(unit, vec![0, 0, 0, 1, IDR, 0xB0, 0xB1]);
    }

    #[test]
    fn empty_payload_is_ignored() {
        let mut depkt = H264Depacketizer::new();
        assert!(depkt.push(&[], true).is_none());
    }
}
