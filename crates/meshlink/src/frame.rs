//! MAC frame headers and the arithmetic that decides how packets are cut
//! into frames.
//!
//! Headers are kept as structured fields. Packing them into bits on the
//! air is the radio driver's concern, only their encoded *length* matters
//! here, since it decides how much payload fits next to them.

use crate::{AddrMode, FrameType, MAC_ADDRESS_SIZE, MAX_SEGMENTS, MacAddr};

/// Header bytes present in every frame
pub const MIN_MAC_HEADER_LEN: u16 = 11;

/// Header bytes carrying the total packet length
const LENGTH_FIELD_LEN: u16 = 2;

/// Header bytes carrying the segment id
const SEGMENT_FIELD_LEN: u16 = 1;

/// Packet ids cycle through this many values
pub const PACKET_ID_MODULUS: u8 = 4;

/// ARQ sequence numbers cycle through this many values
pub const SEQUENCE_MODULUS: u8 = 16;

#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub dst_addr_mode: AddrMode,
    pub ack_required: bool,
    pub ack_present: bool,
    pub segmentation: bool,
    pub packet_id: u8,
    pub network_id: u8,
    pub src_addr: MacAddr,
    /// Only meaningful for [`AddrMode::Unicast`]
    pub dst_addr: MacAddr,
    pub seq_num: u8,
    pub req_num: u8,
    pub segment_id: u8,
    /// Index of the last segment, zero for an unsegmented packet
    pub segment_count: u8,
    /// Length of the whole packet payload
    pub length: u16,
}

impl FrameHeader {
    pub const fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            dst_addr_mode: AddrMode::Broadcast,
            ack_required: false,
            ack_present: false,
            segmentation: false,
            packet_id: 0,
            network_id: 0,
            src_addr: MacAddr::UNSET,
            dst_addr: MacAddr::UNSET,
            seq_num: 0,
            req_num: 0,
            segment_id: 0,
            segment_count: 0,
            length: 0,
        }
    }

    /// Does this frame carry the total packet length?
    ///
    /// Only the first segment of a segmented packet does.
    pub fn carries_length(&self) -> bool {
        !self.segmentation || self.segment_id == 0
    }

    /// Encoded size of this header
    pub fn header_len(&self) -> u16 {
        let mut len = base_header_len(self.dst_addr_mode, self.ack_required || self.ack_present);
        if self.carries_length() {
            len += LENGTH_FIELD_LEN;
        }
        if self.segmentation {
            len += SEGMENT_FIELD_LEN;
        }
        len
    }
}

fn base_header_len(mode: AddrMode, ack_field: bool) -> u16 {
    let mut len = MIN_MAC_HEADER_LEN;
    if mode == AddrMode::Unicast {
        len += MAC_ADDRESS_SIZE as u16;
    }
    if ack_field {
        len += 1;
    }
    len
}

/// Index of the last segment needed to carry `payload_len` bytes in frames
/// of at most `max_frame` bytes.
///
/// Returns `None` if no payload fits next to the header, or if more than
/// [`MAX_SEGMENTS`] segments would be needed.
pub fn segment_count(
    payload_len: u16,
    ack_required: bool,
    mode: AddrMode,
    max_frame: u16,
) -> Option<u8> {
    let first_unsegmented = base_header_len(mode, ack_required) + LENGTH_FIELD_LEN;
    if max_frame.checked_sub(first_unsegmented)? >= payload_len {
        return Some(0);
    }

    let first_hdr = first_unsegmented + SEGMENT_FIELD_LEN;
    let later_hdr = first_hdr - LENGTH_FIELD_LEN;
    let first_room = max_frame.checked_sub(first_hdr).filter(|r| *r > 0)?;
    let later_room = max_frame.checked_sub(later_hdr).filter(|r| *r > 0)?;

    let remaining = payload_len - first_room;
    let count = remaining.div_ceil(later_room);
    if usize::from(count) >= MAX_SEGMENTS {
        return None;
    }
    Some(count as u8)
}

/// Scale a dBm reading to the MAC's unsigned signal quality unit:
/// `(dbm + 200) * 16`, rounded.
pub fn scale_dbm(dbm: f32) -> u16 {
    let scaled = (dbm + 200.0) * 16.0 + 0.5;
    if scaled <= 0.0 {
        0
    } else if scaled >= f32::from(u16::MAX) {
        u16::MAX
    } else {
        scaled as u16
    }
}

/// Average dBm readings in the linear power domain
pub fn average_dbm(readings: impl Iterator<Item = f32>) -> f32 {
    let mut sum = 0.0f32;
    let mut n = 0u32;
    for dbm in readings {
        sum += libm::powf(10.0, dbm / 10.0);
        n += 1;
    }
    10.0 * libm::log10f(sum / n.max(1) as f32)
}
