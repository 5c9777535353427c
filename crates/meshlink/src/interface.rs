//! The collaborators around the link core: the radio below it and the
//! network layer above it.

use crate::{AddrMode, FrameType, MacAddr, frame::FrameHeader};

/// Errors a radio may report when handed a frame
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RadioError {
    /// The radio is busy with another frame, try again later
    Busy,
    /// The radio refused the frame
    Rejected,
}

/// The physical layer, as seen by the link core
pub trait Radio {
    /// Largest frame, header included, the radio can currently send.
    ///
    /// Read once per packet, segment boundaries stay fixed even if this
    /// changes while the packet is being sent.
    fn max_tx_payload(&self) -> u16;

    /// Pick a channel out of the given channel set
    fn random_channel(&mut self, channel_set: u8) -> u16;

    /// Start sending a frame. Completion is reported later through
    /// [`LinkCore::phy_confirm()`](crate::LinkCore::phy_confirm).
    fn transmit(
        &mut self,
        header: &FrameHeader,
        payload: &[u8],
        channel: u16,
    ) -> Result<(), RadioError>;
}

/// A frame received by the radio
#[derive(Debug, Clone)]
pub struct RxFrame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
    pub channel: u16,
    pub rssi_dbm: f32,
    /// Noise floor measured alongside the frame
    pub danl_dbm: f32,
    pub timestamp: u64,
}

/// A reassembled packet, handed to the network layer
#[derive(Debug, Clone, PartialEq)]
pub struct DataIndication<'a> {
    pub src_addr: MacAddr,
    pub dst_addr_mode: AddrMode,
    pub dst_addr: MacAddr,
    pub frame_type: FrameType,
    pub segment_count: u8,
    pub channel: u16,
    /// Scaled average signal strength over all segments, see
    /// [`scale_dbm`](crate::frame::scale_dbm)
    pub rssi: u16,
    /// Scaled average noise floor over all segments
    pub danl: u16,
    /// Capture time of the first frame of the packet
    pub timestamp: u64,
    pub payload: &'a [u8],
}

/// The network layer, as seen by the link core
pub trait UpperLayer {
    /// A complete packet arrived. `indication` only lives for this call.
    fn data_indication(&mut self, indication: &DataIndication<'_>);
}
