//! Frames waiting for, or in flight at, the radio

use blockpool::{Block, BlockPool};
use heapless::Deque;

use crate::{
    AddrMode, FrameType, MacAddr,
    config::MacConfig,
    frame::FrameHeader,
    logging::{debug, error, trace},
};

/// An acknowledgment we owe a peer
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    pub dst_addr: MacAddr,
    pub req_num: u8,
}

/// One radio sized unit of a packet
pub struct TxFrame {
    pub header: FrameHeader,
    pub channel: u16,
    payload: Block,
    len: u16,
    sent: bool,
}

impl TxFrame {
    /// Payload bytes in this frame
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Has this frame been handed to the radio?
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Copy the payload out of its block
    pub(crate) fn read_payload<'b>(
        &self,
        pool: &dyn BlockPool,
        buf: &'b mut [u8],
    ) -> Option<&'b [u8]> {
        let out = buf.get_mut(..self.len())?;
        pool.read(&self.payload, 0, out).ok()?;
        Some(out)
    }
}

/// What a radio confirmation did to the frame queue
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmed {
    /// A data frame was retired, its packet should hear about it
    Data,
    /// An acknowledgment-only frame was retired
    AckOnly,
    /// The frame waits for an acknowledgment before it can be retired
    Retained,
    /// Nothing to confirm
    Nothing,
}

/// Ordered frames, oldest first
pub struct FrameTxQueue<const N: usize> {
    frames: Deque<TxFrame, N>,
}

// ---- impl FrameTxQueue ----

impl<const N: usize> FrameTxQueue<N> {
    pub const fn new() -> Self {
        Self {
            frames: Deque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TxFrame> {
        self.frames.iter()
    }

    /// Is a frame with the radio, waiting for its confirmation?
    pub fn in_flight(&self) -> bool {
        self.frames.iter().any(|f| f.sent && !f.header.ack_required)
    }

    /// Append a frame. On a full queue the payload block is handed back.
    pub(crate) fn enqueue(
        &mut self,
        header: FrameHeader,
        channel: u16,
        payload: Block,
        len: u16,
    ) -> Result<(), Block> {
        let frame = TxFrame {
            header,
            channel,
            payload,
            len,
            sent: false,
        };
        self.frames.push_back(frame).map_err(|f| f.payload)
    }

    /// The oldest frame not handed to the radio yet.
    ///
    /// With nothing else to send and an acknowledgment owed, an ack-only
    /// frame is built and queued, and `pending_ack` is cleared.
    pub(crate) fn next_to_send(
        &mut self,
        pool: &dyn BlockPool,
        config: &MacConfig,
        pending_ack: &mut Option<PendingAck>,
    ) -> Option<&mut TxFrame> {
        // The radio takes one frame at a time, and confirms the newest
        if self.in_flight() {
            return None;
        }
        if let Some(idx) = self.frames.iter().position(|f| !f.sent) {
            return self.frames.iter_mut().nth(idx);
        }

        let ack = (*pending_ack)?;
        if self.frames.is_full() {
            return None;
        }
        let block = match pool.get() {
            Ok(block) => block,
            Err(e) => {
                debug!("no frame buffer for ack-only frame: {:?}", e);
                return None;
            }
        };

        let mut header = FrameHeader::new(FrameType::ACK);
        header.dst_addr_mode = AddrMode::Unicast;
        header.dst_addr = ack.dst_addr;
        header.src_addr = config.mac_address;
        header.network_id = config.network_id;
        header.ack_present = true;
        header.req_num = ack.req_num;

        if let Err(block) = self.enqueue(header, 0, block, 0) {
            if let Err(e) = pool.put(block) {
                error!("failed to return frame block: {:?}", e);
            }
            return None;
        }
        *pending_ack = None;
        trace!("ack-only frame for {} req {}", ack.dst_addr, ack.req_num);
        self.frames.back_mut()
    }

    /// The radio finished sending the newest frame.
    pub(crate) fn on_phy_confirm(&mut self, pool: &dyn BlockPool) -> Confirmed {
        let Some(frame) = self.frames.back() else {
            error!("radio confirmation with no frame queued");
            return Confirmed::Nothing;
        };
        if !frame.sent {
            error!("radio confirmation for a frame never handed to it");
            return Confirmed::Nothing;
        }
        if frame.header.ack_required {
            return Confirmed::Retained;
        }

        let Some(frame) = self.frames.pop_back() else {
            return Confirmed::Nothing;
        };
        let kind = if frame.header.frame_type == FrameType::ACK {
            Confirmed::AckOnly
        } else {
            Confirmed::Data
        };
        if let Err(e) = pool.put(frame.payload) {
            error!("failed to return frame block: {:?}", e);
        }
        kind
    }
}

impl<const N: usize> Default for FrameTxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
