//! Outbound packets, ordered by priority, and the state machine that slices
//! the packet at the head of the queue into frames.
//!
//! Only the head packet is ever "in progress". It is segmented one frame
//! per scheduling opportunity, and each radio confirmation advances it by
//! one segment. A whole packet is retried (from its first byte) as many
//! times as its reliability class allows; it completes successfully if
//! every segment made it to the air at least once over all attempts.

use blockpool::BlockPool;
use heapless::Vec;

use crate::{
    AddrMode, DataStatus, FrameType, MAX_PACKET_LEN, MacAddr, NON_ARQ_SEQUENCE, PHY_MAX_PAYLOAD,
    Reliability,
    config::MacConfig,
    counters::{MacCounters, bump},
    frame::{FrameHeader, PACKET_ID_MODULUS, SEQUENCE_MODULUS, segment_count},
    interface::Radio,
    logging::{debug, error, trace, warn},
};

use super::frame_queue::{FrameTxQueue, PendingAck};

/// Completion callback of a submitted packet: final status and handle
pub type ConfirmFn = fn(DataStatus, u16);

/// A packet submitted for transmission
pub struct DataRequest<P> {
    /// Caller chosen handle, echoed in the confirmation
    pub handle: u16,
    pub dst_addr_mode: AddrMode,
    pub dst_addr: MacAddr,
    pub payload: P,
    /// Larger is more urgent
    pub priority: u8,
    /// May be evicted by a later packet when the queue is full
    pub droppable: bool,
    pub reliability: Reliability,
    pub ack_required: bool,
    pub channel_set: u8,
    pub callback: Option<ConfirmFn>,
}

impl<P> DataRequest<P> {
    /// A broadcast request with the lowest priority and reliability
    pub fn new(handle: u16, payload: P) -> Self {
        Self {
            handle,
            dst_addr_mode: AddrMode::Broadcast,
            dst_addr: MacAddr::UNSET,
            payload,
            priority: 0,
            droppable: false,
            reliability: Reliability::Low,
            ack_required: false,
            channel_set: 0,
            callback: None,
        }
    }
}

/// Final outcome of a packet, reported once
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataConfirm {
    pub handle: u16,
    pub payload_len: u16,
    pub status: DataStatus,
}

#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RejectReason {
    /// The queue is full and nothing may be evicted
    Overflow,
    /// Empty, or too large to segment
    InvalidParameter,
}

/// What a scheduling opportunity did
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// The next frame of the head packet was queued
    Frame,
    /// Nothing to send, or no room for another frame yet
    Idle,
    /// The head packet finished without producing a frame
    Finished(DataConfirm),
}

impl Scheduled {
    pub fn is_frame(&self) -> bool {
        matches!(self, Scheduled::Frame)
    }
}

/// A refused submission. The request is handed back untouched.
pub struct SubmitError<P> {
    pub request: DataRequest<P>,
    pub reason: RejectReason,
}

impl<P> core::fmt::Debug for SubmitError<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubmitError")
            .field("handle", &self.request.handle)
            .field("reason", &self.reason)
            .finish()
    }
}

struct OutboundPacket<P> {
    request: DataRequest<P>,
    frame_type: FrameType,
    channel: u16,
    in_progress: bool,
}

impl<P: AsRef<[u8]>> OutboundPacket<P> {
    fn payload_len(&self) -> u16 {
        self.request.payload.as_ref().len() as u16
    }
}

/// Progress of the packet at the head of the queue
#[derive(Debug, Clone, Copy, Default)]
struct PacketTracking {
    bytes_tx: u16,
    next_segment: u8,
    next_sequence: u8,
    retry_count: u8,
    /// Segments confirmed sent at least once, over all attempts
    segments_txd: u16,
    segment_count: u8,
    packet_id: u8,
    max_tx_payload: u16,
}

impl PacketTracking {
    const IDLE: Self = Self {
        bytes_tx: 0,
        next_segment: 0,
        next_sequence: 0,
        retry_count: 0,
        segments_txd: 0,
        segment_count: 0,
        packet_id: 0,
        max_tx_payload: 0,
    };

    fn segment_sent(&self, id: u8) -> bool {
        self.segments_txd & (1 << id) != 0
    }

    fn all_sent(&self) -> bool {
        let all = (1u16 << (self.segment_count + 1)) - 1;
        self.segments_txd & all == all
    }
}

/// A bounded, priority ordered queue of `N` outbound packets
pub struct PacketTxQueue<P, const N: usize> {
    packets: Vec<OutboundPacket<P>, N>,
    current: PacketTracking,
    last_packet_id: u8,
    pending_ack: Option<PendingAck>,
}

// ---- impl PacketTxQueue ----

impl<P, const N: usize> PacketTxQueue<P, N> {
    pub const fn new() -> Self {
        Self {
            packets: Vec::new(),
            current: PacketTracking::IDLE,
            last_packet_id: 0,
            pending_ack: None,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Handles in queue order, head first
    pub fn handles(&self) -> impl Iterator<Item = u16> + '_ {
        self.packets.iter().map(|p| p.request.handle)
    }

    /// Priorities in queue order, head first
    pub fn priorities(&self) -> impl Iterator<Item = u8> + '_ {
        self.packets.iter().map(|p| p.request.priority)
    }

    /// Handle of the packet currently being segmented
    pub fn in_progress(&self) -> Option<u16> {
        self.packets
            .first()
            .filter(|p| p.in_progress)
            .map(|p| p.request.handle)
    }

    /// Whole-packet retries spent on the packet in progress
    pub fn retry_count(&self) -> u8 {
        self.current.retry_count
    }

    /// Owe `dst_addr` an acknowledgment for request number `req_num`.
    pub fn request_ack(&mut self, dst_addr: MacAddr, req_num: u8) {
        self.pending_ack = Some(PendingAck { dst_addr, req_num });
    }

    pub(crate) fn pending_ack_mut(&mut self) -> &mut Option<PendingAck> {
        &mut self.pending_ack
    }

    /// Drop the packet with `handle` without reporting it.
    ///
    /// Returns `false` if no such packet is queued.
    pub fn purge(&mut self, handle: u16) -> bool {
        let Some(idx) = self.packets.iter().position(|p| p.request.handle == handle) else {
            return false;
        };
        let pkt = self.packets.remove(idx);
        if pkt.in_progress {
            self.current = PacketTracking::IDLE;
        }
        debug!("purged packet {}", handle);
        true
    }

    /// Drop every packet without reporting them
    pub fn flush(&mut self) {
        debug!("flushing {} packets", self.packets.len());
        self.packets.clear();
        self.current = PacketTracking::IDLE;
    }
}

impl<P: AsRef<[u8]>, const N: usize> PacketTxQueue<P, N> {
    /// Admit a packet.
    ///
    /// On rejection the request is handed back inside the error, the
    /// caller remains its owner.
    pub fn submit(
        &mut self,
        mut request: DataRequest<P>,
        frame_type: FrameType,
        counters: &mut MacCounters,
    ) -> Result<u16, SubmitError<P>> {
        let len = request.payload.as_ref().len();
        let fits = len != 0
            && len <= MAX_PACKET_LEN
            && segment_count(
                len as u16,
                request.ack_required,
                request.dst_addr_mode,
                PHY_MAX_PAYLOAD as u16,
            )
            .is_some();
        if !fits {
            warn!("refusing packet {} of {} bytes", request.handle, len);
            return Err(SubmitError {
                request,
                reason: RejectReason::InvalidParameter,
            });
        }
        // Per-segment ARQ acknowledgments are never generated by this
        // MAC, so every packet goes out relying on radio confirmations
        request.ack_required = false;

        let handle = request.handle;
        let pkt = OutboundPacket {
            request,
            frame_type,
            channel: 0,
            in_progress: false,
        };
        match self.prioritize_and_insert(pkt, counters) {
            Ok(()) => {
                debug!("queued packet {}, {} in queue", handle, self.packets.len());
                Ok(handle)
            }
            Err(pkt) => {
                bump(&mut counters.transaction_overflow);
                Err(SubmitError {
                    request: pkt.request,
                    reason: RejectReason::Overflow,
                })
            }
        }
    }

    fn prioritize_and_insert(
        &mut self,
        pkt: OutboundPacket<P>,
        counters: &mut MacCounters,
    ) -> Result<(), OutboundPacket<P>> {
        let priority = pkt.request.priority;

        if self.packets.is_full() {
            // The queue is kept sorted, so the last candidate is the least
            // urgent one
            let victim = self.packets.iter().rposition(|p| {
                p.request.droppable && !p.in_progress && p.request.priority <= priority
            });
            let Some(victim) = victim else {
                warn!("packet queue full, rejecting packet {}", pkt.request.handle);
                return Err(pkt);
            };
            let evicted = self.packets.remove(victim);
            warn!(
                "evicting packet {} (priority {}) for packet {} (priority {})",
                evicted.request.handle, evicted.request.priority, pkt.request.handle, priority
            );
            bump(&mut counters.tx_packet_evicted);
            if let Some(cb) = evicted.request.callback {
                cb(DataStatus::TransactionOverflow, evicted.request.handle);
            }
        }

        let pos = self
            .packets
            .iter()
            .position(|p| !p.in_progress && p.request.priority < priority)
            .unwrap_or(self.packets.len());
        self.packets.insert(pos, pkt)
    }

    /// Make progress on the packet at the head of the queue: start it if
    /// needed, and put its next frame on `frames` if there is room for it.
    ///
    pub(crate) fn get_next_frame<R: Radio, const F: usize>(
        &mut self,
        frames: &mut FrameTxQueue<F>,
        pool: &dyn BlockPool,
        radio: &mut R,
        config: &MacConfig,
        counters: &mut MacCounters,
    ) -> Scheduled {
        let Some(head) = self.packets.first_mut() else {
            return Scheduled::Idle;
        };

        // Frames of a purged packet may still be queued, a new packet only
        // starts once they are gone
        let ack_required = head.request.ack_required;
        let window_open = if ack_required {
            frames.len() < usize::from(config.arq_window)
        } else {
            frames.is_empty()
        };
        if !window_open {
            return Scheduled::Idle;
        }

        if self.current.bytes_tx == 0 {
            head.in_progress = true;
            if self.current.retry_count == 0 {
                bump(&mut counters.tx_packet);
                self.last_packet_id = (self.last_packet_id + 1) % PACKET_ID_MODULUS;
                self.current.packet_id = self.last_packet_id;

                let max = radio.max_tx_payload().min(PHY_MAX_PAYLOAD as u16);
                let count = segment_count(
                    head.payload_len(),
                    head.request.ack_required,
                    head.request.dst_addr_mode,
                    max,
                );
                let Some(count) = count else {
                    warn!(
                        "packet {} does not fit {} byte frames",
                        head.request.handle, max
                    );
                    bump(&mut counters.tx_packet_failed);
                    return match self.complete(DataStatus::TransactionFailed) {
                        Some(confirm) => Scheduled::Finished(confirm),
                        None => Scheduled::Idle,
                    };
                };
                self.current.segment_count = count;
                self.current.max_tx_payload = max;
                head.channel = radio.random_channel(head.request.channel_set);
                debug!(
                    "starting packet {} as id {}, {} segments on channel {}",
                    head.request.handle,
                    self.current.packet_id,
                    count + 1,
                    head.channel
                );
            }
        }

        let len = head.payload_len();
        if self.current.bytes_tx >= len {
            return Scheduled::Idle;
        }

        let mut block = match pool.get() {
            Ok(block) => block,
            Err(e) => {
                error!("no frame buffer for packet {}: {:?}", head.request.handle, e);
                return Scheduled::Idle;
            }
        };

        let cur = &mut self.current;
        let mut header = FrameHeader::new(head.frame_type);
        header.dst_addr_mode = head.request.dst_addr_mode;
        header.dst_addr = head.request.dst_addr;
        header.src_addr = config.mac_address;
        header.network_id = config.network_id;
        header.ack_required = ack_required;
        header.packet_id = cur.packet_id;
        header.segment_count = cur.segment_count;
        header.length = len;
        header.segmentation = cur.segment_count > 0;
        header.segment_id = cur.next_segment;

        // A piggybacked ack may only use the ack byte already counted in
        // the segment arithmetic
        if ack_required {
            header.seq_num = cur.next_sequence;
            cur.next_sequence = (cur.next_sequence + 1) % SEQUENCE_MODULUS;
            if let Some(ack) = self.pending_ack.take() {
                header.ack_present = true;
                header.req_num = ack.req_num;
            }
        }

        let room = cur.max_tx_payload.saturating_sub(header.header_len());
        let this_len = (len - cur.bytes_tx).min(room);
        let start = usize::from(cur.bytes_tx);
        let chunk = &head.request.payload.as_ref()[start..start + usize::from(this_len)];
        if let Err(e) = pool.write(&mut block, 0, chunk) {
            error!("failed to fill frame buffer: {:?}", e);
            if let Err(e) = pool.put(block) {
                error!("failed to return frame block: {:?}", e);
            }
            return Scheduled::Idle;
        }

        trace!(
            "packet {} segment {}: {} bytes at offset {}",
            head.request.handle, header.segment_id, this_len, start
        );
        if let Err(block) = frames.enqueue(header, head.channel, block, this_len) {
            error!("frame queue full");
            if let Err(e) = pool.put(block) {
                error!("failed to return frame block: {:?}", e);
            }
            return Scheduled::Idle;
        }
        cur.bytes_tx += this_len;
        Scheduled::Frame
    }

    /// A frame of the packet in progress was confirmed.
    ///
    /// `seq_num` is [`NON_ARQ_SEQUENCE`] for a plain radio confirmation.
    /// Returns the packet's confirmation once it is finished.
    pub(crate) fn acknowledge(
        &mut self,
        seq_num: u8,
        status: DataStatus,
        config: &MacConfig,
        counters: &mut MacCounters,
    ) -> Option<DataConfirm> {
        let head = self.packets.first().filter(|p| p.in_progress)?;
        let retries = config.retry_count(head.request.reliability);
        let len = head.payload_len();

        let cur = &mut self.current;
        if status == DataStatus::Success {
            cur.segments_txd |= 1 << cur.next_segment;
        } else {
            warn!(
                "segment {} of packet {} failed: {:?}",
                cur.next_segment, head.request.handle, status
            );
        }

        if seq_num != NON_ARQ_SEQUENCE {
            error!("unexpected acknowledgment of sequence {}", seq_num);
            return None;
        }

        // On the last attempt a segment that never went out means the peer
        // can not rebuild the packet, so stop here
        if retries <= cur.retry_count && !cur.segment_sent(cur.next_segment) {
            debug!(
                "abandoning packet {}, segment {} never sent",
                head.request.handle, cur.next_segment
            );
            cur.bytes_tx = len;
            cur.retry_count = u8::MAX;
        }

        if cur.bytes_tx < len {
            cur.next_segment += 1;
            return None;
        }

        cur.bytes_tx = 0;
        cur.next_segment = 0;
        if retries > cur.retry_count {
            cur.retry_count += 1;
            debug!(
                "retrying packet {}, attempt {}",
                head.request.handle,
                cur.retry_count + 1
            );
            return None;
        }

        let status = if cur.all_sent() {
            DataStatus::Success
        } else {
            bump(&mut counters.tx_packet_failed);
            DataStatus::TransactionFailed
        };
        self.complete(status)
    }

    /// Retire the head packet, reporting `status` to its submitter
    fn complete(&mut self, status: DataStatus) -> Option<DataConfirm> {
        if self.packets.is_empty() {
            return None;
        }
        let pkt = self.packets.remove(0);
        self.current = PacketTracking::IDLE;

        let confirm = DataConfirm {
            handle: pkt.request.handle,
            payload_len: pkt.payload_len(),
            status,
        };
        debug!("packet {} finished: {:?}", confirm.handle, status);
        if let Some(cb) = pkt.request.callback {
            cb(status, confirm.handle);
        }
        Some(confirm)
    }
}

impl<P, const N: usize> Default for PacketTxQueue<P, N> {
    fn default() -> Self {
        Self::new()
    }
}
