//! The receive path: duplicate classification and packet reassembly
//!
//! Every frame the radio hands up goes through [`Receiver::receive()`],
//! which:
//!
//! 1. Drops frames whose segment fields can not be right.
//! 2. Classifies the frame against the reassembly buffers and then the
//!    [`DuplicateTracker`]: duplicate, part of a packet in progress, or the
//!    first frame of a new packet.
//! 3. For a new packet, claims a free reassembly buffer and every segment
//!    block the packet will need, all at once.
//! 4. Copies the payload into its segment block, and once every segment is
//!    present, concatenates them and delivers the packet upward.
//!
//! A buffer that does not complete in time is expired through the
//! [timer hand-off](crate::timer) and released by
//! [`Receiver::expire()`].

pub mod duplicate;

use blockpool::{Block, BlockPool};
use heapless::Vec;

pub use duplicate::DuplicateTracker;

use crate::{
    AddrMode, FrameType, MAX_PACKET_LEN, MAX_SEGMENTS, MacAddr, PHY_MAX_PAYLOAD,
    config::MacConfig,
    counters::{MacCounters, bump},
    frame::{FrameHeader, average_dbm, scale_dbm},
    interface::{DataIndication, RxFrame, UpperLayer},
    logging::{debug, error, info, trace, warn},
    timer::{ExpiryChannel, Expired, TimerId, TimerTarget, Timers},
};

/// Lifecycle of a reassembly buffer
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Unused,
    InUse,
    /// Timed out, about to be released
    Stale,
}

/// What happened to a received frame
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Stored, the packet is still incomplete
    Stored,
    /// Stored, and it completed a packet which was delivered
    Delivered,
    /// Already seen, discarded
    Duplicate,
    Dropped(DropReason),
}

#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No reassembly buffer or segment blocks available
    Overflow,
    /// Inconsistent with itself or with the packet it belongs to
    Malformed,
}

/// Everything the receive path borrows from the link core
pub(crate) struct RxEnv<'a, T: Timers> {
    pub pool: &'a dyn BlockPool,
    pub timers: &'a mut T,
    pub expiry: &'a dyn ExpiryChannel,
    pub config: &'a MacConfig,
    pub counters: &'a mut MacCounters,
}

struct Segment {
    block: Block,
    len: u16,
    rssi_dbm: f32,
    danl_dbm: f32,
}

struct ReassemblyBuffer {
    state: RxState,
    src_addr: MacAddr,
    dst_addr: MacAddr,
    dst_addr_mode: AddrMode,
    frame_type: FrameType,
    packet_id: u8,
    segment_count: u8,
    channel: u16,
    expected_len: Option<u16>,
    bytes_rx: u16,
    segments_rxd: u16,
    segments: Vec<Segment, MAX_SEGMENTS>,
    timestamp: u64,
    timer: Option<TimerId>,
}

impl ReassemblyBuffer {
    const EMPTY: Self = Self {
        state: RxState::Unused,
        src_addr: MacAddr::UNSET,
        dst_addr: MacAddr::UNSET,
        dst_addr_mode: AddrMode::Broadcast,
        frame_type: FrameType::DATA,
        packet_id: 0,
        segment_count: 0,
        channel: 0,
        expected_len: None,
        bytes_rx: 0,
        segments_rxd: 0,
        segments: Vec::new(),
        timestamp: 0,
        timer: None,
    };

    fn has_segment(&self, id: u8) -> bool {
        self.segments_rxd & (1 << id) != 0
    }

    fn is_complete(&self) -> bool {
        let all = (1u16 << (self.segment_count + 1)) - 1;
        self.segments_rxd & all == all
    }

    /// A frame of the packet in progress must agree with its first frame
    fn agrees_with(&self, frame: &RxFrame<'_>) -> bool {
        self.dst_addr_mode == frame.header.dst_addr_mode
            && self.segment_count == frame.header.segment_count
            && self.channel == frame.channel
    }
}

enum Class {
    Duplicate,
    Existing(usize),
    New,
    /// Part of a packet whose buffer could not be kept alive
    Released,
}

/// Reassembly buffers and duplicate tracking for `RX` concurrent inbound
/// packets and `DUP` recently finished peers
pub struct Receiver<const RX: usize, const DUP: usize> {
    slots: [ReassemblyBuffer; RX],
    dups: DuplicateTracker<DUP>,
    in_use: usize,
    unicast: usize,
    scratch: [u8; MAX_PACKET_LEN],
}

// ---- impl Receiver ----

impl<const RX: usize, const DUP: usize> Receiver<RX, DUP> {
    pub const fn new() -> Self {
        Self {
            slots: [const { ReassemblyBuffer::EMPTY }; RX],
            dups: DuplicateTracker::new(),
            in_use: 0,
            unicast: 0,
            scratch: [0; MAX_PACKET_LEN],
        }
    }

    /// Reassembly buffers currently in use
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Reassembly buffers in use by packets addressed to us alone
    pub fn unicast_in_use(&self) -> usize {
        self.unicast
    }

    pub fn is_packet_in_reassembly(&self) -> bool {
        self.in_use != 0
    }

    pub fn is_unicast_packet_in_reassembly(&self) -> bool {
        self.unicast != 0
    }

    /// Are we in the middle of receiving a packet from `addr`?
    pub fn is_unit_transmitting(&self, addr: MacAddr) -> bool {
        self.slots
            .iter()
            .any(|s| s.state == RxState::InUse && s.src_addr == addr)
    }

    pub fn slot_state(&self, idx: usize) -> Option<RxState> {
        self.slots.get(idx).map(|s| s.state)
    }

    pub fn duplicates(&self) -> &DuplicateTracker<DUP> {
        &self.dups
    }

    pub(crate) fn receive<T: Timers, U: UpperLayer>(
        &mut self,
        frame: &RxFrame<'_>,
        env: &mut RxEnv<'_, T>,
        upper: &mut U,
    ) -> RxOutcome {
        let hdr = &frame.header;
        if !is_well_formed(frame, env.pool.block_size()) {
            warn!(
                "malformed frame from {}: segment {} of {}, {} bytes",
                hdr.src_addr,
                hdr.segment_id,
                hdr.segment_count,
                frame.payload.len()
            );
            bump(&mut env.counters.malformed_frame);
            return RxOutcome::Dropped(DropReason::Malformed);
        }

        let idx = match self.classify(hdr, env) {
            Class::Duplicate => {
                debug!(
                    "duplicate of packet {} segment {} from {}",
                    hdr.packet_id, hdr.segment_id, hdr.src_addr
                );
                bump(&mut env.counters.duplicate_frame);
                return RxOutcome::Duplicate;
            }
            Class::Existing(idx) => {
                if !self.slots[idx].agrees_with(frame) {
                    warn!(
                        "frame from {} does not match packet {} in progress",
                        hdr.src_addr, hdr.packet_id
                    );
                    bump(&mut env.counters.malformed_frame);
                    return RxOutcome::Dropped(DropReason::Malformed);
                }
                idx
            }
            Class::Released => {
                bump(&mut env.counters.rx_overflow);
                return RxOutcome::Dropped(DropReason::Overflow);
            }
            Class::New => match self.open(frame, env) {
                Some(idx) => idx,
                None => {
                    bump(&mut env.counters.rx_overflow);
                    return RxOutcome::Dropped(DropReason::Overflow);
                }
            },
        };

        self.store(idx, frame, env, upper)
    }

    /// Handle a fired timer. Returns `true` if it released anything.
    pub(crate) fn expire<T: Timers>(&mut self, expired: Expired, env: &mut RxEnv<'_, T>) -> bool {
        let idx = match expired.target {
            TimerTarget::Duplicate(idx) => return self.dups.expire(idx, expired.timer),
            TimerTarget::Reassembly(idx) => idx,
        };
        let Some(slot) = self.slots.get_mut(idx) else {
            error!("expiry for reassembly buffer {} out of range", idx);
            return false;
        };
        if slot.state != RxState::InUse || slot.timer != expired.timer {
            trace!("ignoring outdated expiry of reassembly buffer {}", idx);
            return false;
        }

        slot.state = RxState::Stale;
        slot.timer = None;
        warn!(
            "packet {} from {} timed out with {} bytes",
            slot.packet_id, slot.src_addr, slot.bytes_rx
        );
        bump(&mut env.counters.stale_packet);

        let (src, packet_id) = (slot.src_addr, slot.packet_id);
        self.release(idx, env);
        if !self.dups.insert(src, packet_id, env.timers, env.config) {
            info!("duplicate table full, not tracking packet {} from {}", packet_id, src);
        }
        true
    }

    fn classify<T: Timers>(&mut self, hdr: &FrameHeader, env: &mut RxEnv<'_, T>) -> Class {
        let active = self
            .slots
            .iter()
            .position(|s| s.state == RxState::InUse && s.src_addr == hdr.src_addr);

        if let Some(idx) = active {
            if self.slots[idx].packet_id == hdr.packet_id {
                if !self.arm(idx, env) {
                    return Class::Released;
                }
                return if self.slots[idx].has_segment(hdr.segment_id) {
                    Class::Duplicate
                } else {
                    Class::Existing(idx)
                };
            }
            debug!(
                "{} abandoned packet {} for packet {}",
                hdr.src_addr, self.slots[idx].packet_id, hdr.packet_id
            );
            self.release(idx, env);
            return Class::New;
        }

        match self.dups.find(hdr.src_addr) {
            Some(i) if self.dups.packet_id(i) == Some(hdr.packet_id) => {
                self.dups.refresh(i, env.timers, env.config);
                Class::Duplicate
            }
            Some(i) => {
                self.dups.remove(i, env.timers);
                Class::New
            }
            None => Class::New,
        }
    }

    /// Claim a buffer and all segment blocks for the packet `frame` starts
    fn open<T: Timers>(&mut self, frame: &RxFrame<'_>, env: &mut RxEnv<'_, T>) -> Option<usize> {
        let hdr = &frame.header;
        let Some(idx) = self.slots.iter().position(|s| s.state == RxState::Unused) else {
            warn!("no free reassembly buffer for packet from {}", hdr.src_addr);
            return None;
        };

        let slot = &mut self.slots[idx];
        slot.state = RxState::InUse;
        slot.src_addr = hdr.src_addr;
        slot.dst_addr = hdr.dst_addr;
        slot.dst_addr_mode = hdr.dst_addr_mode;
        slot.frame_type = hdr.frame_type;
        slot.packet_id = hdr.packet_id;
        slot.segment_count = hdr.segment_count;
        slot.channel = frame.channel;
        slot.timestamp = frame.timestamp;
        self.in_use += 1;
        if hdr.dst_addr_mode == AddrMode::Unicast {
            self.unicast += 1;
        }
        self.check_counts();

        for _ in 0..=hdr.segment_count {
            let block = match env.pool.get() {
                Ok(block) => block,
                Err(e) => {
                    warn!(
                        "no segment blocks for packet from {} ({:?}), dropping it",
                        hdr.src_addr, e
                    );
                    self.release(idx, env);
                    return None;
                }
            };
            let seg = Segment {
                block,
                len: 0,
                rssi_dbm: 0.0,
                danl_dbm: 0.0,
            };
            if let Err(seg) = self.slots[idx].segments.push(seg) {
                if let Err(e) = env.pool.put(seg.block) {
                    error!("failed to return segment block: {:?}", e);
                }
                self.release(idx, env);
                return None;
            }
        }

        if !self.arm(idx, env) {
            return None;
        }
        trace!(
            "reassembling packet {} from {} in buffer {}",
            hdr.packet_id, hdr.src_addr, idx
        );
        Some(idx)
    }

    fn store<T: Timers, U: UpperLayer>(
        &mut self,
        idx: usize,
        frame: &RxFrame<'_>,
        env: &mut RxEnv<'_, T>,
        upper: &mut U,
    ) -> RxOutcome {
        let hdr = &frame.header;
        let slot = &mut self.slots[idx];
        let Some(seg) = slot.segments.get_mut(usize::from(hdr.segment_id)) else {
            bump(&mut env.counters.malformed_frame);
            return RxOutcome::Dropped(DropReason::Malformed);
        };
        if let Err(e) = env.pool.write(&mut seg.block, 0, frame.payload) {
            error!("failed to store segment {}: {:?}", hdr.segment_id, e);
            bump(&mut env.counters.malformed_frame);
            return RxOutcome::Dropped(DropReason::Malformed);
        }
        seg.len = frame.payload.len() as u16;
        seg.rssi_dbm = frame.rssi_dbm;
        seg.danl_dbm = frame.danl_dbm;

        slot.segments_rxd |= 1 << hdr.segment_id;
        slot.bytes_rx = slot.bytes_rx.saturating_add(seg.len);
        if hdr.carries_length() {
            slot.expected_len = Some(hdr.length);
        }
        bump(&mut env.counters.accepted_frame);
        trace!(
            "segment {} of packet {} from {}, {} bytes so far",
            hdr.segment_id, hdr.packet_id, hdr.src_addr, slot.bytes_rx
        );

        let Some(expected) = slot.expected_len else {
            return RxOutcome::Stored;
        };
        if slot.bytes_rx < expected {
            return RxOutcome::Stored;
        }
        if !slot.is_complete() {
            error!(
                "packet {} from {} has {} of {} bytes but is missing segments",
                hdr.packet_id, hdr.src_addr, slot.bytes_rx, expected
            );
            return RxOutcome::Stored;
        }

        self.deliver(idx, expected, env, upper);
        RxOutcome::Delivered
    }

    fn deliver<T: Timers, U: UpperLayer>(
        &mut self,
        idx: usize,
        expected: u16,
        env: &mut RxEnv<'_, T>,
        upper: &mut U,
    ) {
        let slot = &self.slots[idx];
        let scratch = &mut self.scratch;
        let total = usize::from(expected).min(scratch.len());

        let mut copied = 0;
        for seg in slot.segments.iter() {
            let n = usize::from(seg.len).min(total - copied);
            if let Err(e) = env.pool.read(&seg.block, 0, &mut scratch[copied..copied + n]) {
                error!("failed to read segment block: {:?}", e);
            }
            copied += n;
        }

        let indication = DataIndication {
            src_addr: slot.src_addr,
            dst_addr_mode: slot.dst_addr_mode,
            dst_addr: slot.dst_addr,
            frame_type: slot.frame_type,
            segment_count: slot.segment_count,
            channel: slot.channel,
            rssi: scale_dbm(average_dbm(slot.segments.iter().map(|s| s.rssi_dbm))),
            danl: scale_dbm(average_dbm(slot.segments.iter().map(|s| s.danl_dbm))),
            timestamp: slot.timestamp,
            payload: &scratch[..copied],
        };
        debug!(
            "delivering packet {} from {}, {} bytes",
            slot.packet_id, slot.src_addr, copied
        );
        upper.data_indication(&indication);
        bump(&mut env.counters.packet_received);

        let (src, packet_id) = (slot.src_addr, slot.packet_id);
        self.release(idx, env);
        if !self.dups.insert(src, packet_id, env.timers, env.config) {
            info!("duplicate table full, not tracking packet {} from {}", packet_id, src);
        }
    }

    /// (Re)start the reassembly timer of a buffer.
    ///
    /// Returns `false` if the buffer had to be released instead.
    fn arm<T: Timers>(&mut self, idx: usize, env: &mut RxEnv<'_, T>) -> bool {
        let slot = &mut self.slots[idx];
        if let Some(t) = slot.timer.take() {
            env.timers.cancel(t);
        }
        let target = TimerTarget::Reassembly(idx);
        match env.timers.arm(env.config.reassembly_timeout_ms(), target) {
            Some(t) => {
                slot.timer = Some(t);
                true
            }
            None => {
                warn!("no timer for reassembly buffer {}, expiring it now", idx);
                if env.expiry.post(Expired { target, timer: None }).is_err() {
                    // Nothing would ever reclaim it otherwise
                    error!("expiry queue full, releasing reassembly buffer {}", idx);
                    bump(&mut env.counters.stale_packet);
                    self.release(idx, env);
                    return false;
                }
                true
            }
        }
    }

    /// Return a buffer's segment blocks and mark it unused
    fn release<T: Timers>(&mut self, idx: usize, env: &mut RxEnv<'_, T>) {
        let slot = &mut self.slots[idx];
        if slot.state == RxState::Unused {
            return;
        }
        if let Some(t) = slot.timer.take() {
            env.timers.cancel(t);
        }
        while let Some(seg) = slot.segments.pop() {
            if let Err(e) = env.pool.put(seg.block) {
                error!("failed to return segment block: {:?}", e);
            }
        }
        let unicast = slot.dst_addr_mode == AddrMode::Unicast;
        *slot = ReassemblyBuffer::EMPTY;

        match self.in_use.checked_sub(1) {
            Some(n) => self.in_use = n,
            None => error!("reassembly in-use count went negative"),
        }
        if unicast {
            match self.unicast.checked_sub(1) {
                Some(n) => self.unicast = n,
                None => error!("reassembly unicast count went negative"),
            }
        }
    }

    fn check_counts(&self) {
        let in_use = self
            .slots
            .iter()
            .filter(|s| s.state != RxState::Unused)
            .count();
        if in_use != self.in_use || self.unicast > self.in_use {
            error!(
                "reassembly counts out of sync: {} in use, counted {}, {} unicast",
                in_use, self.in_use, self.unicast
            );
        }
    }
}

impl<const RX: usize, const DUP: usize> Default for Receiver<RX, DUP> {
    fn default() -> Self {
        Self::new()
    }
}

fn is_well_formed(frame: &RxFrame<'_>, block_size: usize) -> bool {
    let hdr = &frame.header;
    if usize::from(hdr.segment_count) >= MAX_SEGMENTS || hdr.segment_id > hdr.segment_count {
        return false;
    }
    if !hdr.segmentation && (hdr.segment_count != 0 || hdr.segment_id != 0) {
        return false;
    }
    if frame.payload.len() > block_size.min(PHY_MAX_PAYLOAD) {
        return false;
    }
    !(hdr.carries_length() && usize::from(hdr.length) > MAX_PACKET_LEN)
}
