//! The link core
//!
//! [`LinkCore`] owns the receive tables, the frame queue and the packet
//! queue. It is not internally locked: it belongs to one task, which calls
//! into it for everything:
//!
//! 1. The network layer side: [`submit()`](LinkCore::submit),
//!    [`purge()`](LinkCore::purge) and [`flush()`](LinkCore::flush).
//! 2. The radio side: [`schedule()`](LinkCore::schedule) and
//!    [`transmit_next()`](LinkCore::transmit_next) once per transmit
//!    opportunity, [`phy_confirm()`](LinkCore::phy_confirm) when the radio
//!    finished a frame, and [`receive()`](LinkCore::receive) for every
//!    inbound frame.
//! 3. Housekeeping: [`check_timeouts()`](LinkCore::check_timeouts) whenever
//!    the expiry queue may have been posted to.
//!
//! The buffer pools and the expiry queue are borrowed, so they can live in
//! `static`s shared with interrupt and timer context.

use blockpool::BlockPool;

use crate::{
    DataStatus, FrameType, MacAddr, NON_ARQ_SEQUENCE, PHY_MAX_PAYLOAD,
    config::{ConfigError, MacConfig},
    counters::{MacCounters, bump},
    interface::{Radio, RxFrame, UpperLayer},
    logging::{debug, error, warn},
    rx::{Receiver, RxEnv, RxOutcome},
    timer::{ExpiryChannel, Timers},
    tx::{
        Confirmed, DataConfirm, DataRequest, FrameTxQueue, PacketTxQueue, Scheduled, SubmitError,
    },
};

/// Concurrent inbound packets on the deployed endpoint
pub const NUM_CONCURRENT_RX_BUFFERS: usize = 5;
/// Peers remembered for duplicate detection on the deployed endpoint
pub const NUM_NODES_TRACKED: usize = 10;
/// Frame buffers on the deployed endpoint
pub const MAX_MAC_FRAME_BUFFERS: usize = 12;
/// Outbound packets on the deployed endpoint
pub const MAX_TX_PACKET_BUFFERS: usize = 20;
/// Segment blocks on the deployed endpoint
pub const SEGMENT_STORAGE_POOL_SIZE: usize = 26;

/// A [`LinkCore`] sized like the deployed endpoint
pub type EndpointLinkCore<'a, P> = LinkCore<
    'a,
    P,
    NUM_CONCURRENT_RX_BUFFERS,
    NUM_NODES_TRACKED,
    MAX_MAC_FRAME_BUFFERS,
    MAX_TX_PACKET_BUFFERS,
>;

/// The link-layer core
///
/// * `P` is the payload type of submitted packets
/// * `RX` is the number of packets that may be reassembled at once
/// * `DUP` is the number of peers remembered after their packet finished
/// * `TXF` is the depth of the frame queue
/// * `TXP` is the depth of the packet queue
pub struct LinkCore<
    'a,
    P,
    const RX: usize,
    const DUP: usize,
    const TXF: usize,
    const TXP: usize,
> {
    config: MacConfig,
    counters: MacCounters,
    segment_pool: &'a dyn BlockPool,
    frame_pool: &'a dyn BlockPool,
    expiry: &'a dyn ExpiryChannel,
    receiver: Receiver<RX, DUP>,
    frames: FrameTxQueue<TXF>,
    packets: PacketTxQueue<P, TXP>,
}

// ---- impl LinkCore ----

impl<'a, P, const RX: usize, const DUP: usize, const TXF: usize, const TXP: usize>
    LinkCore<'a, P, RX, DUP, TXF, TXP>
{
    /// Create a link core.
    ///
    /// `segment_pool` backs reassembly, `frame_pool` backs outbound frames.
    /// Both must have blocks large enough for a full radio payload.
    pub fn new(
        config: MacConfig,
        segment_pool: &'a dyn BlockPool,
        frame_pool: &'a dyn BlockPool,
        expiry: &'a dyn ExpiryChannel,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if segment_pool.block_size() < PHY_MAX_PAYLOAD || frame_pool.block_size() < PHY_MAX_PAYLOAD
        {
            return Err(ConfigError::BlockTooSmall);
        }
        Ok(Self {
            config,
            counters: MacCounters::new(),
            segment_pool,
            frame_pool,
            expiry,
            receiver: Receiver::new(),
            frames: FrameTxQueue::new(),
            packets: PacketTxQueue::new(),
        })
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    /// Replace the attributes. Rejected configurations leave the current
    /// one in place.
    pub fn set_config(&mut self, config: MacConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn counters(&self) -> &MacCounters {
        &self.counters
    }

    pub fn receiver(&self) -> &Receiver<RX, DUP> {
        &self.receiver
    }

    pub fn packets(&self) -> &PacketTxQueue<P, TXP> {
        &self.packets
    }

    pub fn frames(&self) -> &FrameTxQueue<TXF> {
        &self.frames
    }

    /// Cancel a queued packet. Its callback is not invoked.
    pub fn purge(&mut self, handle: u16) -> bool {
        self.packets.purge(handle)
    }

    /// Cancel every queued packet. No callbacks are invoked.
    pub fn flush(&mut self) {
        self.packets.flush();
    }

    /// Owe `dst_addr` an acknowledgment for request number `req_num`
    pub fn request_ack(&mut self, dst_addr: MacAddr, req_num: u8) {
        self.packets.request_ack(dst_addr, req_num);
    }

    /// Outbound packets queued, including the one in progress
    pub fn tx_queue_len(&self) -> usize {
        self.packets.len()
    }

    /// Is anything waiting to go out, or out and unconfirmed?
    pub fn is_tx_message_pending(&self) -> bool {
        !self.packets.is_empty() || !self.frames.is_empty()
    }

    pub fn is_packet_in_reassembly(&self) -> bool {
        self.receiver.is_packet_in_reassembly()
    }

    pub fn is_unicast_packet_in_reassembly(&self) -> bool {
        self.receiver.is_unicast_packet_in_reassembly()
    }

    pub fn is_unit_transmitting(&self, addr: MacAddr) -> bool {
        self.receiver.is_unit_transmitting(addr)
    }

    /// Hand the next frame to the radio, if one is ready and none is in
    /// flight. Returns `true` if the radio took a frame.
    pub fn transmit_next<R: Radio>(&mut self, radio: &mut R) -> bool {
        let frame = self.frames.next_to_send(
            self.frame_pool,
            &self.config,
            self.packets.pending_ack_mut(),
        );
        let Some(frame) = frame else {
            return false;
        };

        let mut buf = [0u8; PHY_MAX_PAYLOAD];
        let Some(payload) = frame.read_payload(self.frame_pool, &mut buf) else {
            error!("unreadable frame buffer");
            return false;
        };
        match radio.transmit(&frame.header, payload, frame.channel) {
            Ok(()) => {
                frame.mark_sent();
                bump(&mut self.counters.tx_frame);
                true
            }
            Err(e) => {
                debug!("radio did not take frame: {:?}", e);
                false
            }
        }
    }

    /// Process a frame from the radio
    pub fn receive<T: Timers, U: UpperLayer>(
        &mut self,
        frame: &RxFrame<'_>,
        timers: &mut T,
        upper: &mut U,
    ) -> RxOutcome {
        let mut env = RxEnv {
            pool: self.segment_pool,
            timers,
            expiry: self.expiry,
            config: &self.config,
            counters: &mut self.counters,
        };
        self.receiver.receive(frame, &mut env, upper)
    }

    /// Drain the expiry queue, releasing whatever timed out.
    ///
    /// Returns the number of buffers and entries released.
    pub fn check_timeouts<T: Timers>(&mut self, timers: &mut T) -> usize {
        let mut env = RxEnv {
            pool: self.segment_pool,
            timers,
            expiry: self.expiry,
            config: &self.config,
            counters: &mut self.counters,
        };
        let mut released = 0;
        while let Some(expired) = self.expiry.take() {
            if self.receiver.expire(expired, &mut env) {
                released += 1;
            }
        }
        released
    }
}

impl<P, const RX: usize, const DUP: usize, const TXF: usize, const TXP: usize>
    LinkCore<'_, P, RX, DUP, TXF, TXP>
where
    P: AsRef<[u8]>,
{
    /// Queue a packet for transmission.
    ///
    /// Returns the request's handle. A rejected request is handed back in
    /// the error.
    pub fn submit(
        &mut self,
        request: DataRequest<P>,
        frame_type: FrameType,
    ) -> Result<u16, SubmitError<P>> {
        self.packets.submit(request, frame_type, &mut self.counters)
    }

    /// Let the packet at the head of the queue produce its next frame.
    ///
    /// A packet may also finish here without producing a frame, when the
    /// radio can not carry it.
    pub fn schedule<R: Radio>(&mut self, radio: &mut R) -> Scheduled {
        self.packets.get_next_frame(
            &mut self.frames,
            self.frame_pool,
            radio,
            &self.config,
            &mut self.counters,
        )
    }

    /// One transmit opportunity: [`schedule()`](Self::schedule), then
    /// [`transmit_next()`](Self::transmit_next).
    ///
    /// A packet that finishes without producing a frame is reported to its
    /// callback only. Call the two halves directly to get its
    /// [`DataConfirm`].
    pub fn poll_tx<R: Radio>(&mut self, radio: &mut R) -> bool {
        self.schedule(radio);
        self.transmit_next(radio)
    }

    /// The radio finished the frame it was given.
    ///
    /// Returns the confirmation of the packet if this finished it. The
    /// packet's callback has been invoked by then.
    pub fn phy_confirm(&mut self, status: DataStatus) -> Option<DataConfirm> {
        match self.frames.on_phy_confirm(self.frame_pool) {
            Confirmed::Data => self.packets.acknowledge(
                NON_ARQ_SEQUENCE,
                status,
                &self.config,
                &mut self.counters,
            ),
            Confirmed::AckOnly => {
                if status != DataStatus::Success {
                    warn!("ack-only frame failed: {:?}", status);
                }
                None
            }
            Confirmed::Retained | Confirmed::Nothing => None,
        }
    }
}
