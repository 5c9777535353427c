//! Monotonic event counters kept for field diagnostics

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacCounters {
    /// Frames dropped for lack of a reassembly slot or segment blocks
    pub rx_overflow: u32,
    /// Frames dropped because their header did not fit the packet they
    /// claimed to belong to
    pub malformed_frame: u32,
    pub accepted_frame: u32,
    pub duplicate_frame: u32,
    /// Packets abandoned when their reassembly timer fired
    pub stale_packet: u32,
    /// Packets reassembled and delivered upward
    pub packet_received: u32,
    pub tx_packet: u32,
    pub tx_packet_failed: u32,
    /// Packets the transmit queue refused for lack of room
    pub transaction_overflow: u32,
    /// Queued packets evicted to make room for a more urgent one
    pub tx_packet_evicted: u32,
    pub tx_frame: u32,
}

impl MacCounters {
    pub const fn new() -> Self {
        Self {
            rx_overflow: 0,
            malformed_frame: 0,
            accepted_frame: 0,
            duplicate_frame: 0,
            stale_packet: 0,
            packet_received: 0,
            tx_packet: 0,
            tx_packet_failed: 0,
            transaction_overflow: 0,
            tx_packet_evicted: 0,
            tx_frame: 0,
        }
    }
}

#[inline]
pub(crate) fn bump(ctr: &mut u32) {
    *ctr = ctr.wrapping_add(1);
}
