//! # Meshlink
//!
//! The link-layer frame and packet management core of a radio mesh endpoint.
//!
//! Meshlink sits between a radio that moves frames of at most a few hundred
//! bytes and a network layer that wants to move whole packets. It:
//!
//! 1. Splits outbound packets into radio sized frames, and reassembles
//!    inbound frames into packets.
//! 2. Recognizes frames that were repeated by link-layer retransmission,
//!    both while a packet is being reassembled and shortly after it was
//!    delivered.
//! 3. Orders a bounded set of outbound packets by priority, evicting
//!    droppable traffic when the queue is full.
//! 4. Does all of the above out of fixed-block [`blockpool`] pools, with
//!    no general purpose heap.
//!
//! The [`LinkCore`] owns every table and is meant to be driven by a single
//! task. The buffer pools are the only state shared with other contexts;
//! timer expiries reach the task through an [`ExpiryQueue`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod config;
pub mod counters;
pub mod frame;
pub mod interface;
pub mod link;
pub(crate) mod logging;
pub mod rx;
pub mod timer;
pub mod tx;

use core::fmt;

use serde::{Deserialize, Serialize};

pub use blockpool;
pub use config::{ConfigError, MacConfig};
pub use counters::MacCounters;
pub use frame::FrameHeader;
pub use interface::{DataIndication, Radio, RadioError, RxFrame, UpperLayer};
pub use link::{EndpointLinkCore, LinkCore};
pub use logging::{set_internal_log_sink, silence_internal_logs};
pub use rx::{DropReason, RxOutcome, RxState};
pub use timer::{ExpiryChannel, ExpiryQueue, Expired, TimerId, TimerTarget, Timers};
pub use tx::{ConfirmFn, DataConfirm, DataRequest, RejectReason, Scheduled, SubmitError};

/// Bytes in a MAC address
pub const MAC_ADDRESS_SIZE: usize = 5;

/// Largest payload the radio will ever carry in one frame
pub const PHY_MAX_PAYLOAD: usize = 239;

/// Most segments a single packet may be split into
pub const MAX_SEGMENTS: usize = 12;

/// Largest packet that can be segmented or reassembled
pub const MAX_PACKET_LEN: usize = MAX_SEGMENTS * PHY_MAX_PAYLOAD;

/// Sequence number used to report a plain radio confirmation rather than
/// a per-segment ARQ acknowledgment
pub const NON_ARQ_SEQUENCE: u8 = 0xFF;

/// A 40 bit MAC address
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; MAC_ADDRESS_SIZE]);

impl MacAddr {
    pub const UNSET: Self = Self([0; MAC_ADDRESS_SIZE]);
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}")
    }
}

/// The kind of a MAC frame
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameType(pub u8);

impl FrameType {
    pub const DATA: Self = Self(1);
    pub const ACK: Self = Self(2);
    pub const CMD: Self = Self(3);
}

/// How the destination of a frame is addressed
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddrMode {
    #[default]
    Broadcast,
    Unicast,
}

/// Reliability class of an outbound packet, mapped to a retry count by
/// [`MacConfig::retry_count()`]
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reliability {
    #[default]
    Low,
    Medium,
    High,
}

/// Status of a transmission, as reported by the radio or to a submitter
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DataStatus {
    Success,
    MacIdle,
    TransactionOverflow,
    TransactionFailed,
    InvalidParameter,
    InvalidHandle,
}
