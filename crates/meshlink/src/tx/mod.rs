//! The transmit path
//!
//! Packets wait in the [`PacketTxQueue`] in priority order. On every
//! scheduling opportunity the packet at its head contributes its next
//! frame to the [`FrameTxQueue`], from which frames are handed to the
//! radio. Radio confirmations flow back the other way.

pub mod frame_queue;
pub mod packet_queue;

pub use frame_queue::{Confirmed, FrameTxQueue, PendingAck, TxFrame};
pub use packet_queue::{
    ConfirmFn, DataConfirm, DataRequest, PacketTxQueue, RejectReason, Scheduled, SubmitError,
};
