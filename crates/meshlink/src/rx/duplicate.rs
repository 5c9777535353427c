//! Per-peer memory of recently finished packets
//!
//! Once a packet has been delivered (or abandoned) its reassembly buffer is
//! gone, but the sender may still repeat its last frame. Each entry here
//! remembers the last packet id seen from one peer until its timer runs
//! out, so those late repeats are still recognized.

use crate::{
    MacAddr,
    config::MacConfig,
    logging::{debug, trace, warn},
    timer::{TimerId, TimerTarget, Timers},
};

#[derive(Debug, Clone, Copy)]
struct DuplicateEntry {
    in_use: bool,
    src_addr: MacAddr,
    packet_id: u8,
    timer: Option<TimerId>,
}

impl DuplicateEntry {
    const EMPTY: Self = Self {
        in_use: false,
        src_addr: MacAddr::UNSET,
        packet_id: 0,
        timer: None,
    };
}

/// A bounded table of (peer, last packet id) pairs
pub struct DuplicateTracker<const N: usize> {
    entries: [DuplicateEntry; N],
}

impl<const N: usize> DuplicateTracker<N> {
    pub const fn new() -> Self {
        Self {
            entries: [DuplicateEntry::EMPTY; N],
        }
    }

    /// Entries currently tracking a peer
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.in_use).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(|e| e.in_use)
    }

    /// Is `packet_id` the last packet remembered for `addr`?
    pub fn contains(&self, addr: MacAddr, packet_id: u8) -> bool {
        self.entries
            .iter()
            .any(|e| e.in_use && e.src_addr == addr && e.packet_id == packet_id)
    }

    pub(crate) fn find(&self, addr: MacAddr) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.in_use && e.src_addr == addr)
    }

    pub(crate) fn packet_id(&self, idx: usize) -> Option<u8> {
        self.entries.get(idx).filter(|e| e.in_use).map(|e| e.packet_id)
    }

    /// Restart the timer of an entry that just caught a duplicate
    pub(crate) fn refresh<T: Timers>(&mut self, idx: usize, timers: &mut T, config: &MacConfig) {
        if let Some(t) = self.entries.get_mut(idx).and_then(|e| e.timer.take()) {
            timers.cancel(t);
        }
        self.arm(idx, timers, config);
    }

    /// Forget a peer, typically because it moved on to a new packet
    pub(crate) fn remove<T: Timers>(&mut self, idx: usize, timers: &mut T) {
        let Some(entry) = self.entries.get_mut(idx) else {
            return;
        };
        if let Some(t) = entry.timer.take() {
            timers.cancel(t);
        }
        trace!("forgetting packet {} from {}", entry.packet_id, entry.src_addr);
        *entry = DuplicateEntry::EMPTY;
    }

    /// Start remembering `packet_id` for `addr`.
    ///
    /// Returns `false` if every entry is busy.
    pub(crate) fn insert<T: Timers>(
        &mut self,
        addr: MacAddr,
        packet_id: u8,
        timers: &mut T,
        config: &MacConfig,
    ) -> bool {
        let idx = match self.find(addr) {
            Some(idx) => {
                if let Some(t) = self.entries[idx].timer.take() {
                    timers.cancel(t);
                }
                idx
            }
            None => match self.entries.iter().position(|e| !e.in_use) {
                Some(idx) => idx,
                None => return false,
            },
        };

        self.entries[idx] = DuplicateEntry {
            in_use: true,
            src_addr: addr,
            packet_id,
            timer: None,
        };
        self.arm(idx, timers, config);
        true
    }

    /// Handle a fired timer. Returns `true` if it released an entry.
    pub(crate) fn expire(&mut self, idx: usize, timer: Option<TimerId>) -> bool {
        let Some(entry) = self.entries.get_mut(idx) else {
            return false;
        };
        if !entry.in_use || entry.timer != timer {
            return false;
        }
        debug!("done tracking packet {} from {}", entry.packet_id, entry.src_addr);
        *entry = DuplicateEntry::EMPTY;
        true
    }

    fn arm<T: Timers>(&mut self, idx: usize, timers: &mut T, config: &MacConfig) {
        let Some(entry) = self.entries.get_mut(idx) else {
            return;
        };
        if config.packet_timeout_ms == 0 {
            *entry = DuplicateEntry::EMPTY;
            return;
        }
        match timers.arm(
            u32::from(config.packet_timeout_ms),
            TimerTarget::Duplicate(idx),
        ) {
            Some(t) => entry.timer = Some(t),
            None => {
                warn!("no timer for duplicate entry {}, releasing it", idx);
                *entry = DuplicateEntry::EMPTY;
            }
        }
    }
}

impl<const N: usize> Default for DuplicateTracker<N> {
    fn default() -> Self {
        Self::new()
    }
}
