//! Configuration attributes
//!
//! The MAC only reads these. Table sizes are not attributes, they are
//! const generics of [`LinkCore`](crate::LinkCore).

use serde::{Deserialize, Serialize};

use crate::{MacAddr, Reliability};

/// Largest retry count a reliability class may map to
pub const RELIABILITY_RANGE_MAX: u8 = 7;

/// Largest number of unacknowledged frames allowed with ARQ
pub const MAC_ACK_WINDOW: u8 = 8;

/// Runtime attributes consumed by the link core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacConfig {
    /// Time allowed for all segments of a packet to arrive, in seconds
    pub reassembly_timeout_s: u8,
    /// How long a delivered packet id is remembered per peer, in
    /// milliseconds. Zero disables duplicate tracking after delivery.
    pub packet_timeout_ms: u16,
    /// Outstanding frame limit when ARQ is in use
    pub arq_window: u8,
    pub reliability_low_count: u8,
    pub reliability_medium_count: u8,
    pub reliability_high_count: u8,
    pub network_id: u8,
    pub mac_address: MacAddr,
}

#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    ReliabilityOutOfRange,
    ArqWindowOutOfRange,
    /// A pool's blocks can not hold a full radio frame payload
    BlockTooSmall,
}

impl MacConfig {
    pub const DEFAULT: Self = Self {
        reassembly_timeout_s: 60,
        packet_timeout_ms: 2000,
        arq_window: MAC_ACK_WINDOW,
        reliability_low_count: 0,
        reliability_medium_count: 1,
        reliability_high_count: 2,
        network_id: 0,
        mac_address: MacAddr::UNSET,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            self.reliability_low_count,
            self.reliability_medium_count,
            self.reliability_high_count,
        ];
        if counts.iter().any(|c| *c > RELIABILITY_RANGE_MAX) {
            return Err(ConfigError::ReliabilityOutOfRange);
        }
        if self.arq_window == 0 || self.arq_window > MAC_ACK_WINDOW {
            return Err(ConfigError::ArqWindowOutOfRange);
        }
        Ok(())
    }

    /// Whole-packet retries for a reliability class
    pub fn retry_count(&self, reliability: Reliability) -> u8 {
        match reliability {
            Reliability::Low => self.reliability_low_count,
            Reliability::Medium => self.reliability_medium_count,
            Reliability::High => self.reliability_high_count,
        }
    }

    pub fn reassembly_timeout_ms(&self) -> u32 {
        u32::from(self.reassembly_timeout_s) * 1000
    }
}

impl Default for MacConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = MacConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.reassembly_timeout_ms(), 60_000);
        assert_eq!(cfg.retry_count(Reliability::Low), 0);
        assert_eq!(cfg.retry_count(Reliability::Medium), 1);
        assert_eq!(cfg.retry_count(Reliability::High), 2);
    }

    #[test]
    fn rejects_out_of_range() {
        let cfg = MacConfig {
            reliability_high_count: RELIABILITY_RANGE_MAX + 1,
            ..MacConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ReliabilityOutOfRange));

        let cfg = MacConfig {
            arq_window: 0,
            ..MacConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ArqWindowOutOfRange));
    }
}
