//! Universe store
//!
//! Holds the latest channel values received for each universe. Only the
//! receive side writes here; every tick works from a cloned snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Channels per universe
pub const UNIVERSE_SIZE: usize = 512;

/// 15-bit Art-Net port address
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortAddress {
    /// 7 bits
    pub net: u8,
    /// 4 bits
    pub sub_net: u8,
    /// 4 bits
    pub universe: u8,
}

impl PortAddress {
    pub const MAX: u16 = 0x7FFF;

    pub fn new(net: u8, sub_net: u8, universe: u8) -> Self {
        Self {
            net: net & 0x7F,
            sub_net: sub_net & 0x0F,
            universe: universe & 0x0F,
        }
    }

    /// Split a flat 15-bit address; higher bits are masked off
    pub fn from_u16(addr: u16) -> Self {
        Self::new((addr >> 8) as u8, (addr >> 4) as u8, addr as u8)
    }

    pub fn to_u16(self) -> u16 {
        ((self.net as u16) << 8) | ((self.sub_net as u16) << 4) | self.universe as u16
    }

    /// The SubUni byte as it appears on the wire
    pub fn sub_uni(self) -> u8 {
        (self.sub_net << 4) | self.universe
    }
}

impl From<u16> for PortAddress {
    fn from(addr: u16) -> Self {
        Self::from_u16(addr)
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.net, self.sub_net, self.universe)
    }
}

/// Latest state of one universe
#[derive(Clone, Debug)]
pub struct Universe {
    pub address: PortAddress,
    /// Up to 512 channel values
    pub channels: Vec<u8>,
    /// Last sequence byte seen (0 = sequencing disabled)
    pub sequence: u8,
    pub last_received: Instant,
    /// Set when the last packet regressed beyond the tolerance
    pub stale: bool,
}

impl Universe {
    /// Channel value at a 0-based offset, 0 if never received
    pub fn channel(&self, offset: usize) -> u8 {
        self.channels.get(offset).copied().unwrap_or(0)
    }
}

/// A single received universe update
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseUpdate {
    pub address: PortAddress,
    pub sequence: u8,
    pub data: Vec<u8>,
}

/// Result of applying an update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Data applied, but the sequence went backwards more than the tolerance
    AppliedStale,
}

/// Store of the latest values per universe
#[derive(Clone, Debug, Default)]
pub struct UniverseStore {
    universes: BTreeMap<PortAddress, Universe>,
}

impl UniverseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update, flagging staleness without rejecting data
    ///
    /// Sequence numbers wrap at 256 and zero disables the check. A packet is
    /// stale when it lands more than `tolerance` steps behind the previous one.
    pub fn apply(&mut self, update: UniverseUpdate, tolerance: u8) -> ApplyOutcome {
        let now = Instant::now();
        let mut data = update.data;
        data.truncate(UNIVERSE_SIZE);

        let stale = match self.universes.get(&update.address) {
            Some(prev) => is_stale(prev.sequence, update.sequence, tolerance),
            None => false,
        };

        self.universes.insert(
            update.address,
            Universe {
                address: update.address,
                channels: data,
                sequence: update.sequence,
                last_received: now,
                stale,
            },
        );

        if stale {
            ApplyOutcome::AppliedStale
        } else {
            ApplyOutcome::Applied
        }
    }

    pub fn get(&self, address: PortAddress) -> Option<&Universe> {
        self.universes.get(&address)
    }

    /// Channel value, 0 for missing universes or channels
    pub fn channel(&self, address: PortAddress, offset: usize) -> u8 {
        self.get(address).map(|u| u.channel(offset)).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.universes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.universes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Universe> {
        self.universes.values()
    }
}

/// Sequence regression check with wraparound
///
/// The distance is measured backwards modulo 256; forward jumps of any size
/// are accepted, and so is the repeat of a sequence number.
fn is_stale(previous: u8, current: u8, tolerance: u8) -> bool {
    if previous == 0 || current == 0 {
        return false;
    }
    let behind = previous.wrapping_sub(current);
    // Beyond half the ring a packet counts as ahead, not behind
    behind != 0 && behind < 128 && behind > tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(universe: u16, sequence: u8, data: Vec<u8>) -> UniverseUpdate {
        UniverseUpdate {
            address: PortAddress::from_u16(universe),
            sequence,
            data,
        }
    }

    #[test]
    fn test_port_address_roundtrip() {
        let addr = PortAddress::new(3, 0xA, 0x5);
        assert_eq!(addr.to_u16(), 0x3A5);
        assert_eq!(PortAddress::from_u16(0x3A5), addr);
        assert_eq!(addr.sub_uni(), 0xA5);
    }

    #[test]
    fn test_port_address_masks_high_bits() {
        let addr = PortAddress::from_u16(0xFFFF);
        assert_eq!(addr.to_u16(), PortAddress::MAX);
    }

    #[test]
    fn test_apply_and_read() {
        let mut store = UniverseStore::new();
        store.apply(update(1, 1, vec![10, 20, 30]), 0);
        assert_eq!(store.channel(PortAddress::from_u16(1), 1), 20);
        assert_eq!(store.channel(PortAddress::from_u16(1), 100), 0);
        assert_eq!(store.channel(PortAddress::from_u16(2), 0), 0);
    }

    #[test]
    fn test_truncates_to_512() {
        let mut store = UniverseStore::new();
        store.apply(update(0, 0, vec![1; 600]), 0);
        assert_eq!(store.get(PortAddress::default()).unwrap().channels.len(), UNIVERSE_SIZE);
    }

    #[test]
    fn test_stale_detection_applies_data() {
        let mut store = UniverseStore::new();
        assert_eq!(store.apply(update(1, 50, vec![1]), 4), ApplyOutcome::Applied);
        // Small reorder inside the tolerance
        assert_eq!(store.apply(update(1, 48, vec![2]), 4), ApplyOutcome::Applied);
        // Regression beyond the tolerance still lands
        assert_eq!(store.apply(update(1, 30, vec![3]), 4), ApplyOutcome::AppliedStale);
        let u = store.get(PortAddress::from_u16(1)).unwrap();
        assert!(u.stale);
        assert_eq!(u.channels, vec![3]);
    }

    #[test]
    fn test_sequence_wraparound_is_not_stale() {
        assert!(!is_stale(255, 1, 0));
        assert!(!is_stale(250, 3, 2));
        assert!(is_stale(3, 250, 2));
    }

    #[test]
    fn test_zero_sequence_disables_check() {
        assert!(!is_stale(0, 100, 0));
        assert!(!is_stale(100, 0, 0));
    }
}
