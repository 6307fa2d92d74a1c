//! Packet identifier allocation for MQTT

use crate::error::{MqttError, Result};
use tracing::error;

const ID_COUNT: usize = u16::MAX as usize;
const WORDS: usize = (ID_COUNT + 1).div_ceil(64);

/// Allocates packet identifiers for outgoing QoS 1/2, SUBSCRIBE and
/// UNSUBSCRIBE exchanges
///
/// Identifiers are in the range 1..=65535. Allocation is round-robin: the
/// search starts just after the last issued identifier and wraps from 65535
/// back to 1, so a freshly released identifier is not reissued while higher
/// free identifiers remain.
#[derive(Debug, Clone)]
pub struct PacketIdAllocator {
    in_use: Box<[u64; WORDS]>,
    last_issued: u16,
    allocated: usize,
}

impl PacketIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_use: Box::new([0; WORDS]),
            last_issued: 0,
            allocated: 0,
        }
    }

    /// Gets the next free packet identifier
    ///
    /// # Errors
    ///
    /// Returns `MqttError::PacketIdExhausted` when all 65535 identifiers are in
    /// flight
    pub fn allocate(&mut self) -> Result<u16> {
        if self.allocated == ID_COUNT {
            return Err(MqttError::PacketIdExhausted);
        }

        let mut candidate = self.last_issued;
        loop {
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !self.is_allocated(candidate) {
                self.set(candidate, true);
                self.last_issued = candidate;
                self.allocated += 1;
                return Ok(candidate);
            }
        }
    }

    /// Marks a specific identifier as in flight
    ///
    /// Used when restoring a persisted session whose flows keep their
    /// original identifiers.
    ///
    /// # Errors
    ///
    /// Returns `MqttError::InvariantViolation` for identifier 0 or one that is
    /// already in flight
    pub fn reserve(&mut self, id: u16) -> Result<()> {
        if id == 0 || self.is_allocated(id) {
            error!(packet_id = id, "packet identifier reserved twice");
            return Err(MqttError::InvariantViolation(format!(
                "packet identifier {id} cannot be reserved"
            )));
        }
        self.set(id, true);
        self.allocated += 1;
        Ok(())
    }

    /// Returns an identifier to the free set
    ///
    /// # Errors
    ///
    /// Returns `MqttError::InvariantViolation` if the identifier is not in
    /// flight, which means flow bookkeeping released it twice
    pub fn release(&mut self, id: u16) -> Result<()> {
        if id == 0 || !self.is_allocated(id) {
            error!(packet_id = id, "released a packet identifier that was not in flight");
            return Err(MqttError::InvariantViolation(format!(
                "packet identifier {id} released while not in flight"
            )));
        }
        self.set(id, false);
        self.allocated -= 1;
        Ok(())
    }

    #[must_use]
    pub fn is_allocated(&self, id: u16) -> bool {
        let (word, bit) = Self::position(id);
        self.in_use[word] & (1 << bit) != 0
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.allocated
    }

    /// Frees every identifier, keeping the round-robin position
    pub fn clear(&mut self) {
        self.in_use.fill(0);
        self.allocated = 0;
    }

    fn set(&mut self, id: u16, in_use: bool) {
        let (word, bit) = Self::position(id);
        if in_use {
            self.in_use[word] |= 1 << bit;
        } else {
            self.in_use[word] &= !(1 << bit);
        }
    }

    fn position(id: u16) -> (usize, u32) {
        let index = usize::from(id);
        (index / 64, u32::from(id) % 64)
    }
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_packet_id_generation() {
        let mut ids = PacketIdAllocator::new();

        assert_eq!(ids.allocate().unwrap(), 1);
        assert_eq!(ids.allocate().unwrap(), 2);
        assert_eq!(ids.allocate().unwrap(), 3);
        assert_eq!(ids.in_flight(), 3);
    }

    #[test]
    fn test_round_robin_skips_released_low_ids() {
        let mut ids = PacketIdAllocator::new();
        for _ in 0..3 {
            ids.allocate().unwrap();
        }
        ids.release(1).unwrap();

        assert_eq!(ids.allocate().unwrap(), 4);
        assert_eq!(ids.allocate().unwrap(), 5);
    }

    #[test]
    fn test_packet_id_wraparound() {
        let mut ids = PacketIdAllocator::new();
        ids.last_issued = u16::MAX - 1;

        assert_eq!(ids.allocate().unwrap(), u16::MAX);
        assert_eq!(ids.allocate().unwrap(), 1);

        // 2 is still in flight after another lap
        ids.last_issued = 1;
        ids.reserve(2).unwrap();
        assert_eq!(ids.allocate().unwrap(), 3);
    }

    #[test]
    fn test_release_errors() {
        let mut ids = PacketIdAllocator::new();
        let id = ids.allocate().unwrap();
        ids.release(id).unwrap();

        assert!(matches!(
            ids.release(id),
            Err(MqttError::InvariantViolation(_))
        ));
        assert!(matches!(
            ids.release(0),
            Err(MqttError::InvariantViolation(_))
        ));
        assert!(matches!(
            ids.release(999),
            Err(MqttError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_reserve_conflicts() {
        let mut ids = PacketIdAllocator::new();
        ids.reserve(10).unwrap();
        assert!(ids.is_allocated(10));
        assert!(ids.reserve(10).is_err());
        assert!(ids.reserve(0).is_err());

        ids.clear();
        assert_eq!(ids.in_flight(), 0);
        assert!(!ids.is_allocated(10));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate,
        Release(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Allocate),
            2 => any::<usize>().prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn test_open_identifiers_are_unique(ops in prop::collection::vec(op_strategy(), 1..400)) {
            let mut ids = PacketIdAllocator::new();
            let mut open: Vec<u16> = Vec::new();

            for op in ops {
                match op {
                    Op::Allocate => {
                        let id = ids.allocate().unwrap();
                        prop_assert!(id != 0);
                        prop_assert!(!open.contains(&id));
                        open.push(id);
                    }
                    Op::Release(index) => {
                        if !open.is_empty() {
                            let id = open.swap_remove(index % open.len());
                            ids.release(id).unwrap();
                        }
                    }
                }
                let unique: HashSet<u16> = open.iter().copied().collect();
                prop_assert_eq!(unique.len(), open.len());
                prop_assert_eq!(ids.in_flight(), open.len());
            }
        }
    }
}
