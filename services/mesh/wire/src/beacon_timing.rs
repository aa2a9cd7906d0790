//! Beacon timing element.

use crate::element::{need, InformationElement, MAX_INFORMATION_FIELD_SIZE};
use crate::{ElementId, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

const UNIT_SIZE: usize = 5;

/// Largest number of neighbors a beacon timing element can report
pub const MAX_BEACON_TIMING_UNITS: usize = MAX_INFORMATION_FIELD_SIZE / UNIT_SIZE;

/// Timing of one neighbor's beacons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconTimingUnit {
    aid: u8,
    last_beacon: u16,
    beacon_interval: u16,
}

impl BeaconTimingUnit {
    /// Association id (low octet)
    pub fn aid(&self) -> u8 {
        self.aid
    }

    /// Last beacon time in 256 µs units, truncated to 16 bits
    pub fn last_beacon(&self) -> u16 {
        self.last_beacon
    }

    /// Beacon interval in time units
    pub fn beacon_interval(&self) -> u16 {
        self.beacon_interval
    }

    /// Last beacon time as a duration (modulo the 16-bit wrap)
    pub fn last_beacon_time(&self) -> Duration {
        Duration::from_micros(u64::from(self.last_beacon) << 8)
    }

    /// Beacon interval as a duration
    pub fn beacon_interval_time(&self) -> Duration {
        Duration::from_micros(u64::from(self.beacon_interval) << 10)
    }
}

/// Beacon timing element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IeBeaconTiming {
    units: Vec<BeaconTimingUnit>,
}

impl IeBeaconTiming {
    /// Empty element
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported neighbors
    pub fn units(&self) -> &[BeaconTimingUnit] {
        &self.units
    }

    /// Add or refresh a neighbor. Returns false when the element is full.
    pub fn add_neighbours_timing_unit(
        &mut self,
        aid: u16,
        last_beacon: Duration,
        beacon_interval: Duration,
    ) -> bool {
        let unit = BeaconTimingUnit {
            aid: (aid & 0xff) as u8,
            last_beacon: timestamp_to_u16(last_beacon),
            beacon_interval: beacon_interval_to_u16(beacon_interval),
        };
        if let Some(existing) = self.units.iter_mut().find(|u| u.aid == unit.aid) {
            *existing = unit;
            return true;
        }
        if self.units.len() >= MAX_BEACON_TIMING_UNITS {
            return false;
        }
        self.units.push(unit);
        true
    }

    /// Forget a neighbor
    pub fn del_neighbours_timing_unit(&mut self, aid: u16) {
        let aid = (aid & 0xff) as u8;
        self.units.retain(|u| u.aid != aid);
    }

    /// Forget every neighbor
    pub fn clear(&mut self) {
        self.units.clear();
    }
}

fn timestamp_to_u16(t: Duration) -> u16 {
    ((t.as_micros() >> 8) & 0xffff) as u16
}

fn beacon_interval_to_u16(t: Duration) -> u16 {
    ((t.as_micros() >> 10) & 0xffff) as u16
}

impl InformationElement for IeBeaconTiming {
    const ELEMENT_ID: ElementId = ElementId::BeaconTiming;

    fn information_field_size(&self) -> usize {
        UNIT_SIZE * self.units.len()
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        for unit in &self.units {
            buf.put_u8(unit.aid);
            buf.put_u16_le(unit.last_beacon);
            buf.put_u16_le(unit.beacon_interval);
        }
    }

    fn deserialize_information_field(buf: &mut Bytes, length: usize) -> Result<Self, WireError> {
        if length % UNIT_SIZE != 0 {
            return Err(WireError::Length {
                element: ElementId::BeaconTiming as u8,
                declared: length,
                consumed: length - length % UNIT_SIZE,
            });
        }
        let mut units = Vec::with_capacity(length / UNIT_SIZE);
        for _ in 0..length / UNIT_SIZE {
            need(buf, UNIT_SIZE)?;
            units.push(BeaconTimingUnit {
                aid: buf.get_u8(),
                last_beacon: buf.get_u16_le(),
                beacon_interval: buf.get_u16_le(),
            });
        }
        Ok(Self { units })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::tu;

    #[test]
    fn test_round_trip() {
        let mut ie = IeBeaconTiming::new();
        ie.add_neighbours_timing_unit(1, Duration::from_millis(300), tu(100));
        ie.add_neighbours_timing_unit(0x0102, Duration::from_secs(20), tu(1000));
        let mut buf = BytesMut::new();
        ie.serialize(&mut buf);
        assert_eq!(buf.len(), 2 + 10);
        assert_eq!(IeBeaconTiming::deserialize(&mut buf.freeze()).unwrap(), ie);
    }

    #[test]
    fn test_unit_conversion() {
        let mut ie = IeBeaconTiming::new();
        ie.add_neighbours_timing_unit(3, Duration::from_micros(256 * 10), tu(100));
        let unit = ie.units()[0];
        assert_eq!(unit.last_beacon(), 10);
        assert_eq!(unit.beacon_interval(), 100);
        assert_eq!(unit.last_beacon_time(), Duration::from_micros(2560));
        assert_eq!(unit.beacon_interval_time(), tu(100));
    }

    #[test]
    fn test_refresh_and_delete() {
        let mut ie = IeBeaconTiming::new();
        ie.add_neighbours_timing_unit(3, Duration::ZERO, tu(100));
        ie.add_neighbours_timing_unit(3, Duration::from_millis(1), tu(100));
        assert_eq!(ie.units().len(), 1);
        ie.del_neighbours_timing_unit(3);
        assert!(ie.units().is_empty());
    }

    #[test]
    fn test_capacity() {
        let mut ie = IeBeaconTiming::new();
        for aid in 0..MAX_BEACON_TIMING_UNITS as u16 {
            assert!(ie.add_neighbours_timing_unit(aid, Duration::ZERO, tu(100)));
        }
        assert!(!ie.add_neighbours_timing_unit(300, Duration::ZERO, tu(100)));
        assert!(ie.information_field_size() <= MAX_INFORMATION_FIELD_SIZE);
    }

    #[test]
    fn test_ragged_length() {
        let mut bytes = Bytes::from_static(&[120, 4, 1, 0, 0, 0]);
        assert!(matches!(
            IeBeaconTiming::deserialize(&mut bytes),
            Err(WireError::Length { .. })
        ));
    }
}
