//! Live sensor state and the threshold/discrete event engine.

use nonmax::NonMaxU8;

use crate::proto::{CmdResult, CompletionCode, LogicalUnit};

/// Event/reading type code of threshold-based sensors.
pub const THRESHOLD_EVENT_CODE: u8 = 0x01;

/// Read/write capability of a sensor's hysteresis or threshold values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSupport {
    None,
    Readable,
    Settable,
    /// Fixed values that the wire can neither read nor change.
    Fixed,
}

impl AccessSupport {
    fn readable(self) -> bool {
        matches!(self, Self::Readable | Self::Settable)
    }

    fn settable(self) -> bool {
        matches!(self, Self::Settable)
    }
}

/// Granularity at which event generation can be controlled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSupport {
    /// Individual assertion/deassertion bits can be enabled.
    PerState,
    /// Only the whole sensor can be switched.
    EntireSensor,
    /// Only the global event enable applies; the command set is refused.
    GlobalEnable,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDirection {
    Assert,
    Deassert,
}

/// An event a sensor wants delivered; the owning MC supplies source
/// addressing and routes it to the configured event receiver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventRequest {
    pub direction: EventDirection,
    pub data: [u8; 3],
}

/// One sensor on one LUN of a management controller.
pub struct Sensor {
    num: NonMaxU8,
    lun: LogicalUnit,
    sensor_type: u8,
    event_reading_code: u8,
    value: u8,
    scanning_enabled: bool,
    events_enabled: bool,
    hysteresis_support: AccessSupport,
    positive_hysteresis: u8,
    negative_hysteresis: u8,
    threshold_support: AccessSupport,
    threshold_supported: [bool; 6],
    thresholds: [u8; 6],
    event_support: EventSupport,
    assert_supported: u16,
    deassert_supported: u16,
    assert_enabled: u16,
    deassert_enabled: u16,
    event_status: u16,
}

impl Sensor {
    pub(crate) fn new(
        num: NonMaxU8,
        lun: LogicalUnit,
        sensor_type: u8,
        event_reading_code: u8,
    ) -> Self {
        Self {
            num,
            lun,
            sensor_type,
            event_reading_code,
            value: 0,
            scanning_enabled: true,
            events_enabled: true,
            hysteresis_support: AccessSupport::None,
            positive_hysteresis: 0,
            negative_hysteresis: 0,
            threshold_support: AccessSupport::None,
            threshold_supported: [false; 6],
            thresholds: [0; 6],
            event_support: EventSupport::PerState,
            assert_supported: 0,
            deassert_supported: 0,
            assert_enabled: 0,
            deassert_enabled: 0,
            event_status: 0,
        }
    }

    pub fn num(&self) -> u8 {
        self.num.get()
    }

    pub fn lun(&self) -> LogicalUnit {
        self.lun
    }

    pub fn sensor_type(&self) -> u8 {
        self.sensor_type
    }

    pub fn event_reading_code(&self) -> u8 {
        self.event_reading_code
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn event_status(&self) -> u16 {
        self.event_status
    }

    pub(crate) fn events_enabled(&self) -> bool {
        self.events_enabled
    }

    // Configuration-side setters.

    pub fn set_hysteresis_support(&mut self, support: AccessSupport) {
        self.hysteresis_support = support;
    }

    pub fn set_hysteresis(&mut self, positive: u8, negative: u8) {
        self.positive_hysteresis = positive;
        self.negative_hysteresis = negative;
    }

    pub fn set_threshold_support(&mut self, support: AccessSupport) {
        self.threshold_support = support;
    }

    pub fn set_threshold_supported(&mut self, supported: [bool; 6]) {
        self.threshold_supported = supported;
    }

    pub fn set_thresholds(&mut self, thresholds: [u8; 6]) {
        self.thresholds = thresholds;
    }

    pub fn set_event_support(&mut self, support: EventSupport) {
        self.event_support = support;
    }

    pub fn set_events_enabled(&mut self, enabled: bool) {
        self.events_enabled = enabled;
    }

    pub fn set_scanning_enabled(&mut self, enabled: bool) {
        self.scanning_enabled = enabled;
    }

    /// Event bits run 0..15; higher mask bits are ignored.
    pub fn set_assert_event_supported(&mut self, mask: u16) {
        self.assert_supported = mask & 0x7FFF;
    }

    pub fn set_deassert_event_supported(&mut self, mask: u16) {
        self.deassert_supported = mask & 0x7FFF;
    }

    pub fn set_assert_event_enabled(&mut self, mask: u16) {
        self.assert_enabled = mask & 0x7FFF;
    }

    pub fn set_deassert_event_enabled(&mut self, mask: u16) {
        self.deassert_enabled = mask & 0x7FFF;
    }

    // Internal mutators used by the configuration API.

    pub(crate) fn set_value_internal(&mut self, value: u8, out: &mut Vec<EventRequest>) {
        self.value = value;
        self.check_thresholds(out);
    }

    pub(crate) fn set_bit_internal(&mut self, bit: u8, value: bool, out: &mut Vec<EventRequest>) {
        let mask = 1u16 << bit;
        let current = self.event_status & mask != 0;

        if current == value {
            return;
        }

        if value {
            self.event_status |= mask;
            if self.assert_enabled & mask != 0 {
                out.push(EventRequest {
                    direction: EventDirection::Assert,
                    data: [bit, 0, 0],
                });
            }
        } else {
            self.event_status &= !mask;
            if self.deassert_enabled & mask != 0 {
                out.push(EventRequest {
                    direction: EventDirection::Deassert,
                    data: [bit, 0, 0],
                });
            }
        }
    }

    /// Re-evaluate every supported threshold against the current value.
    ///
    /// Lower thresholds (slots 0..3) assert at `value <= threshold` and
    /// deassert once the value has climbed past the threshold by more
    /// than the negative hysteresis; upper thresholds (slots 3..6)
    /// mirror that with the positive hysteresis. Assertion itself has no
    /// hysteresis band.
    pub(crate) fn check_thresholds(&mut self, out: &mut Vec<EventRequest>) {
        let value = self.value as i32;
        let mut to_set = 0u16;
        let mut to_clear = 0u16;

        for i in 0..3 {
            if self.threshold_supported[i] {
                let threshold = self.thresholds[i] as i32;
                if value <= threshold {
                    to_set |= 1 << i;
                } else if value - self.negative_hysteresis as i32 > threshold {
                    to_clear |= 1 << i;
                }
            }
        }

        for i in 3..6 {
            if self.threshold_supported[i] {
                let threshold = self.thresholds[i] as i32;
                if value >= threshold {
                    to_set |= 1 << i;
                } else if value + (self.positive_hysteresis as i32) < threshold {
                    to_clear |= 1 << i;
                }
            }
        }

        for i in 0..6 {
            let bit = 1u16 << i;
            let offset = (if i < 3 { 2 * i } else { 2 * (i - 3) + 1 }) as u8;

            if to_set & bit != 0 && self.event_status & bit == 0 {
                self.event_status |= bit;
                if self.assert_enabled & (1 << offset) != 0 {
                    out.push(EventRequest {
                        direction: EventDirection::Assert,
                        data: [0x50 | offset, self.value, self.thresholds[i]],
                    });
                }
            } else if to_clear & bit != 0 && self.event_status & bit != 0 {
                self.event_status &= !bit;
                if self.deassert_enabled & (1 << offset) != 0 {
                    out.push(EventRequest {
                        direction: EventDirection::Deassert,
                        data: [0x50 | offset, self.value, self.thresholds[i]],
                    });
                }
            }
        }
    }

    // Wire command handlers. Request length is validated by the caller
    // before the sensor is looked up; offsets below are into the full
    // command data, whose byte 0 is the sensor number.

    pub(crate) fn get_hysteresis_cmd(&self) -> CmdResult {
        if !self.hysteresis_support.readable() {
            return Err(CompletionCode::InvalidCommand);
        }

        Ok(vec![self.positive_hysteresis, self.negative_hysteresis])
    }

    pub(crate) fn set_hysteresis_cmd(&mut self, data: &[u8]) -> CmdResult {
        if !self.hysteresis_support.settable() {
            return Err(CompletionCode::InvalidCommand);
        }

        self.positive_hysteresis = data[2];
        self.negative_hysteresis = data[3];

        Ok(Vec::new())
    }

    pub(crate) fn get_thresholds_cmd(&self) -> CmdResult {
        if self.event_reading_code != THRESHOLD_EVENT_CODE || !self.threshold_support.readable() {
            return Err(CompletionCode::InvalidCommand);
        }

        let mut rsp = vec![0u8; 7];
        for i in 0..6 {
            if self.threshold_supported[i] {
                rsp[0] |= 1 << i;
                rsp[1 + i] = self.thresholds[i];
            }
        }

        Ok(rsp)
    }

    pub(crate) fn set_thresholds_cmd(
        &mut self,
        data: &[u8],
        out: &mut Vec<EventRequest>,
    ) -> CmdResult {
        if self.event_reading_code != THRESHOLD_EVENT_CODE || !self.threshold_support.settable() {
            return Err(CompletionCode::InvalidCommand);
        }

        for i in 0..6 {
            if data[1] & (1 << i) != 0 && !self.threshold_supported[i] {
                return Err(CompletionCode::ParameterOutOfRange);
            }
        }

        for i in 0..6 {
            if data[1] & (1 << i) != 0 {
                self.thresholds[i] = data[2 + i];
            }
        }

        self.check_thresholds(out);

        Ok(Vec::new())
    }

    pub(crate) fn get_event_enable_cmd(&self) -> CmdResult {
        if matches!(
            self.event_support,
            EventSupport::GlobalEnable | EventSupport::None
        ) {
            return Err(CompletionCode::InvalidCommand);
        }

        let flags = (u8::from(self.events_enabled) << 7) | (u8::from(self.scanning_enabled) << 6);

        let mut rsp = vec![flags, 0, 0, 0, 0];
        rsp[1..3].copy_from_slice(&self.assert_enabled.to_le_bytes());
        rsp[3..5].copy_from_slice(&self.deassert_enabled.to_le_bytes());

        Ok(rsp)
    }

    pub(crate) fn set_event_enable_cmd(&mut self, data: &[u8]) -> CmdResult {
        if matches!(
            self.event_support,
            EventSupport::GlobalEnable | EventSupport::None
        ) {
            return Err(CompletionCode::InvalidCommand);
        }

        let op = (data[1] >> 4) & 0x03;

        if self.event_support == EventSupport::EntireSensor && op != 0 {
            return Err(CompletionCode::InvalidCommand);
        }

        if op == 3 {
            return Err(CompletionCode::InvalidDataField);
        }

        self.events_enabled = data[1] & 0x80 != 0;
        self.scanning_enabled = data[1] & 0x40 != 0;

        let byte = |i: usize| data.get(i).copied().unwrap_or(0);
        let assert_mask = u16::from_le_bytes([byte(2), byte(3)]) & 0x7FFF;
        let deassert_mask = u16::from_le_bytes([byte(4), byte(5)]) & 0x7FFF;

        match op {
            1 => {
                self.assert_enabled |= assert_mask & self.assert_supported;
                self.deassert_enabled |= deassert_mask & self.deassert_supported;
            }
            2 => {
                self.assert_enabled &= !assert_mask;
                self.deassert_enabled &= !deassert_mask;
            }
            _ => {}
        }

        Ok(Vec::new())
    }

    pub(crate) fn get_reading_cmd(&self) -> CmdResult {
        let flags = (u8::from(self.events_enabled) << 7) | (u8::from(self.scanning_enabled) << 6);
        let status = self.event_status.to_le_bytes();

        Ok(vec![self.value, flags, status[0], status[1]])
    }

    pub(crate) fn get_type_cmd(&self) -> CmdResult {
        Ok(vec![self.sensor_type, self.event_reading_code])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold_sensor() -> Sensor {
        let mut sensor = Sensor::new(
            NonMaxU8::new(1).unwrap(),
            LogicalUnit::Zero,
            0x01,
            THRESHOLD_EVENT_CODE,
        );
        sensor.set_threshold_support(AccessSupport::Settable);
        sensor.set_threshold_supported([true; 6]);
        sensor.set_thresholds([10, 5, 2, 60, 80, 95]);
        sensor.set_assert_event_supported(0x7FFF);
        sensor.set_deassert_event_supported(0x7FFF);
        sensor.set_assert_event_enabled(0x7FFF);
        sensor.set_deassert_event_enabled(0x7FFF);
        sensor.set_value_internal(30, &mut Vec::new());
        sensor
    }

    #[test]
    fn upper_critical_crossing_asserts_with_reading_and_threshold() {
        let mut sensor = threshold_sensor();
        let mut events = Vec::new();

        sensor.set_value_internal(85, &mut events);

        assert_eq!(2, events.len()); // upper non-critical and upper critical
        let critical = events
            .iter()
            .find(|e| e.data[0] == 0x53)
            .expect("no upper-critical assertion");
        assert_eq!(EventDirection::Assert, critical.direction);
        assert_eq!([0x53, 85, 80], critical.data);
    }

    #[test]
    fn deassert_honors_positive_hysteresis() {
        let mut sensor = threshold_sensor();
        sensor.set_hysteresis(5, 0);

        let mut events = Vec::new();
        sensor.set_value_internal(85, &mut events);

        // 78 is below the threshold but within the hysteresis band.
        events.clear();
        sensor.set_value_internal(78, &mut events);
        assert!(events.iter().all(|e| e.data[0] != 0x53));
        assert_ne!(0, sensor.event_status() & (1 << 4));

        events.clear();
        sensor.set_value_internal(74, &mut events);
        let critical = events.iter().find(|e| e.data[0] == 0x53).unwrap();
        assert_eq!(EventDirection::Deassert, critical.direction);
        assert_eq!(0, sensor.event_status() & (1 << 4));
    }

    #[test]
    fn assertion_is_monotone_in_value() {
        let mut sensor = threshold_sensor();
        sensor.set_hysteresis(0, 0);

        let mut previous_upper = 0u16;
        for value in 0..=u8::MAX {
            sensor.set_value_internal(value, &mut Vec::new());
            let upper = sensor.event_status() & 0b111000;
            assert_eq!(upper | previous_upper, upper, "upper bits cleared at {value}");
            previous_upper = upper;
        }
    }

    #[test]
    fn lower_threshold_asserts_going_down() {
        let mut sensor = threshold_sensor();
        let mut events = Vec::new();

        sensor.set_value_internal(4, &mut events);

        // Lower non-critical (slot 0, offset 0) and lower critical
        // (slot 1, offset 2).
        let offsets: Vec<u8> = events.iter().map(|e| e.data[0]).collect();
        assert!(offsets.contains(&0x50));
        assert!(offsets.contains(&0x52));
        assert!(!offsets.contains(&0x54));
    }

    #[test]
    fn set_bit_fires_only_on_change() {
        let mut sensor = Sensor::new(
            NonMaxU8::new(9).unwrap(),
            LogicalUnit::One,
            0x05,
            0x6F,
        );
        sensor.set_assert_event_enabled(1 << 3);
        sensor.set_deassert_event_enabled(1 << 3);

        let mut events = Vec::new();
        sensor.set_bit_internal(3, true, &mut events);
        sensor.set_bit_internal(3, true, &mut events);
        assert_eq!(1, events.len());
        assert_eq!([3, 0, 0], events[0].data);

        events.clear();
        sensor.set_bit_internal(3, false, &mut events);
        assert_eq!(EventDirection::Deassert, events[0].direction);
    }

    #[test]
    fn set_thresholds_requires_per_slot_support() {
        let mut sensor = threshold_sensor();
        sensor.set_threshold_supported([true, true, true, true, true, false]);

        let req = [1, 0b10_0000, 0, 0, 0, 0, 0, 99];
        assert_eq!(
            Err(CompletionCode::ParameterOutOfRange),
            sensor.set_thresholds_cmd(&req, &mut Vec::new())
        );
    }

    #[test]
    fn event_enable_ops() {
        let mut sensor = threshold_sensor();
        sensor.set_assert_event_enabled(0);
        sensor.set_deassert_event_enabled(0);

        // Op 1: enable selected bits, masked by what is supported.
        sensor.set_assert_event_supported(0x0003);
        sensor
            .set_event_enable_cmd(&[1, 0x80 | 0x10, 0xFF, 0x7F, 0, 0])
            .unwrap();
        assert_eq!(0x0003, sensor.assert_enabled);

        // Op 2: disable selected bits.
        sensor
            .set_event_enable_cmd(&[1, 0x80 | 0x20, 0x01, 0, 0, 0])
            .unwrap();
        assert_eq!(0x0002, sensor.assert_enabled);

        // Op 3 is reserved.
        assert_eq!(
            Err(CompletionCode::InvalidDataField),
            sensor.set_event_enable_cmd(&[1, 0x30, 0, 0, 0, 0])
        );
    }

    #[test]
    fn entire_sensor_support_only_allows_global_op() {
        let mut sensor = threshold_sensor();
        sensor.set_event_support(EventSupport::EntireSensor);

        assert_eq!(
            Err(CompletionCode::InvalidCommand),
            sensor.set_event_enable_cmd(&[1, 0x10, 0xFF, 0x7F, 0, 0])
        );

        sensor.set_event_enable_cmd(&[1, 0x00, 0, 0, 0, 0]).unwrap();
        assert!(!sensor.events_enabled);
        assert!(!sensor.scanning_enabled);
    }

    #[test]
    fn reading_reports_status_bits() {
        let mut sensor = threshold_sensor();
        sensor.set_value_internal(85, &mut Vec::new());

        let rsp = sensor.get_reading_cmd().unwrap();
        assert_eq!(85, rsp[0]);
        assert_eq!(0xC0, rsp[1]);
        // Upper non-critical (bit 3) and upper critical (bit 4) are set.
        assert_eq!(0b11000, rsp[2]);
    }
}
