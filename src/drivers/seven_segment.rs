//! Multiplexed seven-segment digits
//!
//! All digits share the seven segment lines; each digit has its own enable
//! line whose polarity follows the digit's common terminal.

use embedded_hal::digital::v2::OutputPin;

use crate::hal::gpio::{self, ActiveLevel};

pub const SEGMENTS: usize = 7;

/// Segment patterns for 0-9, bit 0 is segment a
const COMMON_CATHODE: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];
const COMMON_ANODE: [u8; 10] = [0xC0, 0xF9, 0xA4, 0xB0, 0x99, 0x92, 0x82, 0xF8, 0x80, 0x90];

/// One lit outer segment per step, a through f
const ROTATION: [u8; 6] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Common {
    Anode,
    Cathode,
}

impl Common {
    fn table(self) -> &'static [u8; 10] {
        match self {
            Common::Anode => &COMMON_ANODE,
            Common::Cathode => &COMMON_CATHODE,
        }
    }

    /// Enable level that selects the digit
    fn enable_level(self) -> bool {
        self == Common::Anode
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SegmentError<E> {
    Pin(E),
    InvalidDigit,
    InvalidStep,
    InvalidDisplay,
}

pub struct SevenSegment<P, const D: usize> {
    segments: [P; SEGMENTS],
    enables: [P; D],
    commons: [Common; D],
    segment_level: ActiveLevel,
}

impl<P: OutputPin, const D: usize> SevenSegment<P, D> {
    /// `segment_level` is how a set pattern bit reaches the segment line;
    /// boards with an inverting segment driver use `ActiveLevel::Low`.
    pub fn new(
        segments: [P; SEGMENTS],
        enables: [P; D],
        commons: [Common; D],
        segment_level: ActiveLevel,
    ) -> Self {
        Self {
            segments,
            enables,
            commons,
            segment_level,
        }
    }

    /// Put the pattern for `digit` on the segment lines, encoded for
    /// display `display`'s common type
    pub fn set_digit(&mut self, display: usize, digit: u8) -> Result<(), SegmentError<P::Error>> {
        let common = *self.commons.get(display).ok_or(SegmentError::InvalidDisplay)?;
        let pattern = *common
            .table()
            .get(usize::from(digit))
            .ok_or(SegmentError::InvalidDigit)?;
        self.write_pattern(pattern)
    }

    /// Show one frame of the spinning dash animation
    pub fn set_dash(&mut self, step: u8) -> Result<(), SegmentError<P::Error>> {
        let pattern = *ROTATION.get(usize::from(step)).ok_or(SegmentError::InvalidStep)?;
        self.write_pattern(pattern)
    }

    pub fn enable(&mut self, display: usize) -> Result<(), SegmentError<P::Error>> {
        self.select(display, true)
    }

    pub fn disable(&mut self, display: usize) -> Result<(), SegmentError<P::Error>> {
        self.select(display, false)
    }

    pub fn free(self) -> ([P; SEGMENTS], [P; D]) {
        (self.segments, self.enables)
    }

    fn select(&mut self, display: usize, on: bool) -> Result<(), SegmentError<P::Error>> {
        let common = *self.commons.get(display).ok_or(SegmentError::InvalidDisplay)?;
        let pin = &mut self.enables[display];
        gpio::write(pin, common.enable_level() == on).map_err(SegmentError::Pin)
    }

    fn write_pattern(&mut self, pattern: u8) -> Result<(), SegmentError<P::Error>> {
        for (bit, pin) in self.segments.iter_mut().enumerate() {
            gpio::drive(pin, self.segment_level, pattern & (1 << bit) != 0)
                .map_err(SegmentError::Pin)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{writes_to, PinLog, RecordingPin};

    const NAMES: [&str; SEGMENTS] = ["a", "b", "c", "d", "e", "f", "g"];

    fn display(log: &PinLog, commons: [Common; 2], level: ActiveLevel) -> SevenSegment<RecordingPin, 2> {
        SevenSegment::new(
            NAMES.map(|name| RecordingPin::new(name, log)),
            [RecordingPin::new("en0", log), RecordingPin::new("en1", log)],
            commons,
            level,
        )
    }

    fn segment_levels(log: &PinLog) -> u8 {
        NAMES
            .iter()
            .enumerate()
            .filter(|(_, name)| writes_to(log, name).last() == Some(&true))
            .fold(0, |acc, (bit, _)| acc | 1 << bit)
    }

    #[test]
    fn digit_uses_the_displays_own_table() {
        let log = PinLog::default();
        let mut seg = display(&log, [Common::Cathode, Common::Anode], ActiveLevel::High);
        seg.set_digit(0, 2).unwrap();
        assert_eq!(segment_levels(&log), 0x5B);
        seg.set_digit(1, 2).unwrap();
        assert_eq!(segment_levels(&log), 0x24);
    }

    #[test]
    fn inverted_segment_driver_flips_every_line() {
        let log = PinLog::default();
        let mut seg = display(&log, [Common::Cathode; 2], ActiveLevel::Low);
        seg.set_digit(0, 8).unwrap();
        assert_eq!(segment_levels(&log), 0x00);
        seg.set_dash(3).unwrap();
        assert_eq!(segment_levels(&log), 0x7F & !0x08);
    }

    #[test]
    fn enable_polarity_follows_common() {
        let log = PinLog::default();
        let mut seg = display(&log, [Common::Anode, Common::Cathode], ActiveLevel::High);
        seg.enable(0).unwrap();
        seg.enable(1).unwrap();
        seg.disable(0).unwrap();
        seg.disable(1).unwrap();
        assert_eq!(writes_to(&log, "en0"), [true, false]);
        assert_eq!(writes_to(&log, "en1"), [false, true]);
    }

    #[test]
    fn out_of_range_arguments_touch_nothing() {
        let log = PinLog::default();
        let mut seg = display(&log, [Common::Anode; 2], ActiveLevel::High);
        assert_eq!(seg.set_digit(0, 10), Err(SegmentError::InvalidDigit));
        assert_eq!(seg.set_digit(2, 1), Err(SegmentError::InvalidDisplay));
        assert_eq!(seg.set_dash(6), Err(SegmentError::InvalidStep));
        assert_eq!(seg.enable(5), Err(SegmentError::InvalidDisplay));
        assert!(log.lock().unwrap().is_empty());
    }
}
