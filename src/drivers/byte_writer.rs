//! Parallel byte output over eight independent pins

use embedded_hal::digital::v2::OutputPin;

use crate::hal::gpio::{self, ActiveLevel};

pub struct ByteWriter<P> {
    pins: [P; 8],
    levels: [ActiveLevel; 8],
}

impl<P: OutputPin> ByteWriter<P> {
    pub fn new(pins: [P; 8], level: ActiveLevel) -> Self {
        Self::with_levels(pins, [level; 8])
    }

    /// Per-bit active levels, `levels[0]` for bit 0
    pub fn with_levels(pins: [P; 8], levels: [ActiveLevel; 8]) -> Self {
        Self { pins, levels }
    }

    /// Drive bit `i` of `value` onto pin `i`
    pub fn write_byte(&mut self, value: u8) -> Result<(), P::Error> {
        for (bit, (pin, level)) in self.pins.iter_mut().zip(self.levels).enumerate() {
            gpio::drive(pin, level, value & (1 << bit) != 0)?;
        }
        Ok(())
    }

    pub fn free(self) -> [P; 8] {
        self.pins
    }
}
