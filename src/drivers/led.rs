use embedded_hal::digital::v2::OutputPin;

use crate::hal::gpio::{self, ActiveLevel};

/// Single indicator LED
pub struct Led<P> {
    pin: P,
    level: ActiveLevel,
    lit: bool,
}

impl<P: OutputPin> Led<P> {
    /// Takes the pin and switches the LED off
    pub fn new(mut pin: P, level: ActiveLevel) -> Result<Self, P::Error> {
        gpio::drive(&mut pin, level, false)?;
        Ok(Self {
            pin,
            level,
            lit: false,
        })
    }

    pub fn on(&mut self) -> Result<(), P::Error> {
        self.set(true)
    }

    pub fn off(&mut self) -> Result<(), P::Error> {
        self.set(false)
    }

    pub fn toggle(&mut self) -> Result<(), P::Error> {
        self.set(!self.lit)
    }

    pub fn set(&mut self, on: bool) -> Result<(), P::Error> {
        gpio::drive(&mut self.pin, self.level, on)?;
        self.lit = on;
        Ok(())
    }

    pub fn is_on(&self) -> bool {
        self.lit
    }

    pub fn free(self) -> P {
        self.pin
    }
}
