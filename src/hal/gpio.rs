//! Active-level aware pin helpers
//!
//! Boards wire LEDs, switches and segment lines either active-high or
//! active-low. Drivers talk in terms of "active" and these helpers map that
//! onto the electrical level.

use embedded_hal::digital::v2::{InputPin, OutputPin};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActiveLevel {
    High,
    Low,
}

impl ActiveLevel {
    /// Electrical level that represents `active`
    #[inline]
    pub fn level(self, active: bool) -> bool {
        match self {
            ActiveLevel::High => active,
            ActiveLevel::Low => !active,
        }
    }
}

/// Drive `pin` to the level that means `active`
pub fn drive<P: OutputPin>(pin: &mut P, level: ActiveLevel, active: bool) -> Result<(), P::Error> {
    write(pin, level.level(active))
}

/// Drive `pin` high or low
#[inline]
pub fn write<P: OutputPin>(pin: &mut P, high: bool) -> Result<(), P::Error> {
    if high {
        pin.set_high()
    } else {
        pin.set_low()
    }
}

/// Whether `pin` currently reads as active
pub fn is_active<P: InputPin>(pin: &P, level: ActiveLevel) -> Result<bool, P::Error> {
    let high = pin.is_high()?;
    Ok(level.level(high))
}
