//! Device drivers
//!
//! Multi-step devices (the two LCDs) accept a request only while idle and
//! advance it from their scheduler task; simple pin devices act
//! immediately.

pub mod byte_writer;
pub mod clcd;
pub mod keypad;
pub mod led;
pub mod nokia;
pub mod seven_segment;
pub mod switch;

pub use byte_writer::ByteWriter;
pub use clcd::{CharLcd, LcdPins, LineBuffer, Lines};
pub use keypad::{Key, Keypad};
pub use led::Led;
pub use nokia::{NokiaLcd, NokiaPins};
pub use seven_segment::{Common, SevenSegment};
pub use switch::Switches;

/// Why a device refused a request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// Another process is still running
    Busy,
    NotInitialized,
    InvalidArgument,
}
