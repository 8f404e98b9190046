//! Hardware seams: byte transports, pins and the flash controller

pub mod flash;
pub mod gpio;
pub mod spi;
pub mod transport;
pub mod uart;

pub use flash::{Flash, FlashController, FlashError};
pub use gpio::ActiveLevel;
pub use spi::SpiPort;
pub use transport::{
    BoardTransport, ByteTransport, Event, LinPort, ModuleId, TransferKind, TransferListener, Transport,
    TransportError,
};
pub use uart::{BreakControl, InterruptControl, SerialPort};
