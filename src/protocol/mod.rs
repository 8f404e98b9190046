//! Bus protocols layered on the interrupt-driven transports

pub mod lin;
pub mod uart_queue;

pub use lin::{checksum, protected_id, Direction, LinError, LinMessage, LinNode, Role};
pub use uart_queue::UartQueue;
