//! UART byte transport over `embedded-hal` serial traits

use embedded_hal::serial::{Read, Write};

use super::transport::{ByteTransport, Event, LinPort};

/// Interrupt enable bits of a peripheral
///
/// `embedded-hal` 0.2 has no trait for interrupt gating, so board code
/// supplies one. `()` is a no-op for peripherals that are polled.
pub trait InterruptControl {
    fn enable(&mut self, event: Event);
    fn disable(&mut self, event: Event);
}

impl InterruptControl for () {
    fn enable(&mut self, _event: Event) {}
    fn disable(&mut self, _event: Event) {}
}

/// Break generation on a LIN-capable UART
pub trait BreakControl {
    fn send_break(&mut self);
}

pub struct SerialPort<S, I = ()> {
    serial: S,
    irq: I,
    tx_listening: bool,
    rx_listening: bool,
}

impl<S> SerialPort<S, ()>
where
    S: Read<u8> + Write<u8>,
{
    pub fn new(serial: S) -> Self {
        Self::with_interrupts(serial, ())
    }
}

impl<S, I> SerialPort<S, I>
where
    S: Read<u8> + Write<u8>,
    I: InterruptControl,
{
    pub fn with_interrupts(serial: S, irq: I) -> Self {
        Self {
            serial,
            irq,
            tx_listening: false,
            rx_listening: false,
        }
    }

    pub fn is_listening(&self, event: Event) -> bool {
        match event {
            Event::TxEmpty => self.tx_listening,
            Event::RxNotEmpty => self.rx_listening,
        }
    }

    pub fn free(self) -> (S, I) {
        (self.serial, self.irq)
    }
}

impl<S, I, E> ByteTransport for SerialPort<S, I>
where
    S: Read<u8, Error = E> + Write<u8, Error = E>,
    I: InterruptControl,
{
    type Error = E;

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), E> {
        self.serial.write(byte)
    }

    fn read_byte(&mut self) -> nb::Result<u8, E> {
        self.serial.read()
    }

    fn listen(&mut self, event: Event) {
        match event {
            Event::TxEmpty => self.tx_listening = true,
            Event::RxNotEmpty => self.rx_listening = true,
        }
        self.irq.enable(event);
    }

    fn unlisten(&mut self, event: Event) {
        match event {
            Event::TxEmpty => self.tx_listening = false,
            Event::RxNotEmpty => self.rx_listening = false,
        }
        self.irq.disable(event);
    }
}

impl<S, I, E> LinPort for SerialPort<S, I>
where
    S: Read<u8, Error = E> + Write<u8, Error = E>,
    I: InterruptControl + BreakControl,
{
    fn send_break(&mut self) {
        self.irq.send_break();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::transport::{BoardTransport, ModuleId, Transport, TransportError};
    use embedded_hal_mock::serial::{Mock as SerialMock, Transaction as SerialTransaction};

    #[test]
    fn transport_writes_through_serial() {
        let expectations = [
            SerialTransaction::write(0x48),
            SerialTransaction::write(0x69),
            SerialTransaction::write(0x21),
        ];
        let mut serial = SerialMock::new(&expectations);
        let transport: BoardTransport<'_, _> =
            Transport::new(ModuleId(1), SerialPort::new(serial.clone()));

        transport.send(b"Hi!").unwrap();
        transport.with_hardware(|port| assert!(port.is_listening(Event::TxEmpty)));
        assert_eq!(transport.send(b"x"), Err(TransportError::Busy));
        for _ in 0..3 {
            transport.on_tx_interrupt();
        }
        assert!(!transport.is_tx_busy());
        transport.with_hardware(|port| assert!(!port.is_listening(Event::TxEmpty)));

        serial.done();
    }

    #[test]
    fn transport_reads_through_serial() {
        let expectations = [SerialTransaction::read_many([0x01, 0x02])];
        let mut serial = SerialMock::new(&expectations);
        let transport: BoardTransport<'_, _> =
            Transport::new(ModuleId(1), SerialPort::new(serial.clone()));

        transport.receive(2).unwrap();
        transport.on_rx_interrupt();
        transport.on_rx_interrupt();

        let mut out = [0; 2];
        assert_eq!(transport.take_received(&mut out), 2);
        assert_eq!(out, [0x01, 0x02]);
        serial.done();
    }
}
