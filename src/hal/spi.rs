//! SPI byte transport over `embedded_hal::spi::FullDuplex`

use embedded_hal::spi::FullDuplex;

use super::transport::{ByteTransport, Event};
use super::uart::InterruptControl;

/// Transmit-only SPI master port
///
/// Bytes clocked back from the slave are discarded, which is all the
/// display controllers on this board need.
pub struct SpiPort<S, I = ()> {
    spi: S,
    irq: I,
    tx_listening: bool,
}

impl<S: FullDuplex<u8>> SpiPort<S, ()> {
    pub fn new(spi: S) -> Self {
        Self::with_interrupts(spi, ())
    }
}

impl<S, I> SpiPort<S, I>
where
    S: FullDuplex<u8>,
    I: InterruptControl,
{
    pub fn with_interrupts(spi: S, irq: I) -> Self {
        Self {
            spi,
            irq,
            tx_listening: false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.tx_listening
    }

    pub fn free(self) -> (S, I) {
        (self.spi, self.irq)
    }
}

impl<S, I> ByteTransport for SpiPort<S, I>
where
    S: FullDuplex<u8>,
    I: InterruptControl,
{
    type Error = S::Error;

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), S::Error> {
        self.spi.send(byte)
    }

    fn read_byte(&mut self) -> nb::Result<u8, S::Error> {
        self.spi.read()
    }

    fn listen(&mut self, event: Event) {
        if event == Event::TxEmpty {
            self.tx_listening = true;
            self.irq.enable(event);
        }
    }

    fn unlisten(&mut self, event: Event) {
        if event == Event::TxEmpty {
            self.tx_listening = false;
            self.irq.disable(event);
        }
    }
}
