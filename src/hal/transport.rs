//! Interrupt-driven byte transport
//!
//! [`Transport`] turns a byte-at-a-time peripheral into buffer-level
//! send/receive with completion callbacks. The caller starts a transfer and
//! returns immediately; the board's interrupt handler calls
//! [`Transport::on_tx_interrupt`] / [`Transport::on_rx_interrupt`] once per
//! hardware event, and the registered listener runs from that handler when
//! the last byte has moved.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;

use crate::config::TRANSPORT_CAPACITY;
use crate::sync::Slot;

/// Peripheral events that drive a transfer forward
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Transmit data register empty
    TxEmpty,
    /// Receive data register not empty
    RxNotEmpty,
}

/// Identifies a peripheral instance to completion listeners
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleId(pub u8);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferKind {
    Transmit,
    Receive,
    /// A LIN break was detected on the line
    LineBreak,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// A transfer in the same direction is still in flight
    Busy,
    /// Zero length, or longer than the descriptor capacity
    InvalidLength,
}

/// Hardware seam of a transport: one data register plus interrupt gating
pub trait ByteTransport {
    type Error;

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), Self::Error>;
    fn read_byte(&mut self) -> nb::Result<u8, Self::Error>;
    fn listen(&mut self, event: Event);
    fn unlisten(&mut self, event: Event);
}

/// Byte transport that can also drive a LIN break onto the line
pub trait LinPort: ByteTransport {
    fn send_break(&mut self);
}

/// Completion callback invoked from interrupt context
pub trait TransferListener: Sync {
    fn on_transfer_complete(&self, module: ModuleId, kind: TransferKind);
}

impl<F> TransferListener for F
where
    F: Fn(ModuleId, TransferKind) + Sync,
{
    fn on_transfer_complete(&self, module: ModuleId, kind: TransferKind) {
        self(module, kind)
    }
}

pub type ListenerSlot<'a> = Slot<'a, dyn TransferListener + 'a>;

struct Descriptor<const N: usize> {
    data: Vec<u8, N>,
    len: usize,
    pos: usize,
    busy: bool,
}

impl<const N: usize> Descriptor<N> {
    const fn new() -> Self {
        Self {
            data: Vec::new(),
            len: 0,
            pos: 0,
            busy: false,
        }
    }
}

struct Inner<H, const N: usize> {
    hw: H,
    tx: Descriptor<N>,
    rx: Descriptor<N>,
}

/// Buffer-level transport over one peripheral module
///
/// Transfers are copied into fixed descriptors of capacity `N`, so the
/// caller's buffer is free as soon as `send` returns.
pub struct Transport<'a, H, const N: usize> {
    module: ModuleId,
    inner: Mutex<RefCell<Inner<H, N>>>,
    tx_listener: ListenerSlot<'a>,
    rx_listener: ListenerSlot<'a>,
    break_listener: ListenerSlot<'a>,
}

/// Transport with descriptors sized for the board's largest transfer
pub type BoardTransport<'a, H> = Transport<'a, H, TRANSPORT_CAPACITY>;

impl<'a, H: ByteTransport, const N: usize> Transport<'a, H, N> {
    pub const fn new(module: ModuleId, hw: H) -> Self {
        Self {
            module,
            inner: Mutex::new(RefCell::new(Inner {
                hw,
                tx: Descriptor::new(),
                rx: Descriptor::new(),
            })),
            tx_listener: ListenerSlot::new(),
            rx_listener: ListenerSlot::new(),
            break_listener: ListenerSlot::new(),
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Start transmitting `data`
    ///
    /// The first byte is written straight away; the rest go out from
    /// [`on_tx_interrupt`](Self::on_tx_interrupt).
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.is_empty() || data.len() > N {
            return Err(TransportError::InvalidLength);
        }
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let Inner { hw, tx, .. } = &mut *inner;
            if tx.busy {
                log_debug!("module {} tx busy", self.module.0);
                return Err(TransportError::Busy);
            }
            tx.data.clear();
            tx.data
                .extend_from_slice(data)
                .map_err(|_| TransportError::InvalidLength)?;
            tx.len = data.len();
            tx.pos = 0;
            tx.busy = true;
            if hw.write_byte(tx.data[0]).is_ok() {
                tx.pos = 1;
            }
            hw.listen(Event::TxEmpty);
            Ok(())
        })
    }

    /// Start receiving `len` bytes
    pub fn receive(&self, len: usize) -> Result<(), TransportError> {
        if len == 0 || len > N {
            return Err(TransportError::InvalidLength);
        }
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let Inner { hw, rx, .. } = &mut *inner;
            if rx.busy {
                log_debug!("module {} rx busy", self.module.0);
                return Err(TransportError::Busy);
            }
            rx.data.clear();
            rx.len = len;
            rx.pos = 0;
            rx.busy = true;
            hw.listen(Event::RxNotEmpty);
            Ok(())
        })
    }

    /// Drop a reception in flight, keeping no partial data
    pub fn abort_receive(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let Inner { hw, rx, .. } = &mut *inner;
            if rx.busy {
                hw.unlisten(Event::RxNotEmpty);
            }
            rx.busy = false;
            rx.len = 0;
            rx.pos = 0;
            rx.data.clear();
        })
    }

    /// Copy the last completed reception into `out`
    ///
    /// Returns the number of bytes copied; nothing is copied while a
    /// reception is still in flight.
    pub fn take_received(&self, out: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let rx = &mut inner.rx;
            if rx.busy {
                return 0;
            }
            let count = rx.data.len().min(out.len());
            out[..count].copy_from_slice(&rx.data[..count]);
            rx.data.clear();
            count
        })
    }

    /// Transmit-empty interrupt step
    pub fn on_tx_interrupt(&self) {
        let finished = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let Inner { hw, tx, .. } = &mut *inner;
            if !tx.busy {
                hw.unlisten(Event::TxEmpty);
                return false;
            }
            if tx.pos != tx.len {
                // WouldBlock leaves the position alone; the next event retries
                if hw.write_byte(tx.data[tx.pos]).is_ok() {
                    tx.pos += 1;
                }
                false
            } else {
                tx.busy = false;
                tx.len = 0;
                tx.pos = 0;
                tx.data.clear();
                hw.unlisten(Event::TxEmpty);
                true
            }
        });
        if finished {
            self.notify(&self.tx_listener, TransferKind::Transmit);
        }
    }

    /// Receive-not-empty interrupt step
    pub fn on_rx_interrupt(&self) {
        let finished = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let Inner { hw, rx, .. } = &mut *inner;
            let byte = match hw.read_byte() {
                Ok(byte) => byte,
                Err(nb::Error::WouldBlock) => return false,
                Err(nb::Error::Other(_)) => {
                    log_warn!("module {} rx error", self.module.0);
                    return false;
                }
            };
            if !rx.busy {
                // Nobody asked for this byte
                return false;
            }
            if rx.data.push(byte).is_err() {
                return false;
            }
            rx.pos = rx.data.len();
            if rx.pos == rx.len {
                rx.busy = false;
                hw.unlisten(Event::RxNotEmpty);
                true
            } else {
                false
            }
        });
        if finished {
            self.notify(&self.rx_listener, TransferKind::Receive);
        }
    }

    pub fn set_tx_listener(&self, listener: Option<&'a dyn TransferListener>) {
        self.tx_listener.set(listener);
    }

    pub fn set_rx_listener(&self, listener: Option<&'a dyn TransferListener>) {
        self.rx_listener.set(listener);
    }

    pub fn set_break_listener(&self, listener: Option<&'a dyn TransferListener>) {
        self.break_listener.set(listener);
    }

    pub fn is_tx_busy(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).tx.busy)
    }

    pub fn is_rx_busy(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).rx.busy)
    }

    /// Run `f` against the hardware outside of any transfer step
    pub fn with_hardware<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).hw))
    }

    pub fn free(self) -> H {
        self.inner.into_inner().into_inner().hw
    }

    fn notify(&self, slot: &ListenerSlot<'a>, kind: TransferKind) {
        if let Some(listener) = slot.get() {
            listener.on_transfer_complete(self.module, kind);
        }
    }
}

impl<'a, H: LinPort, const N: usize> Transport<'a, H, N> {
    /// Drive a break onto the line; refused while a transmission is running
    pub fn send_break(&self) -> Result<(), TransportError> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.tx.busy {
                return Err(TransportError::Busy);
            }
            inner.hw.send_break();
            Ok(())
        })
    }

    /// Break-detected interrupt step
    pub fn on_break_interrupt(&self) {
        self.notify(&self.break_listener, TransferKind::LineBreak);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Wire;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn eight_byte_send_completes_on_eighth_interrupt() {
        let calls = StdMutex::new(std::vec::Vec::new());
        let listener = |module: ModuleId, kind: TransferKind| {
            calls.lock().unwrap().push((module, kind));
        };
        let transport: Transport<'_, Wire, 16> = Transport::new(ModuleId(2), Wire::default());
        transport.set_tx_listener(Some(&listener));

        let payload = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(transport.send(&payload), Ok(()));
        assert!(transport.is_tx_busy());

        for _ in 0..7 {
            transport.on_tx_interrupt();
            assert_eq!(transport.send(&payload), Err(TransportError::Busy));
        }
        assert!(calls.lock().unwrap().is_empty());

        transport.on_tx_interrupt();
        assert!(!transport.is_tx_busy());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(ModuleId(2), TransferKind::Transmit)]
        );

        // late interrupt after completion is ignored
        transport.on_tx_interrupt();
        assert_eq!(calls.lock().unwrap().len(), 1);

        let wire = transport.free();
        assert_eq!(wire.written, payload);
        assert!(!wire.tx_listening);
    }

    #[test]
    fn would_block_is_retried_on_next_interrupt() {
        let transport: Transport<'_, Wire, 8> = Transport::new(ModuleId(0), Wire::default());
        transport.with_hardware(|wire| wire.block_next_write = true);
        transport.send(&[0xAA, 0xBB]).unwrap();

        transport.on_tx_interrupt(); // writes 0xAA
        transport.on_tx_interrupt(); // writes 0xBB
        assert!(transport.is_tx_busy());
        transport.on_tx_interrupt();
        assert!(!transport.is_tx_busy());
        assert_eq!(transport.free().written, [0xAA, 0xBB]);
    }

    #[test]
    fn rejects_empty_and_oversized_transfers() {
        let transport: Transport<'_, Wire, 4> = Transport::new(ModuleId(0), Wire::default());
        assert_eq!(transport.send(&[]), Err(TransportError::InvalidLength));
        assert_eq!(transport.send(&[0; 5]), Err(TransportError::InvalidLength));
        assert_eq!(transport.receive(0), Err(TransportError::InvalidLength));
        assert_eq!(transport.receive(5), Err(TransportError::InvalidLength));
        assert!(!transport.is_tx_busy());
        assert!(!transport.is_rx_busy());
    }

    #[test]
    fn receive_collects_requested_length() {
        let completions = AtomicU32::new(0);
        let listener = |_: ModuleId, kind: TransferKind| {
            assert_eq!(kind, TransferKind::Receive);
            completions.fetch_add(1, Ordering::Relaxed);
        };
        let transport: Transport<'_, Wire, 8> = Transport::new(ModuleId(1), Wire::default());
        transport.set_rx_listener(Some(&listener));
        transport.with_hardware(|wire| wire.incoming.extend([0x10, 0x20, 0x30, 0x40]));

        // bytes arriving before a request are dropped
        transport.on_rx_interrupt();

        transport.receive(2).unwrap();
        assert_eq!(transport.receive(2), Err(TransportError::Busy));
        transport.on_rx_interrupt();
        let mut out = [0u8; 4];
        assert_eq!(transport.take_received(&mut out), 0);
        transport.on_rx_interrupt();
        assert_eq!(completions.load(Ordering::Relaxed), 1);
        assert!(!transport.is_rx_busy());

        assert_eq!(transport.take_received(&mut out), 2);
        assert_eq!(&out[..2], &[0x20, 0x30]);
        assert_eq!(transport.take_received(&mut out), 0);
    }

    static CHAINED: Transport<'static, Wire, 8> = Transport::new(ModuleId(4), Wire::new());
    static CHAIN_CALLS: AtomicU32 = AtomicU32::new(0);

    fn chain(_: ModuleId, _: TransferKind) {
        if CHAIN_CALLS.fetch_add(1, Ordering::Relaxed) == 0 {
            assert_eq!(CHAINED.send(&[0x02]), Ok(()));
        }
    }

    static CHAIN: fn(ModuleId, TransferKind) = chain;

    #[test]
    fn listener_may_start_next_transfer() {
        CHAINED.set_tx_listener(Some(&CHAIN));

        CHAINED.send(&[0x01]).unwrap();
        CHAINED.on_tx_interrupt();
        assert!(CHAINED.is_tx_busy());
        CHAINED.on_tx_interrupt();
        assert!(!CHAINED.is_tx_busy());
        assert_eq!(CHAIN_CALLS.load(Ordering::Relaxed), 2);
        CHAINED.with_hardware(|wire| assert_eq!(wire.written, [0x01, 0x02]));
    }

    #[test]
    fn break_is_refused_while_transmitting() {
        let breaks = AtomicU32::new(0);
        let on_break = |_: ModuleId, kind: TransferKind| {
            assert_eq!(kind, TransferKind::LineBreak);
            breaks.fetch_add(1, Ordering::Relaxed);
        };
        let transport: Transport<'_, Wire, 8> = Transport::new(ModuleId(3), Wire::default());
        transport.set_break_listener(Some(&on_break));

        transport.send(&[0x55]).unwrap();
        assert_eq!(transport.send_break(), Err(TransportError::Busy));
        transport.on_tx_interrupt();
        assert_eq!(transport.send_break(), Ok(()));
        transport.on_break_interrupt();

        assert_eq!(breaks.load(Ordering::Relaxed), 1);
        assert_eq!(transport.free().breaks, 1);
    }

    #[test]
    fn aborted_receive_can_be_restarted() {
        let transport: Transport<'_, Wire, 8> = Transport::new(ModuleId(1), Wire::default());
        transport.receive(4).unwrap();
        transport.with_hardware(|wire| wire.incoming.push_back(0x11));
        transport.on_rx_interrupt();

        transport.abort_receive();
        assert!(!transport.is_rx_busy());
        transport.with_hardware(|wire| assert!(!wire.rx_listening));

        transport.receive(1).unwrap();
        transport.with_hardware(|wire| wire.incoming.push_back(0x22));
        transport.on_rx_interrupt();
        let mut out = [0u8; 4];
        assert_eq!(transport.take_received(&mut out), 1);
        assert_eq!(out[0], 0x22);
    }
}
