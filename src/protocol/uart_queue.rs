//! Queued UART packets
//!
//! Up to `UART_QUEUE_DEPTH` sends and receives may be outstanding at once.
//! Only the packet at the front of each queue is on the wire; its
//! completion callback pops it, starts the next one and then notifies the
//! packet's owner.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::{Deque, Vec};

use crate::config::UART_QUEUE_DEPTH;
use crate::hal::transport::{
    ByteTransport, ModuleId, TransferKind, TransferListener, Transport, TransportError,
};
use crate::sync::Notify;

/// Callbacks of queued packets, in queue order
///
/// Kept apart from the packet data so the queue state holds no borrowed
/// data behind a destructor.
struct NotifyRing<'a> {
    slots: [Option<&'a dyn Notify>; UART_QUEUE_DEPTH],
    head: usize,
    len: usize,
}

impl<'a> NotifyRing<'a> {
    const fn new() -> Self {
        Self {
            slots: [None; UART_QUEUE_DEPTH],
            head: 0,
            len: 0,
        }
    }

    fn push_back(&mut self, notify: Option<&'a dyn Notify>) {
        self.slots[(self.head + self.len) % UART_QUEUE_DEPTH] = notify;
        self.len += 1;
    }

    fn pop_back(&mut self) {
        self.len -= 1;
    }

    fn pop_front(&mut self) -> Option<&'a dyn Notify> {
        let notify = self.slots[self.head].take();
        self.head = (self.head + 1) % UART_QUEUE_DEPTH;
        self.len -= 1;
        notify
    }
}

struct Queues<'a, const N: usize> {
    tx: Deque<Vec<u8, N>, UART_QUEUE_DEPTH>,
    tx_notify: NotifyRing<'a>,
    rx: Deque<usize, UART_QUEUE_DEPTH>,
    rx_notify: NotifyRing<'a>,
    received: Deque<Vec<u8, N>, UART_QUEUE_DEPTH>,
}

pub struct UartQueue<'a, H, const N: usize> {
    transport: &'a Transport<'a, H, N>,
    queues: Mutex<RefCell<Queues<'a, N>>>,
}

impl<'a, H, const N: usize> UartQueue<'a, H, N>
where
    H: ByteTransport + Send,
{
    pub fn new(transport: &'a Transport<'a, H, N>) -> Self {
        Self {
            transport,
            queues: Mutex::new(RefCell::new(Queues {
                tx: Deque::new(),
                tx_notify: NotifyRing::new(),
                rx: Deque::new(),
                rx_notify: NotifyRing::new(),
                received: Deque::new(),
            })),
        }
    }

    /// Take over the transport's completion notifications
    pub fn attach(&'a self) {
        self.transport.set_tx_listener(Some(self));
        self.transport.set_rx_listener(Some(self));
    }

    /// Queue `data` for transmission; `notify` runs once it has gone out
    pub fn send(&self, data: &[u8], notify: Option<&'a dyn Notify>) -> Result<(), TransportError> {
        if data.is_empty() {
            return Err(TransportError::InvalidLength);
        }
        let packet = Vec::from_slice(data).map_err(|_| TransportError::InvalidLength)?;
        critical_section::with(|cs| {
            let mut queues = self.queues.borrow_ref_mut(cs);
            let start = queues.tx.is_empty();
            if queues.tx.push_back(packet).is_err() {
                log_debug!("uart tx queue full");
                return Err(TransportError::Busy);
            }
            queues.tx_notify.push_back(notify);
            if start {
                if let Err(err) = self.transport.send(data) {
                    queues.tx.pop_back();
                    queues.tx_notify.pop_back();
                    return Err(err);
                }
            }
            Ok(())
        })
    }

    /// Queue a reception of `len` bytes; `notify` runs once they are in
    /// and can be fetched with [`read`](Self::read)
    pub fn receive(&self, len: usize, notify: Option<&'a dyn Notify>) -> Result<(), TransportError> {
        if len == 0 || len > N {
            return Err(TransportError::InvalidLength);
        }
        critical_section::with(|cs| {
            let mut queues = self.queues.borrow_ref_mut(cs);
            let start = queues.rx.is_empty();
            if queues.rx.push_back(len).is_err() {
                log_debug!("uart rx queue full");
                return Err(TransportError::Busy);
            }
            queues.rx_notify.push_back(notify);
            if start {
                if let Err(err) = self.transport.receive(len) {
                    queues.rx.pop_back();
                    queues.rx_notify.pop_back();
                    return Err(err);
                }
            }
            Ok(())
        })
    }

    /// Oldest completed reception, copied into `out`
    pub fn read(&self, out: &mut [u8]) -> Option<usize> {
        critical_section::with(|cs| {
            let packet = self.queues.borrow_ref_mut(cs).received.pop_front()?;
            let count = packet.len().min(out.len());
            out[..count].copy_from_slice(&packet[..count]);
            Some(count)
        })
    }

    pub fn pending_sends(&self) -> usize {
        critical_section::with(|cs| self.queues.borrow_ref(cs).tx.len())
    }

    pub fn pending_receives(&self) -> usize {
        critical_section::with(|cs| self.queues.borrow_ref(cs).rx.len())
    }

    fn transmitted(&self) -> Option<&'a dyn Notify> {
        critical_section::with(|cs| {
            let mut queues = self.queues.borrow_ref_mut(cs);
            queues.tx.pop_front()?;
            let notify = queues.tx_notify.pop_front();
            while let Some(next) = queues.tx.front() {
                if self.transport.send(next).is_ok() {
                    break;
                }
                log_warn!("uart packet could not start, dropped");
                queues.tx.pop_front();
                queues.tx_notify.pop_front();
            }
            notify
        })
    }

    fn received(&self) -> Option<&'a dyn Notify> {
        critical_section::with(|cs| {
            let mut queues = self.queues.borrow_ref_mut(cs);
            let len = queues.rx.pop_front()?;
            let notify = queues.rx_notify.pop_front();
            let mut buf = [0u8; N];
            let count = self.transport.take_received(&mut buf[..len]);
            if queues.received.is_full() {
                log_warn!("uart receive backlog full, oldest dropped");
                queues.received.pop_front();
            }
            let _ = queues.received.push_back(Vec::from_slice(&buf[..count]).unwrap_or_default());
            while let Some(&next) = queues.rx.front() {
                if self.transport.receive(next).is_ok() {
                    break;
                }
                queues.rx.pop_front();
                queues.rx_notify.pop_front();
            }
            notify
        })
    }
}

impl<'a, H, const N: usize> TransferListener for UartQueue<'a, H, N>
where
    H: ByteTransport + Send,
{
    fn on_transfer_complete(&self, _module: ModuleId, kind: TransferKind) {
        let notify = match kind {
            TransferKind::Transmit => self.transmitted(),
            TransferKind::Receive => self.received(),
            TransferKind::LineBreak => None,
        };
        if let Some(notify) = notify {
            notify.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Wire;
    use core::sync::atomic::{AtomicUsize, Ordering};

    type Port<'a> = Transport<'a, Wire, 8>;

    fn flush_tx(port: &Port<'_>) {
        while port.is_tx_busy() {
            port.on_tx_interrupt();
        }
    }

    #[test]
    fn packets_go_out_in_order_with_one_notification_each() {
        let first = AtomicUsize::new(0);
        let second = AtomicUsize::new(0);
        let on_first = || {
            first.fetch_add(1, Ordering::Relaxed);
        };
        let on_second = || {
            second.fetch_add(1, Ordering::Relaxed);
        };
        let port: Port<'_> = Transport::new(ModuleId(1), Wire::default());
        let queue = UartQueue::new(&port);
        queue.attach();

        queue.send(b"ab", Some(&on_first)).unwrap();
        queue.send(b"cde", Some(&on_second)).unwrap();
        queue.send(b"f", None).unwrap();
        assert_eq!(queue.pending_sends(), 3);

        port.on_tx_interrupt();
        port.on_tx_interrupt();
        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(second.load(Ordering::Relaxed), 0);
        assert!(port.is_tx_busy());

        flush_tx(&port);
        assert_eq!(second.load(Ordering::Relaxed), 1);
        assert_eq!(queue.pending_sends(), 0);
        assert_eq!(port.with_hardware(|wire| wire.written.clone()), b"abcdef");
    }

    #[test]
    fn full_queue_refuses_sixth_packet() {
        let port: Port<'_> = Transport::new(ModuleId(1), Wire::default());
        let queue = UartQueue::new(&port);
        queue.attach();
        for _ in 0..UART_QUEUE_DEPTH {
            queue.send(b"x", None).unwrap();
        }
        assert_eq!(queue.send(b"y", None), Err(TransportError::Busy));
        assert_eq!(queue.send(&[0; 9], None), Err(TransportError::InvalidLength));
        assert_eq!(queue.send(&[], None), Err(TransportError::InvalidLength));

        flush_tx(&port);
        assert_eq!(queue.send(b"y", None), Ok(()));
    }

    #[test]
    fn receptions_are_chained_and_buffered() {
        let done = AtomicUsize::new(0);
        let on_done = || {
            done.fetch_add(1, Ordering::Relaxed);
        };
        let port: Port<'_> = Transport::new(ModuleId(2), Wire::default());
        let queue = UartQueue::new(&port);
        queue.attach();

        queue.receive(2, Some(&on_done)).unwrap();
        queue.receive(3, Some(&on_done)).unwrap();
        assert_eq!(queue.receive(0, None), Err(TransportError::InvalidLength));
        port.with_hardware(|wire| wire.incoming.extend(*b"hello"));
        for _ in 0..5 {
            port.on_rx_interrupt();
        }
        assert_eq!(done.load(Ordering::Relaxed), 2);
        assert_eq!(queue.pending_receives(), 0);

        let mut out = [0u8; 8];
        assert_eq!(queue.read(&mut out), Some(2));
        assert_eq!(&out[..2], b"he");
        assert_eq!(queue.read(&mut out), Some(3));
        assert_eq!(&out[..3], b"llo");
        assert_eq!(queue.read(&mut out), None);
    }
}
