//! LIN bus node over a break-capable UART transport
//!
//! A master opens every schedule slot with a break and then sends the
//! header (sync byte and protected id). Every node, the master included,
//! reads the header back off the bus. A node subscribed to the frame then
//! receives the response; a node publishing it sends its buffer from the
//! next task run.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::{LIN_SYNC_BYTE, LIN_TASK_MS};
use crate::hal::transport::{LinPort, ModuleId, TransferKind, TransferListener, Transport};
use crate::rtos::{Runnable, Task, TaskContext};

/// Largest response payload of a frame
pub const MAX_DATA: usize = 8;
const HEADER_LEN: usize = 2;
const MAX_ID: u8 = 0x3F;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Master,
    Slave,
}

/// Which side of a frame this node is on
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// This node sends the response
    Publish,
    /// This node receives the response
    Subscribe,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinError {
    /// No message with this id in the table
    UnknownFrame,
    /// Id above 0x3F, size outside 1..=8, or a frame larger than the
    /// transport can carry
    InvalidMessage,
    /// Data length does not match the message size
    InvalidLength,
}

/// One entry of the message table
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinMessage {
    pub id: u8,
    /// Response payload size, 1 to 8 bytes
    pub size: u8,
    pub direction: Direction,
    /// Length of this message's schedule slot in task runs (master only)
    pub ticks: u16,
}

impl LinMessage {
    pub const fn new(id: u8, size: u8, direction: Direction, ticks: u16) -> Self {
        Self {
            id,
            size,
            direction,
            ticks,
        }
    }

    fn len(&self) -> usize {
        usize::from(self.size)
    }
}

/// Frame id with its two parity bits in bits 6 and 7
pub fn protected_id(id: u8) -> u8 {
    let id = id & MAX_ID;
    let bit = |n: u8| (id >> n) & 1;
    let p0 = bit(0) ^ bit(1) ^ bit(2) ^ bit(4);
    let p1 = !(bit(1) ^ bit(3) ^ bit(4) ^ bit(5)) & 1;
    id | p0 << 6 | p1 << 7
}

/// XOR over the response payload
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, byte| acc ^ byte)
}

#[derive(Copy, Clone)]
struct Entry {
    message: LinMessage,
    pid: u8,
    data: [u8; MAX_DATA],
    attached: bool,
    fresh: bool,
}

impl Entry {
    fn new(message: LinMessage) -> Self {
        Self {
            message,
            pid: protected_id(message.id),
            data: [0; MAX_DATA],
            attached: false,
            fresh: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Header,
    Response(usize),
}

struct Bus<const M: usize> {
    entries: [Entry; M],
    phase: Phase,
    slot: usize,
    slot_tick: u16,
    publish: Option<usize>,
}

pub struct LinNode<'a, H, const N: usize, const M: usize> {
    transport: &'a Transport<'a, H, N>,
    role: Role,
    bus: Mutex<RefCell<Bus<M>>>,
}

impl<'a, H, const N: usize, const M: usize> LinNode<'a, H, N, M>
where
    H: LinPort + Send,
{
    pub fn new(
        transport: &'a Transport<'a, H, N>,
        role: Role,
        messages: [LinMessage; M],
    ) -> Result<Self, LinError> {
        if M == 0 {
            return Err(LinError::InvalidMessage);
        }
        for message in &messages {
            if message.id > MAX_ID
                || message.size == 0
                || message.len() > MAX_DATA
                || message.len() + 1 > N
            {
                log_error!("lin message {=u8} rejected", message.id);
                return Err(LinError::InvalidMessage);
            }
        }
        Ok(Self {
            transport,
            role,
            bus: Mutex::new(RefCell::new(Bus {
                entries: messages.map(Entry::new),
                phase: Phase::Idle,
                slot: 0,
                slot_tick: 0,
                publish: None,
            })),
        })
    }

    /// Take over the transport's break and receive notifications
    pub fn attach(&'a self) {
        self.transport.set_break_listener(Some(self));
        self.transport.set_rx_listener(Some(self));
    }

    pub fn task(&self) -> Task<'_> {
        Task::new(self, LIN_TASK_MS)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Index of the master schedule slot in progress
    pub fn current_slot(&self) -> usize {
        critical_section::with(|cs| self.bus.borrow_ref(cs).slot)
    }

    /// Start accepting responses for a subscribed frame `id`
    pub fn set_message_buffer(&self, id: u8) -> Result<(), LinError> {
        self.with_entries(id, |entry| entry.attached = true)
    }

    /// Load the response this node publishes for frame `id`
    pub fn write_message(&self, id: u8, data: &[u8]) -> Result<(), LinError> {
        critical_section::with(|cs| {
            let mut bus = self.bus.borrow_ref_mut(cs);
            let mut found = false;
            for entry in bus.entries.iter_mut().filter(|e| e.message.id == id) {
                if data.len() != entry.message.len() {
                    return Err(LinError::InvalidLength);
                }
                entry.data[..data.len()].copy_from_slice(data);
                entry.attached = true;
                found = true;
            }
            if found {
                Ok(())
            } else {
                Err(LinError::UnknownFrame)
            }
        })
    }

    /// Copy the last good response of frame `id` into `out`
    pub fn read_message(&self, id: u8, out: &mut [u8]) -> Result<usize, LinError> {
        critical_section::with(|cs| {
            let mut bus = self.bus.borrow_ref_mut(cs);
            let entry = bus
                .entries
                .iter_mut()
                .find(|e| e.message.id == id)
                .ok_or(LinError::UnknownFrame)?;
            let count = entry.message.len().min(out.len());
            out[..count].copy_from_slice(&entry.data[..count]);
            entry.fresh = false;
            Ok(count)
        })
    }

    /// Whether a response arrived since the last `read_message`
    pub fn has_update(&self, id: u8) -> Result<bool, LinError> {
        critical_section::with(|cs| {
            self.bus
                .borrow_ref(cs)
                .entries
                .iter()
                .find(|e| e.message.id == id)
                .map(|e| e.fresh)
                .ok_or(LinError::UnknownFrame)
        })
    }

    /// One task run: advance the master schedule, then publish a pending
    /// response
    pub fn step(&self) {
        critical_section::with(|cs| {
            let mut bus = self.bus.borrow_ref_mut(cs);
            if self.role == Role::Master {
                self.advance_schedule(&mut bus);
            }
            if let Some(index) = bus.publish.take() {
                self.publish(&bus.entries[index]);
            }
        });
    }

    fn with_entries(&self, id: u8, mut f: impl FnMut(&mut Entry)) -> Result<(), LinError> {
        critical_section::with(|cs| {
            let mut bus = self.bus.borrow_ref_mut(cs);
            let mut found = false;
            for entry in bus.entries.iter_mut().filter(|e| e.message.id == id) {
                f(entry);
                found = true;
            }
            if found {
                Ok(())
            } else {
                Err(LinError::UnknownFrame)
            }
        })
    }

    fn advance_schedule(&self, bus: &mut Bus<M>) {
        if bus.slot_tick == 0 && self.transport.send_break().is_err() {
            log_warn!("lin break skipped, transmitter busy");
        }
        if bus.slot_tick == bus.entries[bus.slot].message.ticks {
            bus.slot = (bus.slot + 1) % M;
            bus.slot_tick = 0;
        } else {
            bus.slot_tick += 1;
        }
    }

    fn publish(&self, entry: &Entry) {
        if !entry.attached {
            return;
        }
        let size = entry.message.len();
        let mut frame = [0u8; MAX_DATA + 1];
        frame[..size].copy_from_slice(&entry.data[..size]);
        frame[size] = checksum(&entry.data[..size]);
        if self.transport.send(&frame[..=size]).is_err() {
            log_warn!("lin response {=u8} dropped", entry.message.id);
        }
    }

    fn on_break(&self) {
        self.transport.abort_receive();
        critical_section::with(|cs| {
            let mut bus = self.bus.borrow_ref_mut(cs);
            bus.phase = Phase::Idle;
            if self.transport.receive(HEADER_LEN).is_err() {
                return;
            }
            bus.phase = Phase::Header;
            if self.role == Role::Master {
                let header = [LIN_SYNC_BYTE, bus.entries[bus.slot].pid];
                if self.transport.send(&header).is_err() {
                    log_warn!("lin header dropped");
                }
            }
        });
    }

    fn on_header(&self, bus: &mut Bus<M>) {
        bus.phase = Phase::Idle;
        let mut header = [0u8; HEADER_LEN];
        if self.transport.take_received(&mut header) != HEADER_LEN || header[0] != LIN_SYNC_BYTE {
            log_debug!("lin header without sync");
            return;
        }
        let Some(index) = bus.entries.iter().position(|e| e.pid == header[1]) else {
            return;
        };
        let entry = &bus.entries[index];
        match entry.message.direction {
            Direction::Subscribe if entry.attached => {
                if self.transport.receive(entry.message.len() + 1).is_ok() {
                    bus.phase = Phase::Response(index);
                }
            }
            Direction::Subscribe => {}
            Direction::Publish => bus.publish = Some(index),
        }
    }

    fn on_response(&self, bus: &mut Bus<M>, index: usize) {
        bus.phase = Phase::Idle;
        let entry = &mut bus.entries[index];
        let size = entry.message.len();
        let mut frame = [0u8; MAX_DATA + 1];
        if self.transport.take_received(&mut frame[..=size]) != size + 1 {
            return;
        }
        if checksum(&frame[..size]) != frame[size] {
            log_warn!("lin checksum mismatch on frame {=u8}", entry.message.id);
            return;
        }
        entry.data[..size].copy_from_slice(&frame[..size]);
        entry.fresh = true;
    }
}

impl<'a, H, const N: usize, const M: usize> TransferListener for LinNode<'a, H, N, M>
where
    H: LinPort + Send,
{
    fn on_transfer_complete(&self, _module: ModuleId, kind: TransferKind) {
        match kind {
            TransferKind::LineBreak => self.on_break(),
            TransferKind::Receive => critical_section::with(|cs| {
                let mut bus = self.bus.borrow_ref_mut(cs);
                let phase = bus.phase;
                match phase {
                    Phase::Header => self.on_header(&mut bus),
                    Phase::Response(index) => self.on_response(&mut bus, index),
                    Phase::Idle => {}
                }
            }),
            TransferKind::Transmit => {}
        }
    }
}

impl<'a, H, const N: usize, const M: usize> Runnable for LinNode<'a, H, N, M>
where
    H: LinPort + Send,
{
    fn run(&self, _ctx: &mut TaskContext) {
        self.step();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Wire;

    type Port<'a> = Transport<'a, Wire, 16>;

    fn flush_tx(port: &Port<'_>) {
        while port.is_tx_busy() {
            port.on_tx_interrupt();
        }
    }

    fn feed(port: &Port<'_>, bytes: &[u8]) {
        for &byte in bytes {
            port.with_hardware(|wire| wire.incoming.push_back(byte));
            port.on_rx_interrupt();
        }
    }

    #[test]
    fn protected_ids_carry_parity() {
        assert_eq!(protected_id(0x00), 0x80);
        assert_eq!(protected_id(0x0F), 0xCF);
        assert_eq!(protected_id(0x10), 0x50);
        assert_eq!(protected_id(0x3C), 0x3C);
        assert_eq!(checksum(&[0xA1, 0xB2]), 0x13);
    }

    #[test]
    fn rejects_bad_tables_and_ids() {
        let port: Port<'_> = Transport::new(ModuleId(0), Wire::default());
        let too_big = LinNode::new(&port, Role::Slave, [LinMessage::new(1, 9, Direction::Publish, 1)]);
        assert!(matches!(too_big, Err(LinError::InvalidMessage)));
        let bad_id = LinNode::new(&port, Role::Slave, [LinMessage::new(0x40, 2, Direction::Publish, 1)]);
        assert!(matches!(bad_id, Err(LinError::InvalidMessage)));

        let node = LinNode::new(&port, Role::Slave, [LinMessage::new(7, 2, Direction::Publish, 1)]).unwrap();
        assert_eq!(node.set_message_buffer(8), Err(LinError::UnknownFrame));
        assert_eq!(node.write_message(7, &[1]), Err(LinError::InvalidLength));
        assert_eq!(node.read_message(9, &mut [0; 8]), Err(LinError::UnknownFrame));
    }

    #[test]
    fn master_opens_each_slot_with_a_break() {
        let port: Port<'_> = Transport::new(ModuleId(0), Wire::default());
        let node = LinNode::new(
            &port,
            Role::Master,
            [
                LinMessage::new(15, 2, Direction::Publish, 2),
                LinMessage::new(16, 1, Direction::Subscribe, 0),
            ],
        )
        .unwrap();

        let mut slots = Vec::new();
        for _ in 0..5 {
            node.step();
            slots.push(node.current_slot());
        }
        assert_eq!(slots, [0, 0, 1, 0, 0]);
        port.with_hardware(|wire| assert_eq!(wire.breaks, 3));
    }

    #[test]
    fn master_publishes_its_own_frame() {
        let port: Port<'_> = Transport::new(ModuleId(0), Wire::default());
        let node = LinNode::new(&port, Role::Master, [LinMessage::new(15, 2, Direction::Publish, 9)]).unwrap();
        node.attach();
        node.write_message(15, &[0xA1, 0xB2]).unwrap();

        node.step();
        port.on_break_interrupt();
        flush_tx(&port);
        // the header comes back off the bus
        feed(&port, &[0x55, 0xCF]);
        node.step();
        flush_tx(&port);

        let wire = port.with_hardware(|wire| wire.written.clone());
        assert_eq!(wire, [0x55, 0xCF, 0xA1, 0xB2, 0x13]);
    }

    #[test]
    fn slave_accepts_only_checked_responses() {
        let port: Port<'_> = Transport::new(ModuleId(2), Wire::default());
        let node = LinNode::new(&port, Role::Slave, [LinMessage::new(16, 2, Direction::Subscribe, 5)]).unwrap();
        node.attach();
        node.set_message_buffer(16).unwrap();

        port.on_break_interrupt();
        feed(&port, &[0x55, 0x50, 0x01, 0x02, 0x03]);
        assert_eq!(node.has_update(16), Ok(true));
        let mut out = [0u8; 8];
        assert_eq!(node.read_message(16, &mut out), Ok(2));
        assert_eq!(&out[..2], &[0x01, 0x02]);

        port.on_break_interrupt();
        feed(&port, &[0x55, 0x50, 0x07, 0x08, 0x00]);
        assert_eq!(node.has_update(16), Ok(false));
        node.read_message(16, &mut out).unwrap();
        assert_eq!(&out[..2], &[0x01, 0x02]);
        // slaves never drive the bus on their own
        port.with_hardware(|wire| assert!(wire.written.is_empty()));
    }

    #[test]
    fn frames_without_a_buffer_are_ignored() {
        let port: Port<'_> = Transport::new(ModuleId(2), Wire::default());
        let node = LinNode::new(&port, Role::Slave, [LinMessage::new(16, 2, Direction::Subscribe, 5)]).unwrap();
        node.attach();

        port.on_break_interrupt();
        feed(&port, &[0x55, 0x50]);
        assert!(!port.is_rx_busy());

        // a break in the middle of a response restarts header reception
        node.set_message_buffer(16).unwrap();
        port.on_break_interrupt();
        feed(&port, &[0x55, 0x50, 0x01]);
        port.on_break_interrupt();
        feed(&port, &[0x55, 0x50, 0x04, 0x05, 0x01]);
        let mut out = [0u8; 2];
        node.read_message(16, &mut out).unwrap();
        assert_eq!(out, [0x04, 0x05]);
    }
}
