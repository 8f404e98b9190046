//! Host-side fakes for driver unit tests

use core::convert::Infallible;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::timer::{CountDown, Periodic};

use crate::hal::transport::{ByteTransport, Event, LinPort};

pub type PinLog = Arc<Mutex<Vec<(&'static str, bool)>>>;

/// Write refused by a [`RecordingPin`] whose fault was armed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PinFault;

/// Arms a one-shot failure on the pin it was taken from
#[derive(Clone, Default)]
pub struct FaultSwitch {
    armed: Arc<AtomicBool>,
}

impl FaultSwitch {
    /// The next write to the pin fails and is not logged
    pub fn fail_next_write(&self) {
        self.armed.store(true, Ordering::Relaxed);
    }
}

/// Output pin that appends every write to a shared log
pub struct RecordingPin {
    name: &'static str,
    log: PinLog,
    fault: FaultSwitch,
}

impl RecordingPin {
    pub fn new(name: &'static str, log: &PinLog) -> Self {
        Self {
            name,
            log: log.clone(),
            fault: FaultSwitch::default(),
        }
    }

    pub fn fault_switch(&self) -> FaultSwitch {
        self.fault.clone()
    }

    fn record(&mut self, level: bool) -> Result<(), PinFault> {
        if self.fault.armed.swap(false, Ordering::Relaxed) {
            return Err(PinFault);
        }
        self.log.lock().unwrap().push((self.name, level));
        Ok(())
    }
}

impl OutputPin for RecordingPin {
    type Error = PinFault;

    fn set_low(&mut self) -> Result<(), PinFault> {
        self.record(false)
    }

    fn set_high(&mut self) -> Result<(), PinFault> {
        self.record(true)
    }
}

/// Writes to `name` in log order
pub fn writes_to(log: &PinLog, name: &str) -> Vec<bool> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(pin, _)| *pin == name)
        .map(|&(_, level)| level)
        .collect()
}

/// Input pin whose level the test flips from outside
#[derive(Clone, Default)]
pub struct LevelPin {
    high: Arc<AtomicBool>,
}

impl LevelPin {
    pub fn set(&self, high: bool) {
        self.high.store(high, Ordering::Relaxed);
    }
}

impl InputPin for LevelPin {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(self.high.load(Ordering::Relaxed))
    }

    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(!self.high.load(Ordering::Relaxed))
    }
}

/// Byte transport that records written bytes and replays scripted input
#[derive(Default)]
pub struct Wire {
    pub written: Vec<u8>,
    pub incoming: VecDeque<u8>,
    pub tx_listening: bool,
    pub rx_listening: bool,
    pub breaks: u32,
    /// Next byte write reports `WouldBlock` once
    pub block_next_write: bool,
}

impl Wire {
    pub const fn new() -> Self {
        Self {
            written: Vec::new(),
            incoming: VecDeque::new(),
            tx_listening: false,
            rx_listening: false,
            breaks: 0,
            block_next_write: false,
        }
    }
}

impl ByteTransport for Wire {
    type Error = Infallible;

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), Infallible> {
        if self.block_next_write {
            self.block_next_write = false;
            return Err(nb::Error::WouldBlock);
        }
        self.written.push(byte);
        Ok(())
    }

    fn read_byte(&mut self) -> nb::Result<u8, Infallible> {
        self.incoming.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn listen(&mut self, event: Event) {
        match event {
            Event::TxEmpty => self.tx_listening = true,
            Event::RxNotEmpty => self.rx_listening = true,
        }
    }

    fn unlisten(&mut self, event: Event) {
        match event {
            Event::TxEmpty => self.tx_listening = false,
            Event::RxNotEmpty => self.rx_listening = false,
        }
    }
}

impl LinPort for Wire {
    fn send_break(&mut self) {
        self.breaks += 1;
    }
}

/// Periodic count-down timer; the test queues expiries through `pending`
#[derive(Default)]
pub struct FakeTimer {
    pub started_with: Option<u32>,
    pub pending: Arc<AtomicU32>,
}

impl CountDown for FakeTimer {
    type Time = u32;

    fn start<T>(&mut self, count: T)
    where
        T: Into<u32>,
    {
        self.started_with = Some(count.into());
    }

    fn wait(&mut self) -> nb::Result<(), void::Void> {
        let taken = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        taken.map(|_| ()).map_err(|_| nb::Error::WouldBlock)
    }
}

impl Periodic for FakeTimer {}
