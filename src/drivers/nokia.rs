//! Nokia 5110 (PCD8544) graphic LCD over an interrupt-driven SPI transport
//!
//! The tick step toggles reset and data/command lines and starts SPI
//! transfers; the transport's completion callback finishes each process.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::v2::OutputPin;
use heapless::Vec;

use super::RequestError;
use crate::config::NOKIA_TASK_MS;
use crate::hal::transport::{
    ByteTransport, ModuleId, TransferKind, TransferListener, Transport, TransportError,
};
use crate::rtos::{Runnable, Task, TaskContext};
use crate::sync::{Notify, NotifySlot};

const INIT_SEQUENCE: [u8; 6] = [0x21, 0x06, 0x13, 0xBE, 0x20, 0x0C];
const X_ADDRESS: u8 = 0x80;
const Y_ADDRESS: u8 = 0x40;
const COLUMNS: u8 = 84;
const BANKS: u8 = 6;

pub struct NokiaPins<P> {
    pub rst: P,
    pub ce: P,
    pub dc: P,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Process {
    Idle,
    Init,
    Write,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    Idle,
    /// Reset pulse, then the init sequence on the last count
    Reset,
    InitFlush,
    Position,
    Data,
    DataFlush,
}

struct State<P, const N: usize> {
    pins: NokiaPins<P>,
    step: Step,
    counter: u8,
    data: Vec<u8, N>,
    x: u8,
    y: u8,
    initialized: bool,
}

pub struct NokiaLcd<'a, P, H, const N: usize> {
    spi: &'a Transport<'a, H, N>,
    state: Mutex<RefCell<State<P, N>>>,
    notify: NotifySlot<'a>,
}

impl<'a, P, H, const N: usize> NokiaLcd<'a, P, H, N>
where
    P: OutputPin + Send,
    H: ByteTransport + Send,
{
    pub fn new(pins: NokiaPins<P>, spi: &'a Transport<'a, H, N>) -> Self {
        Self {
            spi,
            state: Mutex::new(RefCell::new(State {
                pins,
                step: Step::Idle,
                counter: 0,
                data: Vec::new(),
                x: 0,
                y: 0,
                initialized: false,
            })),
            notify: NotifySlot::new(),
        }
    }

    /// Register as the transport's transmit listener
    pub fn attach(&'a self) {
        self.spi.set_tx_listener(Some(self));
    }

    pub fn task(&self) -> Task<'_> {
        Task::new(self, NOKIA_TASK_MS)
    }

    pub fn init(&self) -> Result<(), RequestError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.step != Step::Idle {
                return Err(RequestError::Busy);
            }
            if state.pins.ce.set_low().is_err() {
                log_warn!("nokia chip enable write failed");
            }
            state.initialized = false;
            state.counter = 0;
            state.step = Step::Reset;
            Ok(())
        })
    }

    /// Write raw display bytes starting at column `x`, bank `y`
    pub fn write_string(&self, data: &[u8], x: u8, y: u8) -> Result<(), RequestError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.step != Step::Idle {
                return Err(RequestError::Busy);
            }
            if !state.initialized {
                return Err(RequestError::NotInitialized);
            }
            if data.is_empty() || x >= COLUMNS || y >= BANKS {
                return Err(RequestError::InvalidArgument);
            }
            state.data.clear();
            state
                .data
                .extend_from_slice(data)
                .map_err(|_| RequestError::InvalidArgument)?;
            state.x = x;
            state.y = y;
            state.step = Step::Position;
            Ok(())
        })
    }

    pub fn set_notification(&self, notify: Option<&'a dyn Notify>) {
        self.notify.set(notify);
    }

    pub fn process(&self) -> Process {
        critical_section::with(|cs| match self.state.borrow_ref(cs).step {
            Step::Idle => Process::Idle,
            Step::Reset | Step::InitFlush => Process::Init,
            Step::Position | Step::Data | Step::DataFlush => Process::Write,
        })
    }

    pub fn is_idle(&self) -> bool {
        self.process() == Process::Idle
    }

    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).initialized)
    }

    /// Advance the active process by one tick
    pub fn step(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if self.advance(&mut state).is_err() {
                log_warn!("nokia pin write failed");
            }
        });
    }

    fn advance(&self, state: &mut State<P, N>) -> Result<(), P::Error> {
        match state.step {
            Step::Idle | Step::InitFlush | Step::DataFlush => {}
            Step::Reset => {
                state.pins.dc.set_low()?;
                let count = state.counter;
                match count {
                    0 | 4 => state.pins.rst.set_high()?,
                    2 => state.pins.rst.set_low()?,
                    6 => {
                        if self.start(&INIT_SEQUENCE) {
                            state.step = Step::InitFlush;
                        }
                        return Ok(());
                    }
                    _ => {}
                }
                state.counter = count + 1;
            }
            Step::Position => {
                // Don't touch D/C while a previous transfer is still shifting
                if self.spi.is_tx_busy() {
                    return Ok(());
                }
                state.pins.dc.set_low()?;
                if self.start(&[Y_ADDRESS | state.y, X_ADDRESS | state.x]) {
                    state.step = Step::Data;
                }
            }
            Step::Data => {
                if self.spi.is_tx_busy() {
                    return Ok(());
                }
                state.pins.dc.set_high()?;
                if self.start(&state.data) {
                    state.step = Step::DataFlush;
                }
            }
        }
        Ok(())
    }

    /// Start a transfer; a busy transport is retried on the next tick
    fn start(&self, bytes: &[u8]) -> bool {
        match self.spi.send(bytes) {
            Ok(()) => true,
            Err(TransportError::Busy) => false,
            Err(TransportError::InvalidLength) => {
                log_error!("nokia transfer does not fit the transport");
                false
            }
        }
    }
}

impl<'a, P, H, const N: usize> Runnable for NokiaLcd<'a, P, H, N>
where
    P: OutputPin + Send,
    H: ByteTransport + Send,
{
    fn run(&self, _ctx: &mut TaskContext) {
        self.step();
    }
}

impl<'a, P, H, const N: usize> TransferListener for NokiaLcd<'a, P, H, N>
where
    P: OutputPin + Send,
    H: ByteTransport + Send,
{
    fn on_transfer_complete(&self, _module: ModuleId, kind: TransferKind) {
        if kind != TransferKind::Transmit {
            return;
        }
        let finished = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match state.step {
                Step::InitFlush => {
                    state.initialized = true;
                    state.counter = 0;
                    state.step = Step::Idle;
                    true
                }
                Step::DataFlush => {
                    state.step = Step::Idle;
                    true
                }
                // position bytes done; the tick sends the data
                _ => false,
            }
        });
        if finished {
            log_debug!("nokia process finished");
            self.notify.fire();
        }
    }
}
