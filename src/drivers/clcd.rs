//! HD44780 character LCD, 4-bit bus, bit-banged from the scheduler tick
//!
//! Every command nibble takes two ticks: one to put the nibble on the bus
//! and raise the enable strobe, one to drop the strobe again. Longer waits
//! (power-up, clear) are plain idle ticks of the step counter.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::v2::OutputPin;
use heapless::Vec;

use super::RequestError;
use crate::config::{CLCD_LINE_LEN, CLCD_POWER_UP_TICKS, CLCD_TASK_MS};
use crate::hal::gpio;
use crate::rtos::{Runnable, Task, TaskContext};
use crate::sync::{Notify, NotifySlot};

const EMPTY_CMD: u8 = 0x0;
const INIT_CONST: u8 = 0x3;
const FUNCTION_SET: u8 = 0x2;
const CLEAR_DISPLAY: u8 = 0x1;
const ENTRY_INCREMENT: u8 = 0x6;
const DDRAM: u8 = 0x80;
const SECOND_LINE: u8 = 0x40;
const DISPLAY_SETTING: u8 = 0x8;
const DISPLAY_ON: u8 = 0x4;
const CURSOR_ON: u8 = 0x2;
const BLINK_ON: u8 = 0x1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lines {
    One,
    Two,
}

impl Lines {
    fn bits(self) -> u8 {
        match self {
            Lines::One => 0x0,
            Lines::Two => 0x8,
        }
    }
}

/// The multi-step operation the LCD is executing
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Process {
    Idle,
    Init,
    Write,
    Clear,
    Goto,
    Setup,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum InitStep {
    PowerUp,
    SpecialFunctionSet,
    FunctionSet,
    Display,
    Clear,
    Entry,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WriteStep {
    Address,
    Data,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    Idle,
    Init(InitStep),
    Write(WriteStep),
    Clear,
    Goto,
    Setup,
}

/// Pins of the 4-bit LCD bus
pub struct LcdPins<P> {
    pub rs: P,
    pub rw: P,
    pub en: P,
    /// D4..D7
    pub data: [P; 4],
}

struct State<P> {
    pins: LcdPins<P>,
    invert_data: bool,
    step: Step,
    strobe_high: bool,
    counter: u8,
    text: Vec<u8, CLCD_LINE_LEN>,
    index: usize,
    x: u8,
    y: u8,
    lines: Lines,
    display: u8,
    initialized: bool,
}

impl<P: OutputPin> State<P> {
    fn next_count(&mut self) -> u8 {
        let count = self.counter;
        self.counter = count.wrapping_add(1);
        count
    }

    fn address(&self) -> u8 {
        let line = if self.y == 1 { SECOND_LINE } else { 0 };
        (DDRAM | line).wrapping_add(self.x)
    }

    fn put_nibble(&mut self, register_select: bool, nibble: u8) -> Result<(), P::Error> {
        gpio::write(&mut self.pins.rs, register_select)?;
        self.pins.rw.set_low()?;
        for (bit, pin) in self.pins.data.iter_mut().enumerate() {
            let high = (nibble >> bit) & 1 == 1;
            gpio::write(pin, high != self.invert_data)?;
        }
        self.pins.en.set_high()?;
        self.strobe_high = true;
        Ok(())
    }

    fn command(&mut self, nibble: u8) -> Result<(), P::Error> {
        self.put_nibble(false, nibble)
    }

    fn data(&mut self, nibble: u8) -> Result<(), P::Error> {
        self.put_nibble(true, nibble)
    }

    fn finish(&mut self) -> bool {
        log_debug!("lcd process finished");
        self.counter = 0;
        self.index = 0;
        self.step = Step::Idle;
        true
    }

    /// One tick of the active process; `Ok(true)` when it just completed
    ///
    /// A failed pin write leaves the process where it was, so the same
    /// nibble is put out again on the next tick.
    fn advance(&mut self) -> Result<bool, P::Error> {
        if self.step == Step::Idle {
            return Ok(false);
        }
        if self.strobe_high {
            self.pins.en.set_low()?;
            self.strobe_high = false;
            return Ok(false);
        }
        let (step, counter, index) = (self.step, self.counter, self.index);
        let result = match step {
            Step::Idle => Ok(false),
            Step::Init(init) => self.init_step(init),
            Step::Write(write) => self.write_step(write),
            Step::Clear => self.clear_step(),
            Step::Goto => self.goto_step(),
            Step::Setup => self.setup_step(),
        };
        if result.is_err() {
            self.step = step;
            self.counter = counter;
            self.index = index;
        }
        result
    }

    fn init_step(&mut self, step: InitStep) -> Result<bool, P::Error> {
        let count = self.next_count();
        match step {
            InitStep::PowerUp => {
                if count == CLCD_POWER_UP_TICKS {
                    self.counter = 0;
                    self.step = Step::Init(InitStep::SpecialFunctionSet);
                    // the bus is already idle; spend one more tick before the first nibble
                    self.strobe_high = true;
                }
            }
            InitStep::SpecialFunctionSet => match count {
                0 | 5 => self.command(INIT_CONST)?,
                6 => {
                    self.command(INIT_CONST)?;
                    self.counter = 0;
                    self.step = Step::Init(InitStep::FunctionSet);
                }
                _ => {}
            },
            InitStep::FunctionSet => match count {
                0 | 1 => self.command(FUNCTION_SET)?,
                2 => {
                    self.command(self.lines.bits())?;
                    self.counter = 0;
                    self.step = Step::Init(InitStep::Display);
                }
                _ => {}
            },
            InitStep::Display => match count {
                0 => self.command(EMPTY_CMD)?,
                1 => {
                    self.command(self.display)?;
                    self.counter = 0;
                    self.step = Step::Init(InitStep::Clear);
                }
                _ => {}
            },
            InitStep::Clear => match count {
                0 => self.command(EMPTY_CMD)?,
                1 => self.command(CLEAR_DISPLAY)?,
                3 => {
                    self.counter = 0;
                    self.step = Step::Init(InitStep::Entry);
                }
                _ => {}
            },
            InitStep::Entry => match count {
                0 => self.command(EMPTY_CMD)?,
                1 => self.command(ENTRY_INCREMENT)?,
                2 => {
                    self.initialized = true;
                    return Ok(self.finish());
                }
                _ => {}
            },
        }
        Ok(false)
    }

    fn write_step(&mut self, step: WriteStep) -> Result<bool, P::Error> {
        match step {
            WriteStep::Address => {
                let address = self.address();
                match self.next_count() {
                    0 => self.command(address >> 4)?,
                    1 => {
                        self.command(address)?;
                        self.counter = 0;
                        self.step = Step::Write(WriteStep::Data);
                    }
                    _ => {}
                }
            }
            WriteStep::Data => {
                if self.index == self.text.len() {
                    return Ok(self.finish());
                }
                let ch = self.text[self.index];
                match self.next_count() {
                    0 => self.data(ch >> 4)?,
                    1 => {
                        self.data(ch)?;
                        self.counter = 0;
                        self.index += 1;
                    }
                    _ => {}
                }
            }
        }
        Ok(false)
    }

    fn clear_step(&mut self) -> Result<bool, P::Error> {
        match self.next_count() {
            0 => self.command(EMPTY_CMD)?,
            1 => self.command(CLEAR_DISPLAY)?,
            3 => return Ok(self.finish()),
            _ => {}
        }
        Ok(false)
    }

    fn goto_step(&mut self) -> Result<bool, P::Error> {
        let address = self.address();
        match self.next_count() {
            0 => self.command(address >> 4)?,
            1 => self.command(address)?,
            2 => return Ok(self.finish()),
            _ => {}
        }
        Ok(false)
    }

    fn setup_step(&mut self) -> Result<bool, P::Error> {
        match self.next_count() {
            0 => self.command(EMPTY_CMD)?,
            1 => self.command(self.display)?,
            2 => return Ok(self.finish()),
            _ => {}
        }
        Ok(false)
    }

    fn ready(&self) -> Result<(), RequestError> {
        if self.step != Step::Idle {
            return Err(RequestError::Busy);
        }
        if !self.initialized {
            return Err(RequestError::NotInitialized);
        }
        Ok(())
    }

    fn start(&mut self, step: Step) {
        self.counter = 0;
        self.index = 0;
        self.step = step;
    }
}

fn display_bits(cursor: bool, blink: bool) -> u8 {
    let mut bits = DISPLAY_SETTING | DISPLAY_ON;
    if cursor {
        bits |= CURSOR_ON;
    }
    if blink {
        bits |= BLINK_ON;
    }
    bits
}

fn check_position(x: u8, y: u8) -> Result<(), RequestError> {
    if usize::from(x) >= CLCD_LINE_LEN || y > 1 {
        return Err(RequestError::InvalidArgument);
    }
    Ok(())
}

pub struct CharLcd<'a, P> {
    state: Mutex<RefCell<State<P>>>,
    notify: NotifySlot<'a>,
}

impl<'a, P: OutputPin> CharLcd<'a, P> {
    pub fn new(pins: LcdPins<P>) -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                pins,
                invert_data: false,
                step: Step::Idle,
                strobe_high: false,
                counter: 0,
                text: Vec::new(),
                index: 0,
                x: 0,
                y: 0,
                lines: Lines::Two,
                display: display_bits(false, false),
                initialized: false,
            })),
            notify: NotifySlot::new(),
        }
    }

    /// Drive the data lines inverted, for boards with an inverting buffer
    pub fn with_inverted_data(mut self) -> Self {
        self.state.get_mut().get_mut().invert_data = true;
        self
    }

    pub fn task(&self) -> Task<'_> {
        Task::new(self, CLCD_TASK_MS)
    }

    /// Start the power-up and configuration sequence
    pub fn init(&self, lines: Lines, cursor: bool, blink: bool) -> Result<(), RequestError> {
        self.request(|state| {
            if state.step != Step::Idle {
                return Err(RequestError::Busy);
            }
            state.display = display_bits(cursor, blink);
            state.lines = lines;
            state.initialized = false;
            state.strobe_high = false;
            state.start(Step::Init(InitStep::PowerUp));
            Ok(())
        })
    }

    /// Write up to one line of text starting at (`x`, `y`)
    ///
    /// Text past the line length is dropped.
    pub fn write_string(&self, text: impl AsRef<[u8]>, x: u8, y: u8) -> Result<(), RequestError> {
        let text = text.as_ref();
        self.request(|state| {
            state.ready()?;
            check_position(x, y)?;
            state.text.clear();
            let len = text.len().min(CLCD_LINE_LEN);
            state
                .text
                .extend_from_slice(&text[..len])
                .map_err(|_| RequestError::InvalidArgument)?;
            state.x = x;
            state.y = y;
            state.start(Step::Write(WriteStep::Address));
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<(), RequestError> {
        self.request(|state| {
            state.ready()?;
            state.start(Step::Clear);
            Ok(())
        })
    }

    pub fn goto_xy(&self, x: u8, y: u8) -> Result<(), RequestError> {
        self.request(|state| {
            state.ready()?;
            check_position(x, y)?;
            state.x = x;
            state.y = y;
            state.start(Step::Goto);
            Ok(())
        })
    }

    pub fn config_cursor(&self, cursor: bool, blink: bool) -> Result<(), RequestError> {
        self.request(|state| {
            state.ready()?;
            state.display = display_bits(cursor, blink);
            state.start(Step::Setup);
            Ok(())
        })
    }

    /// Switch the display on or off, keeping the cursor settings
    pub fn config_display(&self, on: bool) -> Result<(), RequestError> {
        self.request(|state| {
            state.ready()?;
            if on {
                state.display |= DISPLAY_ON;
            } else {
                state.display &= !DISPLAY_ON;
            }
            state.start(Step::Setup);
            Ok(())
        })
    }

    pub fn set_notification(&self, notify: Option<&'a dyn Notify>) {
        self.notify.set(notify);
    }

    pub fn process(&self) -> Process {
        critical_section::with(|cs| match self.state.borrow_ref(cs).step {
            Step::Idle => Process::Idle,
            Step::Init(_) => Process::Init,
            Step::Write(_) => Process::Write,
            Step::Clear => Process::Clear,
            Step::Goto => Process::Goto,
            Step::Setup => Process::Setup,
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
        let finished = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match state.advance() {
                Ok(finished) => finished,
                Err(_) => {
                    log_warn!("lcd pin write failed, step retried");
                    false
                }
            }
        });
        if finished {
            self.notify.fire();
        }
    }

    fn request(
        &self,
        f: impl FnOnce(&mut State<P>) -> Result<(), RequestError>,
    ) -> Result<(), RequestError> {
        let result = critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)));
        if let Err(err) = result {
            log_debug!("lcd request rejected: {}", err);
        }
        result
    }
}

impl<'a, P: OutputPin> Runnable for CharLcd<'a, P> {
    fn run(&self, _ctx: &mut TaskContext) {
        self.step();
    }
}

/// One LCD line of formatted text
///
/// Implements [`ufmt::uWrite`]; output past the line length is dropped.
#[derive(Clone, Default)]
pub struct LineBuffer {
    buf: Vec<u8, CLCD_LINE_LEN>,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl AsRef<[u8]> for LineBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl ufmt::uWrite for LineBuffer {
    type Error = core::convert::Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        let room = self.buf.capacity() - self.buf.len();
        let take = s.len().min(room);
        // capacity was checked above
        let _ = self.buf.extend_from_slice(&s.as_bytes()[..take]);
        Ok(())
    }
}
