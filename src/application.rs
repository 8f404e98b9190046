//! Reference board application
//!
//! One switch and one character LCD. The switch task debounces the switch,
//! the LCD task steps the display, and the application task brings the
//! display up and writes the running press count on its second line.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embedded_hal::digital::v2::{InputPin, OutputPin};
use ufmt::uwrite;

use crate::config::{APP_TASK_MS, TICK_MS};
use crate::drivers::switch::SwitchEvent;
use crate::drivers::{CharLcd, LineBuffer, Lines, Switches};
use crate::rtos::{ConfigError, Runnable, Scheduler, Task, TaskConfig, TaskContext, TickSource};
use crate::sync::{Notify, TickFlag};

pub const SWITCH_DELAY_TICKS: u32 = 0;
pub const LCD_DELAY_TICKS: u32 = 1;
pub const APP_DELAY_TICKS: u32 = 2;

/// Counts completed device operations
#[derive(Debug, Default)]
pub struct NotifyCounter {
    count: AtomicU32,
}

impl NotifyCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Notify for NotifyCounter {
    fn notify(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Application<'a, I, O> {
    switches: &'a Switches<'a, I, 1>,
    lcd: &'a CharLcd<'a, O>,
    lcd_done: NotifyCounter,
    presses: AtomicU32,
    redraw: AtomicBool,
}

impl<'a, I: InputPin, O: OutputPin> Application<'a, I, O> {
    pub fn new(switches: &'a Switches<'a, I, 1>, lcd: &'a CharLcd<'a, O>) -> Self {
        Self {
            switches,
            lcd,
            lcd_done: NotifyCounter::new(),
            presses: AtomicU32::new(0),
            redraw: AtomicBool::new(false),
        }
    }

    /// Count LCD completions from now on
    pub fn connect(&'a self) {
        self.lcd.set_notification(Some(&self.lcd_done));
    }

    /// Task table: switch first, LCD one tick later, application last
    pub fn tasks(&self) -> [TaskConfig<'_>; 3] {
        [
            TaskConfig::new(self.switches.task(), SWITCH_DELAY_TICKS),
            TaskConfig::new(self.lcd.task(), LCD_DELAY_TICKS),
            TaskConfig::new(Task::new(self, APP_TASK_MS), APP_DELAY_TICKS),
        ]
    }

    /// Scheduler over [`tasks`](Self::tasks) at the board tick period
    pub fn scheduler<S: TickSource>(
        &'a self,
        source: S,
        flag: &'a TickFlag,
    ) -> Result<Scheduler<'a, S, 3>, ConfigError> {
        Scheduler::new(TICK_MS, source, flag, self.tasks())
    }

    /// LCD operations finished so far
    pub fn lcd_notifications(&self) -> u32 {
        self.lcd_done.count()
    }

    pub fn presses(&self) -> u32 {
        self.presses.load(Ordering::Relaxed)
    }

    fn update(&self) {
        if !self.lcd.is_initialized() {
            if self.lcd.is_idle() && self.lcd.init(Lines::Two, false, false).is_ok() {
                log_info!("lcd init started");
            }
            return;
        }

        if let Some(SwitchEvent::Pressed(_)) = self.switches.take_event() {
            self.presses.fetch_add(1, Ordering::Relaxed);
            self.redraw.store(true, Ordering::Relaxed);
        }

        if self.redraw.load(Ordering::Relaxed) && self.lcd.is_idle() {
            let mut line = LineBuffer::new();
            let _ = uwrite!(line, "Presses: {}", self.presses());
            if self.lcd.write_string(&line, 0, 1).is_ok() {
                self.redraw.store(false, Ordering::Relaxed);
            }
        }
    }
}

impl<'a, I: InputPin, O: OutputPin> Runnable for Application<'a, I, O> {
    fn run(&self, _ctx: &mut TaskContext) {
        self.update();
    }
}
