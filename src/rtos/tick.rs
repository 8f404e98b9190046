//! Tick sources for the scheduler

use embedded_hal::timer::{CountDown, Periodic};

use crate::config::AHB_CLK_HZ;

/// Reload value for a timer clocked from the AHB bus, in bus cycles
pub const fn reload_for(tick_us: u32) -> u32 {
    (AHB_CLK_HZ / 1_000_000).saturating_mul(tick_us)
}

/// Periodic timer that paces the scheduler
///
/// `configure` arms the timer with the tick period but leaves it stopped;
/// counting begins at `start`. Interrupt-driven sources raise the
/// scheduler's [`TickFlag`](crate::sync::TickFlag) from their handler;
/// polled sources report expiry through `poll_elapsed` instead.
pub trait TickSource {
    fn configure(&mut self, tick_us: u32);
    fn start(&mut self);
    fn stop(&mut self);

    /// Report a tick expiry observed by polling
    fn poll_elapsed(&mut self) -> bool {
        false
    }
}

/// Tick source whose interrupt is owned by board code
///
/// The board arms its own timer (typically SysTick) and calls
/// `TickFlag::signal` from the exception handler. This type only records
/// what the scheduler asked for.
#[derive(Debug, Default)]
pub struct ExternalTick {
    tick_us: Option<u32>,
    running: bool,
}

impl ExternalTick {
    pub const fn new() -> Self {
        Self {
            tick_us: None,
            running: false,
        }
    }

    pub fn tick_us(&self) -> Option<u32> {
        self.tick_us
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl TickSource for ExternalTick {
    fn configure(&mut self, tick_us: u32) {
        self.running = false;
        self.tick_us = Some(tick_us);
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

/// Polled tick source over an `embedded-hal` periodic count-down timer
pub struct CountDownTick<T: CountDown> {
    timer: T,
    to_time: fn(u32) -> T::Time,
    tick_us: u32,
    running: bool,
}

impl<T> CountDownTick<T>
where
    T: CountDown + Periodic,
{
    /// `to_time` converts a period in microseconds into the timer's unit
    pub fn new(timer: T, to_time: fn(u32) -> T::Time) -> Self {
        Self {
            timer,
            to_time,
            tick_us: 0,
            running: false,
        }
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn free(self) -> T {
        self.timer
    }
}

impl<T> TickSource for CountDownTick<T>
where
    T: CountDown + Periodic,
{
    fn configure(&mut self, tick_us: u32) {
        self.tick_us = tick_us;
        self.running = false;
    }

    fn start(&mut self) {
        self.timer.start((self.to_time)(self.tick_us));
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn poll_elapsed(&mut self) -> bool {
        self.running && self.timer.wait().is_ok()
    }
}
