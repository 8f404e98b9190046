#![allow(dead_code)]

use core::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use cortexm3_firmware::rtos::TickSource;
use cortexm3_firmware::{Scheduler, TickFlag};
use embedded_hal::digital::v2::{InputPin, OutputPin};

/// Output line that only counts how often it was driven
#[derive(Clone, Default)]
pub struct OutLine {
    writes: Arc<AtomicU32>,
}

impl OutLine {
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl OutputPin for OutLine {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Input line the test holds high or low
#[derive(Clone, Default)]
pub struct InLine {
    high: Arc<AtomicBool>,
}

impl InLine {
    pub fn set(&self, high: bool) {
        self.high.store(high, Ordering::Relaxed);
    }
}

impl InputPin for InLine {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(self.high.load(Ordering::Relaxed))
    }

    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(!self.high.load(Ordering::Relaxed))
    }
}

/// Raise the tick flag the way the timer interrupt would and run one
/// dispatch pass, `n` times
pub fn run_ticks<S: TickSource, const N: usize>(
    sched: &mut Scheduler<'_, S, N>,
    flag: &TickFlag,
    n: u32,
) {
    for _ in 0..n {
        flag.signal();
        assert!(sched.poll());
    }
}

/// Counter usable as a runnable or a notification
#[derive(Default)]
pub struct Hits(pub AtomicU32);

impl Hits {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}
