//! Debounced push switches
//!
//! Each switch is sampled once per task period. A level has to be seen on
//! `SWITCH_STABLE_SAMPLES` consecutive repeats before it is latched.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::v2::InputPin;

use crate::config::{SWITCH_STABLE_SAMPLES, SWITCH_TASK_MS};
use crate::hal::gpio::{self, ActiveLevel};
use crate::rtos::{Runnable, Task, TaskContext};
use crate::sync::{Notify, NotifySlot};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchEvent {
    Pressed(usize),
    Released(usize),
}

#[derive(Copy, Clone, Default)]
struct Debounce {
    previous: bool,
    counter: u8,
    pressed: bool,
}

impl Debounce {
    /// Feed one sample; returns the new latched state when it changed
    fn update(&mut self, sample: bool) -> Option<bool> {
        if sample == self.previous {
            self.counter = self.counter.saturating_add(1);
        } else {
            self.counter = 0;
        }
        self.previous = sample;

        if self.counter < SWITCH_STABLE_SAMPLES {
            return None;
        }
        self.counter = 0;
        if self.pressed == sample {
            return None;
        }
        self.pressed = sample;
        Some(sample)
    }
}

struct Bank<P, const N: usize> {
    pins: [P; N],
    levels: [ActiveLevel; N],
    debounce: [Debounce; N],
    pending: Option<SwitchEvent>,
}

pub struct Switches<'a, P, const N: usize> {
    bank: Mutex<RefCell<Bank<P, N>>>,
    notify: NotifySlot<'a>,
}

impl<'a, P: InputPin, const N: usize> Switches<'a, P, N> {
    /// Switches that all share one active level
    pub fn new(pins: [P; N], level: ActiveLevel) -> Self {
        Self::with_levels(pins, [level; N])
    }

    pub fn with_levels(pins: [P; N], levels: [ActiveLevel; N]) -> Self {
        Self {
            bank: Mutex::new(RefCell::new(Bank {
                pins,
                levels,
                debounce: [Debounce::default(); N],
                pending: None,
            })),
            notify: NotifySlot::new(),
        }
    }

    pub fn task(&self) -> Task<'_> {
        Task::new(self, SWITCH_TASK_MS)
    }

    /// Called after any switch changes its latched state
    pub fn set_notification(&self, notify: Option<&'a dyn Notify>) {
        self.notify.set(notify);
    }

    /// Sample every switch once
    ///
    /// Returns the last change latched by this sample, which is also kept
    /// for [`take_event`](Self::take_event).
    pub fn sample(&self) -> Option<SwitchEvent> {
        let event = critical_section::with(|cs| {
            let mut bank = self.bank.borrow_ref_mut(cs);
            let bank = &mut *bank;
            let mut event = None;
            for (index, pin) in bank.pins.iter().enumerate() {
                let active = match gpio::is_active(pin, bank.levels[index]) {
                    Ok(active) => active,
                    Err(_) => {
                        log_warn!("switch {=usize} read failed", index);
                        continue;
                    }
                };
                event = match bank.debounce[index].update(active) {
                    Some(true) => Some(SwitchEvent::Pressed(index)),
                    Some(false) => Some(SwitchEvent::Released(index)),
                    None => event,
                };
            }
            if event.is_some() {
                bank.pending = event;
            }
            event
        });
        if let Some(event) = event {
            log_debug!("switch {}", event);
            self.notify.fire();
        }
        event
    }

    /// Latched state of switch `index`; `false` for unknown switches
    pub fn is_pressed(&self, index: usize) -> bool {
        critical_section::with(|cs| {
            self.bank
                .borrow_ref(cs)
                .debounce
                .get(index)
                .map_or(false, |d| d.pressed)
        })
    }

    pub fn take_event(&self) -> Option<SwitchEvent> {
        critical_section::with(|cs| self.bank.borrow_ref_mut(cs).pending.take())
    }
}

impl<'a, P: InputPin, const N: usize> Runnable for Switches<'a, P, N> {
    fn run(&self, _ctx: &mut TaskContext) {
        self.sample();
    }
}
