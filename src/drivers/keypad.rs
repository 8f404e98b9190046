//! 4x3 matrix keypad
//!
//! Rows are outputs, columns inputs. A scan drives one row high at a time
//! and reads the columns; a high column means the key at the crossing is
//! down.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::config::KEYPAD_TASK_MS;
use crate::hal::gpio;
use crate::rtos::{Runnable, Task, TaskContext};
use crate::sync::{Notify, NotifySlot};

pub const ROWS: usize = 4;
pub const COLUMNS: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Key {
    Digit(u8),
    Star,
    Hash,
}

const LAYOUT: [[Key; COLUMNS]; ROWS] = [
    [Key::Digit(1), Key::Digit(2), Key::Digit(3)],
    [Key::Digit(4), Key::Digit(5), Key::Digit(6)],
    [Key::Digit(7), Key::Digit(8), Key::Digit(9)],
    [Key::Star, Key::Digit(0), Key::Hash],
];

impl Key {
    pub fn at(row: usize, column: usize) -> Option<Key> {
        LAYOUT.get(row)?.get(column).copied()
    }

    /// Numeric key code: digits as themselves, `*` is 10, `#` is 11
    pub fn code(self) -> u8 {
        match self {
            Key::Digit(d) => d,
            Key::Star => 10,
            Key::Hash => 11,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Key::Digit(d) => char::from(b'0' + d),
            Key::Star => '*',
            Key::Hash => '#',
        }
    }
}

struct Matrix<O, I> {
    rows: [O; ROWS],
    columns: [I; COLUMNS],
    down: Option<Key>,
    latched: Option<Key>,
}

impl<O, I> Matrix<O, I>
where
    O: OutputPin,
    I: InputPin<Error = O::Error>,
{
    fn scan(&mut self) -> Result<Option<Key>, O::Error> {
        let mut found = None;
        'rows: for row in 0..ROWS {
            for (index, pin) in self.rows.iter_mut().enumerate() {
                gpio::write(pin, index == row)?;
            }
            for (column, pin) in self.columns.iter().enumerate() {
                if pin.is_high()? {
                    found = Key::at(row, column);
                    break 'rows;
                }
            }
        }
        for pin in self.rows.iter_mut() {
            pin.set_low()?;
        }
        Ok(found)
    }
}

pub struct Keypad<'a, O, I> {
    matrix: Mutex<RefCell<Matrix<O, I>>>,
    notify: NotifySlot<'a>,
}

impl<'a, O, I> Keypad<'a, O, I>
where
    O: OutputPin,
    I: InputPin<Error = O::Error>,
{
    pub fn new(rows: [O; ROWS], columns: [I; COLUMNS]) -> Self {
        Self {
            matrix: Mutex::new(RefCell::new(Matrix {
                rows,
                columns,
                down: None,
                latched: None,
            })),
            notify: NotifySlot::new(),
        }
    }

    pub fn task(&self) -> Task<'_> {
        Task::new(self, KEYPAD_TASK_MS)
    }

    /// Called when a new key goes down
    pub fn set_notification(&self, notify: Option<&'a dyn Notify>) {
        self.notify.set(notify);
    }

    /// Scan the matrix once and return the first key found down
    pub fn read_key(&self) -> Result<Option<Key>, O::Error> {
        critical_section::with(|cs| self.matrix.borrow_ref_mut(cs).scan())
    }

    /// Last key pressed since the previous call
    pub fn take_key(&self) -> Option<Key> {
        critical_section::with(|cs| self.matrix.borrow_ref_mut(cs).latched.take())
    }

    /// Scan and latch a key on its down edge
    pub fn poll(&self) {
        let pressed = critical_section::with(|cs| {
            let mut matrix = self.matrix.borrow_ref_mut(cs);
            let key = match matrix.scan() {
                Ok(key) => key,
                Err(_) => {
                    log_warn!("keypad scan failed");
                    return None;
                }
            };
            let edge = key.filter(|&k| matrix.down != Some(k));
            matrix.down = key;
            if edge.is_some() {
                matrix.latched = edge;
            }
            edge
        });
        if let Some(key) = pressed {
            log_debug!("key {}", key);
            self.notify.fire();
        }
    }
}

impl<'a, O, I> Runnable for Keypad<'a, O, I>
where
    O: OutputPin,
    I: InputPin<Error = O::Error>,
{
    fn run(&self, _ctx: &mut TaskContext) {
        self.poll();
    }
}
