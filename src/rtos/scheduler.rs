//! Cooperative tick scheduler
//!
//! Every tick the dispatch loop walks the task table once, in table order.
//! A running task whose countdown is zero has it reloaded to its period and
//! its runnable executed to completion; then the countdown of every running
//! task is decremented, including the one that just fired. A task with
//! period `P` and delay `D` therefore fires on tick `D` (counting from zero)
//! and every `P` ticks after that.
//!
//! There is no preemption and no isolation: a runnable that overruns its
//! tick delays every task behind it in the table.

use super::task::{TaskConfig, TaskContext, TaskControl, TaskId, TaskState};
use super::tick::TickSource;
use crate::sync::TickFlag;

/// Configuration rejected when the scheduler is built
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    EmptyTable,
    ZeroTick,
    /// Task period is zero or not a whole number of ticks
    PeriodNotMultiple { index: usize },
    /// Tick period in microseconds does not fit the timer range
    TickOverflow,
}

pub struct Scheduler<'a, S, const N: usize> {
    tasks: [TaskControl<'a>; N],
    tick_ms: u32,
    source: S,
    flag: &'a TickFlag,
    elapsed: u32,
}

impl<'a, S: TickSource, const N: usize> Scheduler<'a, S, N> {
    /// Build the task table and arm the tick source
    ///
    /// The tick source is configured but left stopped, so the caller decides
    /// when dispatch begins. Its interrupt handler must raise `flag`.
    pub fn new(
        tick_ms: u32,
        mut source: S,
        flag: &'a TickFlag,
        table: [TaskConfig<'a>; N],
    ) -> Result<Self, ConfigError> {
        if N == 0 {
            log_error!("scheduler task table is empty");
            return Err(ConfigError::EmptyTable);
        }
        if tick_ms == 0 {
            log_error!("scheduler tick period is zero");
            return Err(ConfigError::ZeroTick);
        }
        let Some(tick_us) = tick_ms.checked_mul(1000) else {
            log_error!("tick of {} ms overflows the timer range", tick_ms);
            return Err(ConfigError::TickOverflow);
        };

        for (index, entry) in table.iter().enumerate() {
            let period_ms = entry.task.period_ms;
            if period_ms < tick_ms || period_ms % tick_ms != 0 {
                log_error!("task {} period is not a whole number of ticks", index);
                return Err(ConfigError::PeriodNotMultiple { index });
            }
        }

        let tasks = table.map(|entry| {
            TaskControl::new(
                entry.task.runnable,
                entry.task.period_ms / tick_ms,
                entry.delay_ticks,
            )
        });

        source.stop();
        source.configure(tick_us);
        flag.take();

        Ok(Self {
            tasks,
            tick_ms,
            source,
            flag,
            elapsed: 0,
        })
    }

    /// Start the tick source and dispatch forever
    pub fn start(&mut self) -> ! {
        log_info!("scheduler starting with {} tasks", N);
        self.source.start();
        loop {
            self.poll();
        }
    }

    /// One iteration of the dispatch loop
    ///
    /// Returns `true` when a pending tick was consumed and the table scanned.
    pub fn poll(&mut self) -> bool {
        if self.source.poll_elapsed() {
            self.flag.signal();
        }
        if !self.flag.take() {
            return false;
        }
        self.elapsed = self.elapsed.wrapping_add(1);
        self.dispatch();
        true
    }

    fn dispatch(&mut self) {
        let tick_ms = self.tick_ms;
        for (index, task) in self.tasks.iter_mut().enumerate() {
            if task.state != TaskState::Running {
                continue;
            }
            if task.remaining == 0 {
                task.remaining = task.period_ticks;
                #[cfg(feature = "debug")]
                log_trace!("tick {} task {}", self.elapsed, index);
                let mut ctx = TaskContext::new(TaskId(index), tick_ms);
                task.runnable.run(&mut ctx);
                if ctx.suspend_requested() {
                    log_debug!("task {} suspended", index);
                    task.suspend();
                }
                task.remaining = task.remaining.saturating_add(ctx.extra_ticks());
            }
            task.remaining -= 1;
        }
    }

    /// Put a suspended task back in the dispatch cycle
    ///
    /// The frozen countdown resumes from where it stopped.
    pub fn resume(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(id.0) {
            Some(task) => {
                task.resume();
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(id.0).map(|task| task.state)
    }

    /// Ticks left before the task next fires
    pub fn countdown(&self, id: TaskId) -> Option<u32> {
        self.tasks.get(id.0).map(|task| task.remaining)
    }

    pub fn period_ticks(&self, id: TaskId) -> Option<u32> {
        self.tasks.get(id.0).map(|task| task.period_ticks)
    }

    /// Ticks processed since the scheduler was built
    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
