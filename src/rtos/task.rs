//! Task descriptions and the per-task runtime record

/// Index of a task in the scheduler's table
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    Running,
    Suspended,
}

/// Periodic entry point of a task
///
/// A runnable performs at most one bounded step of work and returns. It
/// never waits; waiting is expressed by returning and resuming on a later
/// tick.
pub trait Runnable {
    fn run(&self, ctx: &mut TaskContext);
}

impl<F> Runnable for F
where
    F: Fn(&mut TaskContext),
{
    fn run(&self, ctx: &mut TaskContext) {
        self(ctx)
    }
}

/// A task as declared by its driver: what to run and how often
#[derive(Copy, Clone)]
pub struct Task<'a> {
    pub runnable: &'a dyn Runnable,
    pub period_ms: u32,
}

impl<'a> Task<'a> {
    pub const fn new(runnable: &'a dyn Runnable, period_ms: u32) -> Self {
        Self {
            runnable,
            period_ms,
        }
    }
}

/// A table entry: a task plus the ticks to wait before its first run
#[derive(Copy, Clone)]
pub struct TaskConfig<'a> {
    pub task: Task<'a>,
    pub delay_ticks: u32,
}

impl<'a> TaskConfig<'a> {
    pub const fn new(task: Task<'a>, delay_ticks: u32) -> Self {
        Self { task, delay_ticks }
    }
}

/// Handle given to a runnable while it executes
///
/// Requests made through the context apply to the running task only.
pub struct TaskContext {
    id: TaskId,
    tick_ms: u32,
    suspend: bool,
    extra_ticks: u32,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, tick_ms: u32) -> Self {
        Self {
            id,
            tick_ms,
            suspend: false,
            extra_ticks: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Stop the running task; its countdown freezes
    pub fn suspend(&mut self) {
        self.suspend = true;
    }

    /// Defer the next run by `ticks` without changing the period
    pub fn sleep_ticks(&mut self, ticks: u32) {
        self.extra_ticks = self.extra_ticks.saturating_add(ticks);
    }

    /// Defer the next run by whole ticks worth of `ms`; remainders are dropped
    pub fn sleep_ms(&mut self, ms: u32) {
        self.sleep_ticks(ms / self.tick_ms);
    }

    pub(crate) fn suspend_requested(&self) -> bool {
        self.suspend
    }

    pub(crate) fn extra_ticks(&self) -> u32 {
        self.extra_ticks
    }
}

/// Runtime record the scheduler keeps per task
pub(crate) struct TaskControl<'a> {
    pub(crate) runnable: &'a dyn Runnable,
    pub(crate) period_ticks: u32,
    pub(crate) remaining: u32,
    pub(crate) state: TaskState,
}

impl<'a> TaskControl<'a> {
    pub(crate) fn new(runnable: &'a dyn Runnable, period_ticks: u32, delay_ticks: u32) -> Self {
        Self {
            runnable,
            period_ticks,
            remaining: delay_ticks,
            state: TaskState::Running,
        }
    }

    pub(crate) fn suspend(&mut self) {
        self.state = TaskState::Suspended;
    }

    pub(crate) fn resume(&mut self) {
        if self.state == TaskState::Suspended {
            self.state = TaskState::Running;
        }
    }
}
