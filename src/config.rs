//! Configuration constants for the Cortex-M3 firmware

/// AHB clock feeding the tick timer, in Hz
pub const AHB_CLK_HZ: u32 = 1_000_000;

/// Scheduler tick period in milliseconds
pub const TICK_MS: u32 = 1;

/// Switch debounce task period in milliseconds
pub const SWITCH_TASK_MS: u32 = 5;

/// Number of equal consecutive samples before a switch state is latched
pub const SWITCH_STABLE_SAMPLES: u8 = 5;

/// Character LCD task period in milliseconds
pub const CLCD_TASK_MS: u32 = 1;

/// Ticks the character LCD waits after power-up before the first command
pub const CLCD_POWER_UP_TICKS: u8 = 100;

/// Maximum characters accepted by one character LCD write
pub const CLCD_LINE_LEN: usize = 16;

/// Nokia LCD task period in milliseconds
pub const NOKIA_TASK_MS: u32 = 2;

/// Keypad scan task period in milliseconds
pub const KEYPAD_TASK_MS: u32 = 10;

/// LIN task period in milliseconds
pub const LIN_TASK_MS: u32 = 5;

/// Capacity of one transport transfer descriptor in bytes
pub const TRANSPORT_CAPACITY: usize = 64;

/// Depth of the queued UART packet queues
pub const UART_QUEUE_DEPTH: usize = 5;

/// Synchronisation byte that opens every LIN header
pub const LIN_SYNC_BYTE: u8 = 0x55;

/// Reference application task period in milliseconds
pub const APP_TASK_MS: u32 = 5;
