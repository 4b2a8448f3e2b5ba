//! Tick conversion helpers for the ME timer fabric.
//!
//! The ME-4600 family clocks every stream timer from a 33 MHz base
//! oscillator. Trigger periods are expressed in ticks of that clock; these
//! helpers convert between wall-clock time, sample frequency and ticks and
//! clamp the result to the hardware limits.
//!
//! ```text
//!           ┌─────────────────────────────────────┐
//!           │           SCAN PERIOD               │
//!           │  ┌─────┬─────┬─────┬─────┬─────┐    │
//!           │  │ CH0 │ CH1 │ CH2 │ CH3 │WAIT │    │
//!           │  └─────┴─────┴─────┴─────┴─────┘    │
//!           │   ←───CONVERT PERIOD────→│          │
//!           └─────────────────────────────────────┘
//! ```

use std::time::Duration;

use crate::error::{MeError, Result};

/// Base oscillator frequency of the stream timers, in Hz.
pub const TIMER_BASE_HZ: u64 = 33_000_000;

/// Shortest programmable channel period in ticks (2 us at 33 MHz).
pub const MIN_CHAN_TICKS: u64 = 66;

/// Convert a wall-clock period to timer ticks, rounding to the nearest tick.
///
/// Fails for a zero duration; periods below the hardware minimum are raised
/// to [`MIN_CHAN_TICKS`].
pub fn time_to_ticks(period: Duration) -> Result<u64> {
    if period.is_zero() {
        return Err(MeError::invalid_parameter(
            "timer period must be greater than zero",
        ));
    }
    let ticks = (period.as_secs_f64() * TIMER_BASE_HZ as f64).round() as u64;
    Ok(ticks.max(MIN_CHAN_TICKS))
}

/// Convert a sample frequency in Hz to a timer period in ticks.
pub fn frequency_to_ticks(hz: f64) -> Result<u64> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(MeError::invalid_parameter(format!(
            "invalid frequency: {hz}"
        )));
    }
    let ticks = (TIMER_BASE_HZ as f64 / hz).round() as u64;
    Ok(ticks.max(MIN_CHAN_TICKS))
}

/// Convert a tick count back to wall-clock time.
pub fn ticks_to_time(ticks: u64) -> Duration {
    Duration::from_secs_f64(ticks as f64 / TIMER_BASE_HZ as f64)
}
