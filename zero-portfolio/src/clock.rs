//! Deterministic simulation clock.
//!
//! A single monotonic time axis shared by every instrument. Advancing fires
//! the registered tick callbacks synchronously, in registration order.
//!
//! # States
//!
//! ```text
//! ┌──────┐ run() ┌─────────┐ pause() ┌────────┐
//! │ IDLE │──────▶│ RUNNING │────────▶│ PAUSED │
//! └──────┘       └─────────┘◀────────└────────┘
//!    ▲                │         run()     │
//!    │ reset()        │ stop()            │ stop()
//!    │                ▼                   ▼
//!    │           ┌─────────┐              │
//!    └───────────│ STOPPED │◀─────────────┘
//!                └─────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, TemporalViolation};
use crate::types::SimInstant;

/// Clock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Handle returned when registering a tick callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

/// Payload delivered to tick callbacks
#[derive(Debug, Clone)]
pub struct TickEvent<'a> {
    /// Tick sequence number, starting at 1
    pub tick: u64,
    /// Instant the clock moved to
    pub instant: SimInstant,
    /// Registered instruments, in registration order
    pub instruments: &'a [String],
}

type TickCallback = Box<dyn FnMut(&TickEvent<'_>)>;

/// Simulation clock
pub struct SimulationClock {
    start: SimInstant,
    end: SimInstant,
    current: SimInstant,
    state: ClockState,
    ticks: u64,
    instruments: Vec<String>,
    callbacks: Vec<(CallbackId, TickCallback)>,
    next_callback_id: u64,
}

impl std::fmt::Debug for SimulationClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationClock")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("current", &self.current)
            .field("state", &self.state)
            .field("ticks", &self.ticks)
            .field("instruments", &self.instruments)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl SimulationClock {
    /// Create a clock over `[start, end]`
    pub fn new(start: SimInstant, end: SimInstant) -> Result<Self> {
        if end < start {
            return Err(EngineError::config(
                "clock.end",
                format!("end {} is before start {}", end, start),
            ));
        }

        Ok(Self {
            start,
            end,
            current: start,
            state: ClockState::Idle,
            ticks: 0,
            instruments: Vec::new(),
            callbacks: Vec::new(),
            next_callback_id: 0,
        })
    }

    /// Current simulated instant
    pub fn now(&self) -> SimInstant {
        self.current
    }

    /// Configured start
    pub fn start(&self) -> SimInstant {
        self.start
    }

    /// Configured end
    pub fn end(&self) -> SimInstant {
        self.end
    }

    /// Current state
    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Ticks fired since the last reset
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Registered instruments
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Elapsed fraction of `[start, end]`, in 0..=1
    pub fn progress(&self) -> f64 {
        let total = (self.end - self.start).num_milliseconds();
        if total <= 0 {
            return if self.ticks > 0 { 1.0 } else { 0.0 };
        }
        let elapsed = (self.current - self.start).num_milliseconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Register an instrument. Returns false if it was already registered.
    pub fn register_instrument(&mut self, instrument: impl Into<String>) -> bool {
        let instrument = instrument.into();
        if self.instruments.contains(&instrument) {
            return false;
        }
        tracing::debug!(instrument = %instrument, "Instrument registered on clock");
        self.instruments.push(instrument);
        true
    }

    /// Unregister an instrument. Returns false if it was not registered.
    pub fn unregister_instrument(&mut self, instrument: &str) -> bool {
        let before = self.instruments.len();
        self.instruments.retain(|i| i != instrument);
        before != self.instruments.len()
    }

    /// Register a callback fired on every tick
    pub fn on_tick<F>(&mut self, callback: F) -> CallbackId
    where
        F: FnMut(&TickEvent<'_>) + 'static,
    {
        let id = CallbackId(self.next_callback_id);
        self.next_callback_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns false if the id is unknown.
    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cid, _)| *cid != id);
        before != self.callbacks.len()
    }

    /// Start or resume
    pub fn run(&mut self) -> Result<()> {
        match self.state {
            ClockState::Idle | ClockState::Paused => {
                self.state = ClockState::Running;
                Ok(())
            }
            ClockState::Running => Ok(()),
            ClockState::Stopped => Err(EngineError::InvalidState(
                "clock is stopped; reset before running again".into(),
            )),
        }
    }

    /// Pause a running clock
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            ClockState::Running => {
                self.state = ClockState::Paused;
                Ok(())
            }
            ClockState::Paused => Ok(()),
            other => Err(EngineError::InvalidState(format!(
                "cannot pause a clock in state {:?}",
                other
            ))),
        }
    }

    /// Stop the clock. Terminal until `reset`.
    pub fn stop(&mut self) {
        self.state = ClockState::Stopped;
    }

    /// Return to the start instant in the idle state, keeping registrations
    pub fn reset(&mut self) {
        self.current = self.start;
        self.ticks = 0;
        self.state = ClockState::Idle;
    }

    /// Advance to `target` and fire every tick callback.
    ///
    /// The first tick may land on the start instant. After that the target
    /// must be strictly later than the current instant.
    pub fn advance_to(&mut self, target: SimInstant) -> Result<u64> {
        if self.state != ClockState::Running {
            return Err(EngineError::InvalidState(format!(
                "cannot advance a clock in state {:?}",
                self.state
            )));
        }

        let first_tick_at_start = self.ticks == 0 && target == self.current;
        if target < self.current || (target == self.current && !first_tick_at_start) {
            return Err(TemporalViolation::Rewind {
                current: self.current,
                target,
            }
            .into());
        }

        if target > self.end {
            return Err(TemporalViolation::BeyondEnd {
                end: self.end,
                target,
            }
            .into());
        }

        self.current = target;
        self.ticks += 1;

        let event = TickEvent {
            tick: self.ticks,
            instant: target,
            instruments: &self.instruments,
        };
        for (_, callback) in self.callbacks.iter_mut() {
            callback(&event);
        }

        tracing::trace!(tick = self.ticks, instant = %target, "Clock advanced");
        Ok(self.ticks)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn t(hour: u32) -> SimInstant {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn running_clock() -> SimulationClock {
        let mut clock = SimulationClock::new(t(0), t(23)).unwrap();
        clock.run().unwrap();
        clock
    }

    #[test]
    fn test_end_before_start_is_configuration_error() {
        let err = SimulationClock::new(t(5), t(1)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rewind_fails_loudly() {
        let mut clock = running_clock();
        clock.advance_to(t(5)).unwrap();

        let err = clock.advance_to(t(4)).unwrap_err();
        assert!(matches!(err, EngineError::Temporal(TemporalViolation::Rewind { .. })));
        assert_eq!(clock.now(), t(5));

        let err = clock.advance_to(t(5)).unwrap_err();
        assert!(err.is_temporal());
    }

    #[test]
    fn test_first_tick_may_land_on_start() {
        let mut clock = running_clock();
        assert_eq!(clock.advance_to(t(0)).unwrap(), 1);
        assert!(clock.advance_to(t(0)).is_err());
    }

    #[test]
    fn test_beyond_end_rejected() {
        let mut clock = running_clock();
        let err = clock.advance_to(t(23) + Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, EngineError::Temporal(TemporalViolation::BeyondEnd { .. })));
        assert!(clock.advance_to(t(23)).is_ok());
    }

    #[test]
    fn test_callbacks_fire_in_registration_order() {
        let mut clock = running_clock();
        clock.register_instrument("EURUSD");
        clock.register_instrument("GBPUSD");

        let log = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&log);
        clock.on_tick(move |e| first.borrow_mut().push(format!("a{}", e.tick)));
        let second = Rc::clone(&log);
        let id = clock.on_tick(move |e| {
            second
                .borrow_mut()
                .push(format!("b{}:{}", e.tick, e.instruments.len()))
        });

        clock.advance_to(t(1)).unwrap();
        assert!(clock.remove_callback(id));
        clock.advance_to(t(2)).unwrap();

        assert_eq!(*log.borrow(), vec!["a1", "b1:2", "a2"]);
    }

    #[test]
    fn test_paused_and_stopped_clock_refuse_to_advance() {
        let mut clock = running_clock();
        clock.pause().unwrap();
        assert!(matches!(clock.advance_to(t(1)), Err(EngineError::InvalidState(_))));

        clock.run().unwrap();
        clock.advance_to(t(1)).unwrap();

        clock.stop();
        assert!(clock.advance_to(t(2)).is_err());
        assert!(clock.run().is_err());

        clock.reset();
        assert_eq!(clock.state(), ClockState::Idle);
        assert_eq!(clock.now(), t(0));
        assert_eq!(clock.ticks(), 0);
    }

    #[test]
    fn test_register_and_progress() {
        let mut clock = running_clock();
        assert!(clock.register_instrument("EURUSD"));
        assert!(!clock.register_instrument("EURUSD"));
        assert!(clock.unregister_instrument("EURUSD"));
        assert!(!clock.unregister_instrument("EURUSD"));

        clock.advance_to(t(23)).unwrap();
        assert!((clock.progress() - 1.0).abs() < 1e-12);
    }
}
