//! Power state controller
//!
//! ```text
//!            inactivity              deep-sleep
//!   Active ─────────────▶ Idle ─────────────────▶ DeepSleep
//!     ▲                    │                          │
//!     └──── interaction ───┘                          │
//!     └────────────────── external wake ──────────────┘
//! ```
//!
//! Deadlines are plain instants compared against the clock in [`tick`];
//! nothing fires on its own. Every transition writes the [`Cadence`] pair and
//! drives the board and radio. A collaborator that fails is logged and the
//! new state commits anyway.
//!
//! [`tick`]: PowerController::tick

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_time::{Duration, Instant};

use crate::config::{idle_timeout, PowerConfig};
use crate::error::{Peripheral, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Active,
    Idle,
    /// Terminal for this runtime instance
    DeepSleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerEvent {
    /// Button press or any other user input
    UserInteraction,
    /// Wake pin asserted while suspended
    ExternalWake,
}

/// What the caller must do after driving the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    Stay,
    Entered(PowerState),
    /// Deep sleep committed; halt until the wake source fires
    Suspend,
}

/// Parser poll and notify intervals for one power state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Intervals {
    pub gps_poll_ms: u32,
    pub notify_ms: u32,
}

/// Cadence pair written by the controller, read by the parser and notifier
pub struct Cadence {
    gps_poll_ms: AtomicU32,
    notify_ms: AtomicU32,
}

impl Cadence {
    pub const fn new(initial: Intervals) -> Self {
        Self {
            gps_poll_ms: AtomicU32::new(initial.gps_poll_ms),
            notify_ms: AtomicU32::new(initial.notify_ms),
        }
    }

    fn apply(&self, intervals: Intervals) {
        self.gps_poll_ms.store(intervals.gps_poll_ms, Ordering::Relaxed);
        self.notify_ms.store(intervals.notify_ms, Ordering::Relaxed);
    }

    pub fn gps_poll_ms(&self) -> u32 {
        self.gps_poll_ms.load(Ordering::Relaxed)
    }

    pub fn notify_ms(&self) -> u32 {
        self.notify_ms.load(Ordering::Relaxed)
    }

    pub fn notify_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.notify_ms()))
    }

    pub fn current(&self) -> Intervals {
        Intervals {
            gps_poll_ms: self.gps_poll_ms(),
            notify_ms: self.notify_ms(),
        }
    }
}

/// One-shot deadline against the monotonic clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub const fn unarmed() -> Self {
        Self(None)
    }

    pub fn arm(&mut self, now: Instant, after: Duration) {
        self.0 = Some(now + after);
    }

    pub fn cancel(&mut self) {
        self.0 = None;
    }

    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.0.is_some_and(|at| now >= at)
    }

    pub fn at(&self) -> Option<Instant> {
        self.0
    }
}

/// Board-level power switches
pub trait Board {
    fn set_display_power(&mut self, on: bool) -> Result<()>;
    fn set_gnss_power(&mut self, on: bool) -> Result<()>;
    /// Configure the pin that ends deep sleep
    fn arm_wake_source(&mut self) -> Result<()>;
}

/// Radio side of a power transition
pub trait RadioPower {
    fn activate(&mut self) -> Result<()>;
    fn deactivate(&mut self) -> Result<()>;
}

fn attempt(what: Peripheral, result: Result<()>) {
    if let Err(e) = result {
        log_error!("{:?} power change failed: {:?}", what, e);
    }
}

pub struct PowerController<'a> {
    state: PowerState,
    config: PowerConfig,
    cadence: &'a Cadence,
    inactivity: Deadline,
    deep_sleep: Deadline,
}

impl<'a> PowerController<'a> {
    /// Start in `Active` with the active cadence and the inactivity deadline armed
    pub fn new(config: PowerConfig, cadence: &'a Cadence, now: Instant) -> Self {
        cadence.apply(config.active);
        let mut inactivity = Deadline::unarmed();
        inactivity.arm(now, config.idle_timeout);
        Self {
            state: PowerState::Active,
            config,
            cadence,
            inactivity,
            deep_sleep: Deadline::unarmed(),
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn inactivity_deadline(&self) -> Deadline {
        self.inactivity
    }

    pub fn deep_sleep_deadline(&self) -> Deadline {
        self.deep_sleep
    }

    /// Earliest armed deadline, for sizing the caller's wait
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.inactivity.at(), self.deep_sleep.at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn handle_event<B, R>(
        &mut self,
        event: PowerEvent,
        now: Instant,
        board: &mut B,
        radio: &mut R,
    ) -> Step
    where
        B: Board + ?Sized,
        R: RadioPower + ?Sized,
    {
        log_debug!("{:?} while {:?}", event, self.state);
        match self.state {
            PowerState::Active => {
                self.inactivity.arm(now, self.config.idle_timeout);
                Step::Stay
            }
            PowerState::Idle => {
                self.exit_idle(now, board);
                Step::Entered(PowerState::Active)
            }
            // An interaction reaching a suspended instance counts as a wake
            PowerState::DeepSleep => {
                self.wake(now, board, radio);
                Step::Entered(PowerState::Active)
            }
        }
    }

    /// Fire whichever deadline has passed
    pub fn tick<B, R>(&mut self, now: Instant, board: &mut B, radio: &mut R) -> Step
    where
        B: Board + ?Sized,
        R: RadioPower + ?Sized,
    {
        match self.state {
            PowerState::Active if self.inactivity.expired(now) => {
                self.enter_idle(now, board);
                Step::Entered(PowerState::Idle)
            }
            PowerState::Idle if self.deep_sleep.expired(now) => {
                self.enter_deep_sleep(board, radio);
                Step::Suspend
            }
            _ => Step::Stay,
        }
    }

    /// Change the idle timeout (5 s floor) and rearm the inactivity deadline
    pub fn set_idle_timeout(&mut self, ms: u32, now: Instant) {
        self.config.idle_timeout = idle_timeout(ms);
        if self.state == PowerState::Active {
            self.inactivity.arm(now, self.config.idle_timeout);
        }
        log_info!("idle timeout set to {} ms", self.config.idle_timeout.as_millis());
    }

    /// Replace both interval pairs and apply the one for the current state
    pub fn set_intervals(&mut self, active: Intervals, idle: Intervals) {
        self.config.active = active;
        self.config.idle = idle;
        match self.state {
            PowerState::Active => self.cadence.apply(active),
            PowerState::Idle => self.cadence.apply(idle),
            PowerState::DeepSleep => {}
        }
    }

    fn enter_idle<B: Board + ?Sized>(&mut self, now: Instant, board: &mut B) {
        log_info!("entering idle");
        self.state = PowerState::Idle;
        self.cadence.apply(self.config.idle);
        attempt(Peripheral::Display, board.set_display_power(false));
        self.inactivity.cancel();
        self.deep_sleep.arm(now, self.config.deep_sleep_timeout);
    }

    fn exit_idle<B: Board + ?Sized>(&mut self, now: Instant, board: &mut B) {
        log_info!("leaving idle");
        self.state = PowerState::Active;
        self.cadence.apply(self.config.active);
        attempt(Peripheral::Display, board.set_display_power(true));
        self.deep_sleep.cancel();
        self.inactivity.arm(now, self.config.idle_timeout);
    }

    fn enter_deep_sleep<B, R>(&mut self, board: &mut B, radio: &mut R)
    where
        B: Board + ?Sized,
        R: RadioPower + ?Sized,
    {
        log_info!("entering deep sleep");
        self.state = PowerState::DeepSleep;
        attempt(Peripheral::Radio, radio.deactivate());
        attempt(Peripheral::Gnss, board.set_gnss_power(false));
        attempt(Peripheral::Display, board.set_display_power(false));
        attempt(Peripheral::WakeSource, board.arm_wake_source());
        self.inactivity.cancel();
        self.deep_sleep.cancel();
    }

    fn wake<B, R>(&mut self, now: Instant, board: &mut B, radio: &mut R)
    where
        B: Board + ?Sized,
        R: RadioPower + ?Sized,
    {
        log_info!("waking from deep sleep");
        self.state = PowerState::Active;
        attempt(Peripheral::Gnss, board.set_gnss_power(true));
        attempt(Peripheral::Display, board.set_display_power(true));
        attempt(Peripheral::Radio, radio.activate());
        self.cadence.apply(self.config.active);
        self.inactivity.arm(now, self.config.idle_timeout);
    }
}
