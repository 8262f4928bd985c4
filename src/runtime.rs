//! Main-loop context
//!
//! [`Runtime`] owns the snapshot, the reader, the notifier, the power
//! controller and the board, and borrows the [`Shared`] cells that interrupt
//! and radio contexts write into. The firmware builds one at startup and
//! calls [`Runtime::poll`] once per loop iteration, sleeping for
//! [`Runtime::wait_plan`] in between.

use embassy_time::{Duration, Instant};

use crate::ble::{Notifier, Radio, RadioEvents};
use crate::boot::BootRecord;
use crate::config::{PowerConfig, RadioConfig, SettingsStore, DEFAULT_ACTIVE_INTERVALS};
use crate::error::Error;
use crate::gps::{GpsReader, SerialSource, WaitPlan};
use crate::power::{Board, Cadence, Deadline, Intervals, PowerController, PowerEvent, PowerState, Step};
use crate::pps::PulseCapture;
use crate::state::FixSnapshot;

/// Delay before the radio is brought back after a fault
pub const RADIO_RECOVERY_DELAY: Duration = Duration::from_secs(5);
/// How long power-save-on-boot keeps the display and radio off
pub const BOOT_POWER_SAVE: Duration = Duration::from_secs(5);

/// State written outside the main loop
pub struct Shared {
    pub cadence: Cadence,
    pub pulse: PulseCapture,
    pub events: RadioEvents,
}

impl Shared {
    pub const fn new() -> Self {
        Self {
            cadence: Cadence::new(DEFAULT_ACTIVE_INTERVALS),
            pulse: PulseCapture::new(),
            events: RadioEvents::new(),
        }
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Runtime<'a, S, R, B> {
    snapshot: FixSnapshot,
    reader: GpsReader<S>,
    notifier: Notifier<R>,
    power: PowerController<'a>,
    board: B,
    shared: &'a Shared,
    boot: BootRecord,
    radio_recovery: Deadline,
    boot_restore: Deadline,
}

impl<'a, S, R, B> Runtime<'a, S, R, B>
where
    S: SerialSource,
    R: Radio,
    B: Board,
{
    pub fn new<C: SettingsStore + ?Sized>(
        serial: S,
        radio: R,
        board: B,
        settings: &C,
        boot: BootRecord,
        shared: &'a Shared,
        now: Instant,
    ) -> Self {
        let power_config = PowerConfig::from_store(settings);
        let radio_config = RadioConfig::from_store(settings);

        Self {
            snapshot: FixSnapshot::new(),
            reader: GpsReader::new(serial),
            notifier: Notifier::new(radio, &radio_config),
            power: PowerController::new(power_config, &shared.cadence, now),
            board,
            shared,
            boot,
            radio_recovery: Deadline::unarmed(),
            boot_restore: Deadline::unarmed(),
        }
    }

    /// Power peripherals up and bring the radio online, unless
    /// power-save-on-boot holds both off for a few seconds.
    pub fn start(&mut self, now: Instant) {
        log_info!("boot #{}", self.boot.boot_count);

        if let Err(e) = self.board.set_gnss_power(true) {
            log_error!("GNSS power up failed: {:?}", e);
        }

        if self.power.config().power_save_on_boot {
            log_info!("power save on boot, radio and display held off");
            if let Err(e) = self.board.set_display_power(false) {
                log_error!("display power down failed: {:?}", e);
            }
            if let Err(e) = self.notifier.deactivate() {
                self.handle_fault(e, now);
            }
            self.boot_restore.arm(now, BOOT_POWER_SAVE);
            return;
        }

        if let Err(e) = self.board.set_display_power(true) {
            log_error!("display power up failed: {:?}", e);
        }
        if let Err(e) = self.notifier.activate() {
            self.handle_fault(e, now);
        }
    }

    /// One main-loop iteration
    pub fn poll(&mut self, now: Instant) -> Step {
        self.snapshot.pulse = self.shared.pulse.latest();

        if let Err(e) = self.reader.poll(&mut self.snapshot) {
            log_warn!("GNSS read failed: {:?}", e);
        }

        if let Err(e) = self
            .notifier
            .drain_events(&self.shared.events, &self.snapshot.raw)
        {
            self.handle_fault(e, now);
        }

        if self.boot_restore.expired(now) {
            self.boot_restore.cancel();
            log_info!("power save on boot over");
            if let Err(e) = self.board.set_display_power(true) {
                log_error!("display power up failed: {:?}", e);
            }
            self.bring_radio_up(now);
        }

        if self.radio_recovery.expired(now) {
            self.radio_recovery.cancel();
            log_info!("restarting radio");
            self.bring_radio_up(now);
        }

        let step = self.power.tick(now, &mut self.board, &mut self.notifier);
        if step == Step::Suspend {
            self.radio_recovery.cancel();
            self.boot_restore.cancel();
            return step;
        }

        let interval = self.shared.cadence.notify_interval();
        if let Err(e) = self.notifier.tick(now, interval, &self.snapshot.raw) {
            self.handle_fault(e, now);
        }

        step
    }

    /// Top-level fault policy: radio faults take the radio down and schedule
    /// a restart, everything else is only logged.
    pub fn handle_fault(&mut self, error: Error, now: Instant) {
        if !error.is_radio() {
            log_error!("fault: {:?}", error);
            return;
        }

        log_error!("radio fault: {:?}, restarting in 5 s", error);
        if let Err(e) = self.notifier.deactivate() {
            log_error!("radio power down failed: {:?}", e);
        }
        if self.power.state() != PowerState::DeepSleep {
            self.radio_recovery.arm(now, RADIO_RECOVERY_DELAY);
        }
    }

    pub fn user_interaction(&mut self, now: Instant) -> Step {
        self.drive(PowerEvent::UserInteraction, now)
    }

    pub fn external_wake(&mut self, now: Instant) -> Step {
        self.drive(PowerEvent::ExternalWake, now)
    }

    fn drive(&mut self, event: PowerEvent, now: Instant) -> Step {
        let was = self.power.state();
        let step = self
            .power
            .handle_event(event, now, &mut self.board, &mut self.notifier);

        // The controller swallows radio failures during wake; retry later
        if was == PowerState::DeepSleep && !self.notifier.is_active() {
            self.radio_recovery.arm(now, RADIO_RECOVERY_DELAY);
        }
        step
    }

    fn bring_radio_up(&mut self, now: Instant) {
        if self.power.state() == PowerState::DeepSleep {
            return;
        }
        if let Err(e) = self.notifier.activate() {
            self.handle_fault(e, now);
        }
    }

    pub fn set_idle_timeout(&mut self, ms: u32, now: Instant) {
        self.power.set_idle_timeout(ms, now);
    }

    pub fn set_intervals(&mut self, active: Intervals, idle: Intervals) {
        self.power.set_intervals(active, idle);
    }

    /// Sleep split for the current parser cadence
    pub fn wait_plan(&self) -> WaitPlan {
        WaitPlan::for_interval(self.shared.cadence.gps_poll_ms())
    }

    pub fn snapshot(&self) -> &FixSnapshot {
        &self.snapshot
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn notifier(&self) -> &Notifier<R> {
        &self.notifier
    }

    pub fn reader(&self) -> &GpsReader<S> {
        &self.reader
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn boot(&self) -> BootRecord {
        self.boot
    }

    pub fn radio_recovery(&self) -> Deadline {
        self.radio_recovery
    }
}
