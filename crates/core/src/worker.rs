use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::device_log::DeviceLog;
use crate::dispatch::{Dispatcher, WorkerState};
use crate::platform::DeviceTransport;
use crate::settings::Settings;
use crate::sleep;
use crate::types::StateKind;

pub const RECOVERY_DONE: &str = "Semua aplikasi ditutup, kembali ke home";
const HOME_KEY: &str = "KEYCODE_HOME";

/// The application every worker drives.
#[derive(Debug, Clone)]
pub struct AppTarget {
    pub package: String,
    pub activity: String,
}

impl AppTarget {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { package: settings.package.clone(), activity: settings.activity.clone() }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    CaptureFailed,
    Acted(StateKind),
    /// A state was recognized but a device command failed mid-rule.
    DispatchFailed(StateKind),
    NoMatch { recovered: bool },
}

/// Owns one device for the life of the process.
pub struct DeviceWorker {
    device: Box<dyn DeviceTransport>,
    dispatcher: Arc<Dispatcher>,
    log: Arc<DeviceLog>,
    app: AppTarget,
    recovery_after_misses: u32,
    state: WorkerState,
}

impl DeviceWorker {
    pub fn new(
        device: Box<dyn DeviceTransport>,
        dispatcher: Arc<Dispatcher>,
        log: Arc<DeviceLog>,
        app: AppTarget,
        recovery_after_misses: u32,
    ) -> Self {
        Self {
            device,
            dispatcher,
            log,
            app,
            recovery_after_misses: recovery_after_misses.max(1),
            state: WorkerState::default(),
        }
    }

    pub fn id(&self) -> &str {
        self.device.id()
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Restart the app from a clean state.
    pub fn start(&mut self) {
        self.stop_app();
        self.launch_app();
    }

    /// Tick until `stop` is raised. The flag is checked before each sleep
    /// and while sleeping; a tick in progress always runs to completion.
    pub fn run(mut self, stop: Arc<AtomicBool>) {
        self.start();
        let tick_ms = self.dispatcher.timings().tick_ms;
        while !stop.load(Ordering::Relaxed) {
            if !sleep::sleep_unless_stopped(tick_ms, &stop) {
                break;
            }
            self.tick();
        }
        self.release_credential("shutdown");
        self.log.push("Worker stopped");
    }

    /// Capture → detect → dispatch, or count a miss and maybe recover.
    pub fn tick(&mut self) -> TickOutcome {
        let screen = match self.device.capture() {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                self.log.error(format!("Screenshot failed on {}: {:#}", self.device.id(), e));
                return TickOutcome::CaptureFailed;
            }
        };
        self.log.push("Take Screenshot");

        let dispatcher = Arc::clone(&self.dispatcher);
        let matches = dispatcher.detector().detect(&screen);
        let Some(first) = matches.first() else {
            return self.no_match();
        };
        let kind = first.state();
        self.state.consecutive_no_match = 0;

        match dispatcher.dispatch(self.device.as_mut(), &screen, &matches, &mut self.state, &self.log) {
            Ok(_) => TickOutcome::Acted(kind),
            Err(e) => {
                self.log.error(format!("Action failed on {} ({:?}): {:#}", self.device.id(), kind, e));
                TickOutcome::DispatchFailed(kind)
            }
        }
    }

    fn no_match(&mut self) -> TickOutcome {
        self.state.consecutive_no_match += 1;
        if self.state.consecutive_no_match < self.recovery_after_misses {
            self.log.push(format!(
                "No state recognized ({}/{})",
                self.state.consecutive_no_match, self.recovery_after_misses
            ));
            return TickOutcome::NoMatch { recovered: false };
        }
        self.state.consecutive_no_match = 0;
        self.recover();
        TickOutcome::NoMatch { recovered: true }
    }

    /// Home, force-stop, clear logcat, settle, relaunch.
    fn recover(&mut self) {
        self.release_credential("recovery");
        if let Err(e) = self.close_everything() {
            self.log.error(format!("Recovery failed on {}: {:#}", self.device.id(), e));
            return;
        }
        self.log.push(RECOVERY_DONE);
        sleep::sleep_ms(self.dispatcher.timings().recovery_settle_ms);
        self.launch_app();
    }

    fn close_everything(&mut self) -> Result<()> {
        self.device.key_event(HOME_KEY)?;
        self.device.force_stop(&self.app.package)?;
        self.device.clear_diagnostic_log()
    }

    fn stop_app(&mut self) {
        let id = self.device.id().to_string();
        match self.device.force_stop(&self.app.package) {
            Ok(()) => self.log.push(format!("Berhenti aplikasi di {}", id)),
            Err(e) => self.log.error(format!("Error menghentikan aplikasi pada {}: {:#}", id, e)),
        }
    }

    fn launch_app(&mut self) {
        let id = self.device.id().to_string();
        match self.device.launch_app(&self.app.package, &self.app.activity) {
            Ok(()) => self.log.push(format!("Membuka aplikasi di {}", id)),
            Err(e) => self.log.error(format!("Error menjalankan aplikasi pada {}: {:#}", id, e)),
        }
    }

    /// A credential never outlives the flow that took it.
    fn release_credential(&mut self, reason: &str) {
        if let Some(credential) = self.state.held.take() {
            self.log.push(format!("Credential {} returned to pool ({})", credential.id, reason));
            self.dispatcher.credentials().enqueue_tail(credential);
        }
    }
}
