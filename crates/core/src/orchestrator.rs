use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use crate::credentials::CredentialQueue;
use crate::detector::Detector;
use crate::device_log::LogStore;
use crate::dispatch::Dispatcher;
use crate::library::ReferenceLibrary;
use crate::logger;
use crate::matcher::ImageMatcher;
use crate::platform::Platform;
use crate::settings::Settings;
use crate::types::*;
use crate::worker::{AppTarget, DeviceWorker};

struct RunningWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the device list, the shared credential pool and every worker thread.
pub struct Orchestrator {
    platform: Box<dyn Platform>,
    dispatcher: Arc<Dispatcher>,
    logs: Arc<LogStore>,
    app: AppTarget,
    recovery_after_misses: u32,
    workers: HashMap<DeviceId, RunningWorker>,
    state: Arc<Mutex<OrchestratorState>>,
}

impl Orchestrator {
    /// Enumerate devices once and wire the shared pieces.
    pub fn discover(
        settings: &Settings,
        platform: Box<dyn Platform>,
        library: Arc<ReferenceLibrary>,
        matcher: Arc<dyn ImageMatcher>,
    ) -> Result<Self> {
        let ids = platform.list_devices().context("listing devices")?;
        logger::info(&format!("discovered {} device(s)", ids.len()));

        let detector = Detector::new(library, matcher, settings.threshold);
        let credentials = Arc::new(CredentialQueue::new(settings.credentials.clone()));
        let dispatcher = Dispatcher::new(Arc::new(detector), credentials, settings.timings.clone());

        Ok(Self {
            platform,
            dispatcher: Arc::new(dispatcher),
            logs: Arc::new(LogStore::new(&ids)),
            app: AppTarget::from_settings(settings),
            recovery_after_misses: settings.recovery_after_misses,
            workers: HashMap::new(),
            state: Arc::new(Mutex::new(OrchestratorState::Stopped)),
        })
    }

    pub fn logs(&self) -> Arc<LogStore> {
        Arc::clone(&self.logs)
    }

    pub fn credentials(&self) -> Arc<CredentialQueue> {
        Arc::clone(self.dispatcher.credentials())
    }

    pub fn state_handle(&self) -> Arc<Mutex<OrchestratorState>> {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: OrchestratorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Spawn a worker thread for every device not already running.
    /// Returns how many were started.
    pub fn start_all(&mut self) -> usize {
        let mut started = 0;
        for id in self.logs.ids() {
            if self.workers.get(&id).is_some_and(|w| !w.handle.is_finished()) {
                continue;
            }
            let Some(log) = self.logs.device(&id) else { continue };
            let worker = DeviceWorker::new(
                self.platform.open(&id),
                Arc::clone(&self.dispatcher),
                log,
                self.app.clone(),
                self.recovery_after_misses,
            );
            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            match thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker.run(flag))
            {
                Ok(handle) => {
                    self.workers.insert(id, RunningWorker { stop, handle });
                    started += 1;
                }
                Err(e) => logger::error(&format!("failed to start worker for {}: {}", id, e)),
            }
        }
        if !self.workers.is_empty() {
            self.set_state(OrchestratorState::Running);
        }
        logger::info(&format!("started {} worker(s)", started));
        started
    }

    /// Raise every stop flag, then wait for the workers to finish their
    /// current tick.
    pub fn stop_all(&mut self) {
        for w in self.workers.values() {
            w.stop.store(true, Ordering::Relaxed);
        }
        for (id, w) in self.workers.drain() {
            if w.handle.join().is_err() {
                logger::error(&format!("worker {} panicked", id));
            }
        }
        self.set_state(OrchestratorState::Stopped);
        logger::info("all workers stopped");
    }
}

/// Command loop. Runs on a background thread until `Quit` or until the
/// sender is dropped.
pub fn orchestrate(mut orch: Orchestrator, cmd_rx: mpsc::Receiver<Command>) {
    for cmd in cmd_rx.iter() {
        match cmd {
            Command::StartAll => {
                orch.start_all();
            }
            Command::Quit => {
                logger::info("shutting down");
                break;
            }
        }
    }
    orch.stop_all();
}
