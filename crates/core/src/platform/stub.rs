use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use image::DynamicImage;

use crate::types::*;
use crate::logger;
use super::{DeviceTransport, Platform};

/// One transport call observed by a stub device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Capture,
    Tap(Point),
    Text(String, TextSource),
    Key(String),
    Launch(String, String),
    ForceStop(String),
    ClearLog,
}

/// Shared view of everything a stub device was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ActionLog(Arc<Mutex<Vec<Action>>>);

impl ActionLog {
    fn push(&self, action: Action) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(action);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn taps(&self) -> Vec<Point> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Tap(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

/// Screens served to `capture()`. The last entry repeats once the rest
/// are consumed; `None` simulates a failed screencap.
#[derive(Debug, Clone, Default)]
pub struct ScreenScript(Arc<Mutex<VecDeque<Option<DynamicImage>>>>);

impl ScreenScript {
    pub fn new(screens: Vec<Option<DynamicImage>>) -> Self {
        Self(Arc::new(Mutex::new(screens.into())))
    }

    fn next(&self) -> Option<DynamicImage> {
        let mut q = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if q.len() > 1 {
            q.pop_front().flatten()
        } else {
            q.front().cloned().flatten()
        }
    }
}

pub struct StubPlatform {
    devices: Vec<DeviceId>,
    scripts: HashMap<DeviceId, ScreenScript>,
    logs: HashMap<DeviceId, ActionLog>,
}

impl StubPlatform {
    /// Devices that all start on a blank screen.
    pub fn new(ids: &[&str]) -> Self {
        let devices: Vec<DeviceId> = ids.iter().map(|s| s.to_string()).collect();
        let blank = DynamicImage::new_luma8(1280, 720);
        let scripts = devices
            .iter()
            .map(|id| (id.clone(), ScreenScript::new(vec![Some(blank.clone())])))
            .collect();
        let logs = devices.iter().map(|id| (id.clone(), ActionLog::default())).collect();
        Self { devices, scripts, logs }
    }

    /// Two offline emulators for `--stub` runs.
    pub fn demo() -> Self {
        Self::new(&["127.0.0.1:5555", "127.0.0.1:5556"])
    }

    /// Replace a device's screen script.
    pub fn set_screens(&mut self, id: &str, screens: Vec<Option<DynamicImage>>) {
        self.scripts.insert(id.to_string(), ScreenScript::new(screens));
    }

    /// Calls made through every transport opened for `id`.
    pub fn actions(&self, id: &str) -> Option<ActionLog> {
        self.logs.get(id).cloned()
    }
}

impl Platform for StubPlatform {
    fn list_devices(&self) -> Result<Vec<DeviceId>> {
        logger::info_p("stub", &format!("list_devices() -> {}", self.devices.len()));
        Ok(self.devices.clone())
    }

    fn open(&self, id: &str) -> Box<dyn DeviceTransport> {
        Box::new(StubDevice {
            id: id.to_string(),
            screens: self.scripts.get(id).cloned().unwrap_or_default(),
            log: self.logs.get(id).cloned().unwrap_or_default(),
            fail_taps: false,
        })
    }
}

/// Offline device: records calls, serves scripted screens.
pub struct StubDevice {
    id: DeviceId,
    screens: ScreenScript,
    log: ActionLog,
    fail_taps: bool,
}

impl StubDevice {
    pub fn new(id: &str, screens: ScreenScript) -> Self {
        Self { id: id.to_string(), screens, log: ActionLog::default(), fail_taps: false }
    }

    /// Every tap fails, as if the device dropped off mid-sequence.
    pub fn failing_taps(mut self) -> Self {
        self.fail_taps = true;
        self
    }

    pub fn action_log(&self) -> ActionLog {
        self.log.clone()
    }
}

impl DeviceTransport for StubDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<DynamicImage> {
        self.log.push(Action::Capture);
        self.screens.next().ok_or_else(|| anyhow!("stub {}: no screen", self.id))
    }

    fn tap(&mut self, at: Point) -> Result<()> {
        if self.fail_taps {
            return Err(anyhow!("stub {}: tap rejected", self.id));
        }
        logger::info_p("stub", &format!("{}.tap({}, {})", self.id, at.x, at.y));
        self.log.push(Action::Tap(at));
        Ok(())
    }

    fn inject_text(&mut self, text: &str, source: TextSource) -> Result<()> {
        self.log.push(Action::Text(text.to_string(), source));
        Ok(())
    }

    fn key_event(&mut self, code: &str) -> Result<()> {
        self.log.push(Action::Key(code.to_string()));
        Ok(())
    }

    fn launch_app(&mut self, package: &str, activity: &str) -> Result<()> {
        self.log.push(Action::Launch(package.to_string(), activity.to_string()));
        Ok(())
    }

    fn force_stop(&mut self, package: &str) -> Result<()> {
        self.log.push(Action::ForceStop(package.to_string()));
        Ok(())
    }

    fn clear_diagnostic_log(&mut self) -> Result<()> {
        self.log.push(Action::ClearLog);
        Ok(())
    }
}
