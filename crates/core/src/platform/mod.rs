pub mod adb;
pub mod stub;

use anyhow::Result;
use image::DynamicImage;

use crate::logger;
use crate::settings::Settings;
use crate::types::*;

/// Command channel to one device. Every call is blocking; a hung call
/// stalls only the worker that owns the handle.
pub trait DeviceTransport: Send {
    fn id(&self) -> &str;
    fn capture(&mut self) -> Result<DynamicImage>;
    fn tap(&mut self, at: Point) -> Result<()>;
    fn inject_text(&mut self, text: &str, source: TextSource) -> Result<()>;
    fn key_event(&mut self, code: &str) -> Result<()>;
    fn launch_app(&mut self, package: &str, activity: &str) -> Result<()>;
    fn force_stop(&mut self, package: &str) -> Result<()>;
    fn clear_diagnostic_log(&mut self) -> Result<()>;
}

/// Platform-level operations (device enumeration, transport factory).
pub trait Platform: Send + Sync {
    fn list_devices(&self) -> Result<Vec<DeviceId>>;
    fn open(&self, id: &str) -> Box<dyn DeviceTransport>;
}

/// Create the ADB platform, or the offline stub when `force_stub` is set.
pub fn create_platform(force_stub: bool, settings: &Settings) -> Result<Box<dyn Platform>> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Ok(Box::new(stub::StubPlatform::demo()));
    }
    logger::register_prefix("adb", logger::COLOR_GRAY);
    Ok(Box::new(adb::AdbPlatform::new(&settings.adb_path, &settings.device_pattern)?))
}
