pub mod credentials;
pub mod detector;
pub mod device_log;
pub mod dispatch;
pub mod library;
pub mod logger;
pub mod matcher;
pub mod orchestrator;
pub mod platform;
pub mod settings;
pub mod sleep;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testutil;
