use serde::{Deserialize, Serialize};

/// Device serial as reported by `adb devices` (e.g. `127.0.0.1:5555`)
pub type DeviceId = String;

/// Pixel coordinate on the device screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Login identity plus the answer to its verification challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub password: String,
    pub answer: String,
}

impl Credential {
    pub fn new(id: &str, password: &str, answer: &str) -> Self {
        Self {
            id: id.to_string(),
            password: password.to_string(),
            answer: answer.to_string(),
        }
    }
}

/// Top-level UI states of the target application, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Speeder,
    UpdatePrompt,
    Home,
    Login,
    VerificationLayer,
    VerificationInput,
}

impl StateKind {
    pub const ALL: [StateKind; 6] = [
        StateKind::Speeder,
        StateKind::UpdatePrompt,
        StateKind::Home,
        StateKind::Login,
        StateKind::VerificationLayer,
        StateKind::VerificationInput,
    ];
}

/// Whether a template identifies a whole screen or a control inside one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateRole {
    PrimaryState,
    SubTarget,
}

/// Which injection primitive `DeviceTransport::inject_text` uses.
/// Some input widgets only register one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// `input text`
    Text,
    /// `input keyboard text`
    Keyboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Running,
}

/// Command from the presentation layer to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartAll,
    Quit,
}
