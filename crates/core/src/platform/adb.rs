use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Output, Stdio};

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use regex::Regex;

use crate::logger;
use crate::types::*;
use super::{DeviceTransport, Platform};

#[derive(Debug)]
pub enum AdbFailure {
    NotFound,
    Io(String),
    Exit {
        status: i32,
        stdout: String,
        stderr: String,
    },
}

impl fmt::Display for AdbFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdbFailure::NotFound => write!(f, "adb not found (set adb_path in settings.json)"),
            AdbFailure::Io(msg) => write!(f, "adb failed: {}", msg),
            AdbFailure::Exit { status, stdout, stderr } => {
                let detail = [stdout.trim(), stderr.trim()]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" | ");
                if detail.is_empty() {
                    write!(f, "adb exited with {}", status)
                } else {
                    write!(f, "adb exited with {}: {}", status, detail)
                }
            }
        }
    }
}

impl std::error::Error for AdbFailure {}

fn adb_output(adb: &Path, args: &[&str]) -> Result<Output, AdbFailure> {
    let output = ProcessCommand::new(adb)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                AdbFailure::NotFound
            } else {
                AdbFailure::Io(e.to_string())
            }
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(AdbFailure::Exit {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Parse `adb devices` output, keeping online serials that match `pattern`,
/// in listing order.
pub fn parse_devices(stdout: &str, pattern: &Regex) -> Vec<DeviceId> {
    stdout
        .lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let serial = cols.next()?;
            let state = cols.next()?;
            (state == "device" && pattern.is_match(serial)).then(|| serial.to_string())
        })
        .collect()
}

/// Split `text` so that no piece contains `%s`, which `input text` always
/// turns into a space. Each piece ends right after such a `%`.
pub fn input_text_pieces(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, _) in text.match_indices("%s") {
        pieces.push(&text[start..i + 1]);
        start = i + 1;
    }
    pieces.push(&text[start..]);
    pieces
}

/// Escape text for `input text`, which runs through the device shell and
/// reads `%s` as a space. Call on one of `input_text_pieces`.
pub fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '(' | ')' | '<' | '>' | '|' | ';' | '&' | '*' | '\\' | '~' | '"' | '\'' | '`' | '$' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

pub struct AdbPlatform {
    adb: PathBuf,
    pattern: Regex,
}

impl AdbPlatform {
    pub fn new(adb: &Path, device_pattern: &str) -> Result<Self> {
        let pattern = Regex::new(device_pattern)
            .with_context(|| format!("invalid device_pattern '{}'", device_pattern))?;
        Ok(Self { adb: adb.to_path_buf(), pattern })
    }
}

impl Platform for AdbPlatform {
    fn list_devices(&self) -> Result<Vec<DeviceId>> {
        let output = adb_output(&self.adb, &["devices"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let devices = parse_devices(&stdout, &self.pattern);
        logger::info_p("adb", &format!("found {} device(s)", devices.len()));
        Ok(devices)
    }

    fn open(&self, id: &str) -> Box<dyn DeviceTransport> {
        Box::new(AdbDevice { adb: self.adb.clone(), serial: id.to_string() })
    }
}

struct AdbDevice {
    adb: PathBuf,
    serial: String,
}

impl AdbDevice {
    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut full = vec!["-s", self.serial.as_str()];
        full.extend_from_slice(args);
        adb_output(&self.adb, &full)
            .map_err(|e| anyhow!(e).context(format!("adb {} on {}", args.join(" "), self.serial)))
    }

    fn shell(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run(&full).map(|_| ())
    }
}

impl DeviceTransport for AdbDevice {
    fn id(&self) -> &str {
        &self.serial
    }

    fn capture(&mut self) -> Result<DynamicImage> {
        let output = self.run(&["exec-out", "screencap", "-p"])?;
        if output.stdout.is_empty() {
            return Err(anyhow!("empty screencap from {}", self.serial));
        }
        image::load_from_memory(&output.stdout)
            .with_context(|| format!("decoding screencap from {}", self.serial))
    }

    fn tap(&mut self, at: Point) -> Result<()> {
        self.shell(&["input", "tap", &at.x.to_string(), &at.y.to_string()])
    }

    fn inject_text(&mut self, text: &str, source: TextSource) -> Result<()> {
        for piece in input_text_pieces(text) {
            let escaped = escape_input_text(piece);
            match source {
                TextSource::Text => self.shell(&["input", "text", &escaped])?,
                TextSource::Keyboard => self.shell(&["input", "keyboard", "text", &escaped])?,
            }
        }
        Ok(())
    }

    fn key_event(&mut self, code: &str) -> Result<()> {
        self.shell(&["input", "keyevent", code])
    }

    fn launch_app(&mut self, package: &str, activity: &str) -> Result<()> {
        self.shell(&["am", "start", "-n", &format!("{}/{}", package, activity)])
    }

    fn force_stop(&mut self, package: &str) -> Result<()> {
        self.shell(&["am", "force-stop", package])
    }

    fn clear_diagnostic_log(&mut self) -> Result<()> {
        self.run(&["logcat", "-c"]).map(|_| ())
    }
}
