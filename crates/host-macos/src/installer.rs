use crate::DeviceOperationError;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

/// Progress range each `createinstallmedia` phase is mapped into. Erasing
/// is quick, copying takes most of the run.
const ERASE_RANGE: (u8, u8) = (0, 10);
const COPY_RANGE: (u8, u8) = (10, 100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Unknown,
    Erasing,
    Copying,
}

impl Phase {
    fn range(self) -> (u8, u8) {
        match self {
            Phase::Unknown => (0, 100),
            Phase::Erasing => ERASE_RANGE,
            Phase::Copying => COPY_RANGE,
        }
    }
}

/// Turns `createinstallmedia` output into a monotone 0..=100 stream.
///
/// The tool counts each phase (erase, then copy) up from zero. Lines
/// starting a phase switch the sub-range that later percentages map into,
/// so the copy phase keeps moving after the erase phase has hit 100%.
#[derive(Debug, Default)]
pub struct ProgressParser {
    phase: Phase,
    last: Option<u8>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Option<u8> {
        if line.contains("Erasing") {
            self.phase = Phase::Erasing;
        } else if line.contains("Copying") {
            self.phase = Phase::Copying;
        }
        let raw = percentages(line).max()?;
        let (low, high) = self.phase.range();
        let percent = low + (u16::from(raw) * u16::from(high - low) / 100) as u8;
        if self.last.map(|last| percent <= last).unwrap_or(false) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

fn percentages(line: &str) -> impl Iterator<Item = u8> + '_ {
    line.match_indices('%').filter_map(move |(idx, _)| {
        let digits: String = line[..idx]
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return None;
        }
        let value: u32 = digits.chars().rev().collect::<String>().parse().ok()?;
        u8::try_from(value).ok().filter(|value| *value <= 100)
    })
}

/// Runs `createinstallmedia --volume <mount> --nointeraction` from the
/// installer bundle. Succeeds iff the tool exits with status 0.
pub fn run_createinstallmedia(
    installer_app: &Path,
    volume: &Path,
    on_progress: &mut dyn FnMut(u8),
) -> Result<(), DeviceOperationError> {
    let tool = installer_app.join("Contents/Resources/createinstallmedia");
    if !tool.is_file() {
        return Err(DeviceOperationError::new(
            "createinstallmedia",
            format!("tool not found in {}", installer_app.display()),
        ));
    }

    info!(installer = %installer_app.display(), volume = %volume.display(), "running createinstallmedia");
    let started = Instant::now();
    let mut child = Command::new(&tool)
        .arg("--volume")
        .arg(volume)
        .arg("--nointeraction")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| DeviceOperationError::new("createinstallmedia", err.to_string()))?;

    let stderr_reader = child.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        })
    });

    let mut parser = ProgressParser::new();
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            debug!(target: "createinstallmedia", "{}", line);
            if let Some(percent) = parser.feed(&line) {
                on_progress(percent);
            }
        }
    }

    let status = child
        .wait()
        .map_err(|err| DeviceOperationError::new("createinstallmedia", err.to_string()))?;
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    if status.success() {
        info!(minutes = started.elapsed().as_secs_f64() / 60.0, "createinstallmedia finished");
        Ok(())
    } else {
        Err(DeviceOperationError::new(
            "createinstallmedia",
            format!("exit {:?}: {}", status.code(), stderr.trim()),
        ))
    }
}
