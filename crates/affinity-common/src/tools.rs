//! External executable lookup and invocation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ScreeningError};
use crate::settings::{keys, SettingsProvider};

/// Describes how to locate one external tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    /// Human-readable name used in errors and logs.
    pub display_name: &'static str,
    /// Setting key holding an explicit executable path.
    pub setting_key: &'static str,
    /// Conventional executable names tried on `PATH`, in order.
    pub candidates: &'static [&'static str],
}

pub const VINA: ToolSpec = ToolSpec {
    display_name: "AutoDock Vina",
    setting_key: keys::VINA_PATH,
    candidates: &["vina", "vina.exe", "vina-gpu", "vina-gpu.exe", "vina64", "vina64.exe"],
};

pub const OBABEL: ToolSpec = ToolSpec {
    display_name: "OpenBabel",
    setting_key: keys::OBABEL_PATH,
    candidates: &["obabel", "obabel.exe"],
};

pub const FPOCKET: ToolSpec = ToolSpec {
    display_name: "fpocket",
    setting_key: keys::FPOCKET_PATH,
    candidates: &["fpocket", "fpocket.exe"],
};

pub const ADMET: ToolSpec = ToolSpec {
    display_name: "ADMET predictor",
    setting_key: keys::ADMET_PATH,
    candidates: &["admet_predict", "admet_predict.exe"],
};

/// Resolve an executable: configured value first, then `PATH` lookup over the
/// conventional names. A configured absolute path that does not exist is
/// skipped rather than trusted.
pub fn resolve_tool(spec: &ToolSpec, settings: &dyn SettingsProvider) -> Result<PathBuf> {
    let configured = settings.get(spec.setting_key);

    let names = configured.iter().map(String::as_str).chain(spec.candidates.iter().copied());
    for name in names {
        let path = Path::new(name);
        if path.is_absolute() {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            continue;
        }
        if let Ok(found) = which::which(name) {
            return Ok(found);
        }
    }

    Err(ScreeningError::ToolUnavailable {
        tool: spec.display_name.to_string(),
        setting_key: spec.setting_key.to_string(),
    })
}

/// Captured result of one external process run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined the way they are persisted to log artifacts.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Turn a non-zero exit into `ToolExecutionFailed`.
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ScreeningError::execution_failed(tool, &self.stderr, &self.stdout))
        }
    }
}

/// Run an executable to completion, capturing stdout, stderr and exit code.
/// A non-zero exit is returned as data, not as an error.
pub async fn run_tool<I, S>(program: &Path, args: I) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = %program.display(), "Spawning external tool");
    let output = cmd.output().await?;

    Ok(ToolOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
