use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Map a failed tool run to the error taxonomy.
    pub fn ensure_success(&self, program: &str) -> Result<()> {
        if self.success() {
            return Ok(());
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        let lower = detail.to_ascii_lowercase();
        if lower.contains("access is denied")
            || lower.contains("access denied")
            || lower.contains("requires elevation")
            || lower.contains("elevated permissions")
        {
            return Err(AppError::Permission(format!("{program}: {detail}")));
        }
        Err(AppError::Resource(format!(
            "{program} failed (exit {}): {detail}",
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".into())
        )))
    }
}

fn configure_command_common(cmd: &mut Command, workdir: Option<&Path>) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        use windows_sys::Win32::System::Threading::CREATE_NO_WINDOW;

        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
}

pub fn run_command(program: &str, args: &[&str], workdir: Option<&Path>) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    configure_command_common(&mut cmd, workdir);
    let output = cmd
        .output()
        .map_err(|e| AppError::Resource(format!("Failed to run {program}: {e}")))?;
    let output = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    log_command(program, args, workdir, &output);
    Ok(output)
}

/// Start a program without waiting for it.
pub fn spawn_detached(program: &str, args: &[&str]) -> Result<()> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    configure_command_common(&mut cmd, None);
    cmd.spawn()
        .map_err(|e| AppError::Resource(format!("Failed to start {program}: {e}")))?;
    info!("spawned cmd={program} {}", args.join(" "));
    Ok(())
}

#[cfg(windows)]
pub fn run_elevated_command(
    program: &str,
    args: &[&str],
    workdir: Option<&Path>,
) -> Result<CommandOutput> {
    let output = run_elevated_command_impl(
        program,
        args.iter().map(|s| s.to_string()).collect(),
        workdir,
    )
    .map_err(AppError::Resource)?;
    log_command(program, args, workdir, &output);
    Ok(output)
}

#[cfg(not(windows))]
pub fn run_elevated_command(
    program: &str,
    args: &[&str],
    workdir: Option<&Path>,
) -> Result<CommandOutput> {
    run_command(program, args, workdir)
}

#[cfg(windows)]
#[elevated::elevated]
fn run_elevated_command_impl(
    program: &str,
    args: Vec<String>,
    workdir: Option<&Path>,
) -> std::result::Result<CommandOutput, String> {
    let mut cmd = Command::new(program);
    cmd.args(&args);
    configure_command_common(&mut cmd, workdir);
    let output = cmd
        .output()
        .map_err(|e| format!("Failed to run {program}: {e}"))?;
    let output = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    Ok(output)
}

fn log_command(program: &str, args: &[&str], workdir: Option<&Path>, output: &CommandOutput) {
    let mut parts = Vec::new();
    parts.push(format!("cmd={program} {}", args.join(" ")));
    if let Some(dir) = workdir {
        parts.push(format!("cwd={}", dir.display()));
    }
    if let Some(code) = output.exit_code {
        parts.push(format!("exit={code}"));
    }
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();
    if !stderr.is_empty() {
        parts.push(format!("stderr={stderr}"));
    } else if !stdout.is_empty() {
        parts.push(format!("stdout={stdout}"));
    }
    if output.success() {
        info!("{}", parts.join(" | "));
    } else {
        warn!("{}", parts.join(" | "));
    }
}
