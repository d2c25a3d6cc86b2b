//! Opening staged files with the desktop's default application.

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use edit_core::{FileLauncher, Result};

/// Launcher that hands files to the platform opener.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl SystemLauncher {
    /// Command that opens `path` on this platform.
    pub fn command(path: &Path) -> Command {
        #[cfg(target_os = "macos")]
        {
            let mut cmd = Command::new("open");
            cmd.arg(path);
            cmd
        }
        #[cfg(target_os = "windows")]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", ""]).arg(path);
            cmd
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(path);
            cmd
        }
    }
}

impl FileLauncher for SystemLauncher {
    fn open(&self, path: &Path) -> Result<()> {
        debug!("Launching default application for {:?}", path);
        // The opener is not waited on; it may outlive the editor session
        Self::command(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}

/// Launcher that only logs, for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyLauncher;

impl FileLauncher for LogOnlyLauncher {
    fn open(&self, path: &Path) -> Result<()> {
        info!("Staged file ready for editing: {}", path.display());
        Ok(())
    }
}
