use std::path::Path;
use std::process::Command;
use std::thread;

use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Hands finished files to the host OS. Success means the OS accepted the
/// request, not that an application actually came up.
pub trait Launcher: Send + Sync {
    fn open(&self, path: &Path) -> CoreResult<()>;
    fn reveal(&self, path: &Path) -> CoreResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn open(&self, path: &Path) -> CoreResult<()> {
        open::that_detached(path).map_err(|err| CoreError::Launch(err.to_string()))
    }

    fn reveal(&self, path: &Path) -> CoreResult<()> {
        spawn_reaped(reveal_command(path))
    }
}

/// Starts `command` and waits for it on a detached thread so the child is
/// reaped instead of lingering as a zombie.
fn spawn_reaped(mut command: Command) -> CoreResult<()> {
    let mut child = command
        .spawn()
        .map_err(|err| CoreError::Launch(err.to_string()))?;
    thread::spawn(move || match child.wait() {
        Ok(status) => debug!(%status, "launcher helper exited"),
        Err(err) => debug!(error = %err, "failed to wait for launcher helper"),
    });
    Ok(())
}

#[cfg(target_os = "windows")]
fn reveal_command(path: &Path) -> Command {
    let mut command = Command::new("explorer");
    command.arg(format!("/select,{}", path.display()));
    command
}

#[cfg(target_os = "macos")]
fn reveal_command(path: &Path) -> Command {
    let mut command = Command::new("open");
    command.arg("-R").arg(path);
    command
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn reveal_command(path: &Path) -> Command {
    let folder = path.parent().unwrap_or(path);
    let mut command = Command::new("xdg-open");
    command.arg(folder);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    #[test]
    fn reveal_opens_the_containing_folder() {
        let command = reveal_command(Path::new("/tmp/downloads/a.txt"));
        assert_eq!(command.get_program(), "xdg-open");
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, vec![Path::new("/tmp/downloads").as_os_str()]);
    }

    #[cfg(unix)]
    #[test]
    fn spawned_helper_is_reaped() {
        assert!(spawn_reaped(Command::new("true")).is_ok());
        let err = spawn_reaped(Command::new("/nonexistent/launcher-helper"));
        assert!(matches!(err, Err(CoreError::Launch(_))));
    }
}
