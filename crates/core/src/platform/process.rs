use std::io;
use std::process::{Command as ProcessCommand, Stdio};
use std::thread;

use crate::error::{Error, Result};
use crate::logger;
use crate::settings::ProcessSettings;
use super::ProcessSupervisor;

/// Watches and controls the game process through the OS process tools.
pub struct SystemSupervisor {
    name: String,
    launch: Vec<String>,
}

impl SystemSupervisor {
    pub fn new(settings: &ProcessSettings) -> Self {
        Self { name: settings.name.clone(), launch: settings.launch.clone() }
    }
}

fn quiet(cmd: &mut ProcessCommand) -> &mut ProcessCommand {
    cmd.stdout(Stdio::null()).stderr(Stdio::null())
}

/// Start `argv` in the background. The child is reaped on a watcher thread
/// once it exits.
pub fn spawn_detached(argv: &[String]) -> io::Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"));
    };
    let mut child = quiet(ProcessCommand::new(program).args(args)).stdin(Stdio::null()).spawn()?;
    thread::spawn(move || {
        if let Ok(status) = child.wait() {
            logger::info_p("process", &format!("child exited: {}", status));
        }
    });
    Ok(())
}

impl ProcessSupervisor for SystemSupervisor {
    #[cfg(not(windows))]
    fn is_running(&self) -> bool {
        quiet(ProcessCommand::new("pgrep").arg("-x").arg(&self.name))
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn is_running(&self) -> bool {
        let image = format!("{}.exe", self.name);
        ProcessCommand::new("tasklist")
            .args(["/FI", &format!("IMAGENAME eq {}", image), "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).to_lowercase().contains(&image.to_lowercase()))
            .unwrap_or(false)
    }

    fn launch(&self) -> Result<()> {
        if self.launch.is_empty() {
            return Err(Error::Fatal("no launch command configured".into()));
        }
        logger::info_p("process", &format!("launching {}", self.launch.join(" ")));
        spawn_detached(&self.launch).map_err(|e| Error::Fatal(format!("cannot launch {}: {}", self.launch.join(" "), e)))
    }

    #[cfg(not(windows))]
    fn kill(&self) -> Result<()> {
        logger::warn_p("process", &format!("killing {}", self.name));
        quiet(ProcessCommand::new("pkill").arg("-9").arg("-x").arg(&self.name)).status()?;
        Ok(())
    }

    #[cfg(windows)]
    fn kill(&self) -> Result<()> {
        logger::warn_p("process", &format!("killing {}", self.name));
        quiet(ProcessCommand::new("taskkill").args(["/F", "/IM", &format!("{}.exe", self.name)])).status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_launch_is_fatal() {
        let sup = SystemSupervisor::new(&ProcessSettings { name: "nothing".into(), launch: Vec::new() });
        assert!(matches!(sup.launch(), Err(Error::Fatal(_))));
        assert!(spawn_detached(&[]).is_err());
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let sup = SystemSupervisor::new(&ProcessSettings {
            name: "nothing".into(),
            launch: vec!["/nonexistent/consul-launcher".into()],
        });
        assert!(matches!(sup.launch(), Err(Error::Fatal(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_detached_child_is_reaped() {
        spawn_detached(&["true".to_string()]).unwrap();
        spawn_detached(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()]).unwrap();
    }
}
