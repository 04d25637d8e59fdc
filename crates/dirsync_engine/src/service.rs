//! Control of external services: the local directory server and the
//! engine's own supervisor.

use parking_lot::Mutex;
use std::io;
use std::process::Command;
use tracing::{debug, info};

/// Start, stop and restart a supervised service.
pub trait ServiceControl: Send + Sync {
    /// Starts the service.
    fn start(&self) -> io::Result<()>;

    /// Stops the service.
    fn stop(&self) -> io::Result<()>;

    /// Restarts the service.
    fn restart(&self) -> io::Result<()>;
}

/// A service controlled through configured command lines.
#[derive(Debug, Clone)]
pub struct ServiceCommand {
    name: String,
    start: Vec<String>,
    stop: Vec<String>,
    restart: Vec<String>,
}

impl ServiceCommand {
    /// Creates a controller from explicit command lines.
    pub fn new(
        name: impl Into<String>,
        start: Vec<String>,
        stop: Vec<String>,
        restart: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            stop,
            restart,
        }
    }

    /// A SysV init script, e.g. `/etc/init.d/slapd`.
    pub fn init_script(script: impl Into<String>) -> Self {
        let script = script.into();
        let line = |action: &str| vec![script.clone(), action.to_string()];
        Self::new(script.clone(), line("start"), line("stop"), line("restart"))
    }

    /// A runit service, e.g. `dirsync`.
    pub fn runit(service: impl Into<String>) -> Self {
        let service = service.into();
        let line = |action: &str| vec!["sv".to_string(), action.to_string(), service.clone()];
        Self::new(service.clone(), line("up"), line("down"), line("restart"))
    }

    /// Service name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, action: &str, argv: &[String]) -> io::Result<()> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no {} command configured for {}", action, self.name),
            )
        })?;
        debug!(service = %self.name, action, command = ?argv, "running service command");
        let status = Command::new(program).args(args).status()?;
        if status.success() {
            info!(service = %self.name, action, "service command finished");
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} {} exited with {}", self.name, action, status),
            ))
        }
    }
}

impl ServiceControl for ServiceCommand {
    fn start(&self) -> io::Result<()> {
        self.run("start", &self.start)
    }

    fn stop(&self) -> io::Result<()> {
        self.run("stop", &self.stop)
    }

    fn restart(&self) -> io::Result<()> {
        self.run("restart", &self.restart)
    }
}

/// Action recorded by [`RecordingService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// `start` was called.
    Start,
    /// `stop` was called.
    Stop,
    /// `restart` was called.
    Restart,
}

/// A service double that records calls.
#[derive(Debug, Default)]
pub struct RecordingService {
    actions: Mutex<Vec<ServiceAction>>,
}

impl RecordingService {
    /// Creates a recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded actions.
    pub fn actions(&self) -> Vec<ServiceAction> {
        self.actions.lock().clone()
    }

    /// Number of times `action` was called.
    pub fn count(&self, action: ServiceAction) -> usize {
        self.actions.lock().iter().filter(|a| **a == action).count()
    }
}

impl ServiceControl for RecordingService {
    fn start(&self) -> io::Result<()> {
        self.actions.lock().push(ServiceAction::Start);
        Ok(())
    }

    fn stop(&self) -> io::Result<()> {
        self.actions.lock().push(ServiceAction::Stop);
        Ok(())
    }

    fn restart(&self) -> io::Result<()> {
        self.actions.lock().push(ServiceAction::Restart);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_script_lines() {
        let service = ServiceCommand::init_script("/etc/init.d/slapd");
        assert_eq!(service.name(), "/etc/init.d/slapd");
        assert_eq!(service.restart, vec!["/etc/init.d/slapd", "restart"]);
    }

    #[test]
    fn runit_lines() {
        let service = ServiceCommand::runit("dirsync");
        assert_eq!(service.stop, vec!["sv", "down", "dirsync"]);
    }

    #[test]
    fn empty_command_is_an_error() {
        let service = ServiceCommand::new("none", vec![], vec![], vec![]);
        assert_eq!(service.start().unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[test]
    fn command_exit_status() {
        let ok = ServiceCommand::new("t", vec!["true".into()], vec!["false".into()], vec![]);
        assert!(ok.start().is_ok());
        assert!(ok.stop().is_err());
    }

    #[test]
    fn recorder_counts() {
        let service = RecordingService::new();
        service.restart().unwrap();
        service.restart().unwrap();
        service.stop().unwrap();
        assert_eq!(service.count(ServiceAction::Restart), 2);
        assert_eq!(
            service.actions(),
            vec![ServiceAction::Restart, ServiceAction::Restart, ServiceAction::Stop]
        );
    }
}
