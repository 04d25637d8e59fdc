//! Configuration for the replication engine.

use std::path::PathBuf;
use std::time::Duration;

/// What to do with a directory error that has no dedicated handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Switch to the capture sink and retry there.
    #[default]
    Fallback,
    /// Fail the notification so the supervisor restarts the process and
    /// the watcher redelivers it.
    Restart,
}

impl RecoveryPolicy {
    /// Parses `fallback` or `restart`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "fallback" => Some(RecoveryPolicy::Fallback),
            "restart" => Some(RecoveryPolicy::Restart),
            _ => None,
        }
    }
}

/// Configuration for replicating onto the local directory.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Base DN of the replicated tree.
    pub base_dn: String,
    /// DN used to bind to the local directory.
    pub bind_dn: String,
    /// URL of the local directory (normally the ldapi socket).
    pub ldap_url: String,
    /// Directory holding engine state.
    pub state_dir: PathBuf,
    /// Directory holding pending rename markers.
    pub marker_dir: PathBuf,
    /// Capture log written in fallback mode.
    pub capture_log: PathBuf,
    /// Directory for subtree backups taken before destructive steps.
    pub backup_dir: PathBuf,
    /// File holding the local bind secret.
    pub secret_file: PathBuf,
    /// Active schema file read by the directory server.
    pub schema_file: PathBuf,
    /// Staging file the schema is written to before replacing the active one.
    pub schema_staging_file: PathBuf,
    /// Directory holding the local directory database.
    pub database_dir: PathBuf,
    /// Policy for unclassified directory errors.
    pub recovery_policy: RecoveryPolicy,
    /// Connection retry configuration.
    pub retry: RetryConfig,
    /// Upper bound on attempts for a single notification.
    pub max_apply_attempts: u32,
    /// How long to wait for the directory server after a restart.
    pub server_settle_delay: Duration,
    /// Maximum width of a line in the generated schema file.
    pub schema_line_width: usize,
    /// Length of generated bind secrets.
    pub secret_length: usize,
    /// Disk space guard configuration.
    pub guard: GuardConfig,
}

impl ReplicationConfig {
    /// Creates a configuration with the conventional replica paths.
    pub fn new(base_dn: impl Into<String>) -> Self {
        let base_dn = base_dn.into();
        let state_dir = PathBuf::from("/var/lib/dirsync");
        Self {
            bind_dn: format!("cn=update,{}", base_dn),
            base_dn,
            ldap_url: "ldapi://%2Fvar%2Frun%2Fldapi".to_string(),
            marker_dir: state_dir.join("modrdn"),
            capture_log: state_dir.join("failed.ldif"),
            state_dir,
            backup_dir: PathBuf::from("/var/backups/dirsync"),
            secret_file: PathBuf::from("/etc/ldap/rootpw.conf"),
            schema_file: PathBuf::from("/var/lib/dirsync/schema/replicated.conf"),
            schema_staging_file: PathBuf::from("/var/lib/dirsync/schema/replicated.conf.new"),
            database_dir: PathBuf::from("/var/lib/ldap"),
            recovery_policy: RecoveryPolicy::default(),
            retry: RetryConfig::default(),
            max_apply_attempts: 8,
            server_settle_delay: Duration::from_secs(1),
            schema_line_width: 78,
            secret_length: 24,
            guard: GuardConfig::default(),
        }
    }

    /// Relocates every state file below `root`.
    ///
    /// Used by tests and non-standard layouts.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.state_dir = root.join("state");
        self.marker_dir = self.state_dir.join("modrdn");
        self.capture_log = self.state_dir.join("failed.ldif");
        self.backup_dir = root.join("backup");
        self.secret_file = root.join("rootpw.conf");
        self.schema_file = root.join("schema.conf");
        self.schema_staging_file = root.join("schema.conf.new");
        self.database_dir = root.join("ldap");
        self
    }

    /// Sets the bind DN.
    pub fn with_bind_dn(mut self, bind_dn: impl Into<String>) -> Self {
        self.bind_dn = bind_dn.into();
        self
    }

    /// Sets the directory URL.
    pub fn with_ldap_url(mut self, url: impl Into<String>) -> Self {
        self.ldap_url = url.into();
        self
    }

    /// Sets the state directory; markers and the capture log move with it.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self.marker_dir = self.state_dir.join("modrdn");
        self.capture_log = self.state_dir.join("failed.ldif");
        self
    }

    /// Sets the recovery policy.
    pub fn with_recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery_policy = policy;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-notification attempt bound.
    pub fn with_max_apply_attempts(mut self, attempts: u32) -> Self {
        self.max_apply_attempts = attempts.max(1);
        self
    }

    /// Sets the delay after directory server restarts.
    pub fn with_server_settle_delay(mut self, delay: Duration) -> Self {
        self.server_settle_delay = delay;
        self
    }

    /// Sets the schema file line width.
    pub fn with_schema_line_width(mut self, width: usize) -> Self {
        self.schema_line_width = width;
        self
    }

    /// Sets the disk guard configuration.
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new("dc=example,dc=org")
    }
}

/// Configuration for connection retries.
///
/// Attempts are spaced by a fixed delay without jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of connection attempts before switching to fallback.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Sets the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the delay to wait before `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(10))
    }
}

/// Configuration for the disk space guard.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Whether the guard runs before each notification.
    pub enabled: bool,
    /// Minimum free bytes on the database filesystem.
    pub threshold_bytes: u64,
    /// Operator mail recipient.
    pub recipient: String,
    /// Sender address of operator mail.
    pub sender: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 10 * 1024 * 1024,
            recipient: "root".to_string(),
            sender: "root".to_string(),
        }
    }
}
