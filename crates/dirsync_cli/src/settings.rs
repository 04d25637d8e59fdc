//! Configuration file and command-line overrides.
//!
//! The file is JSON; every key is optional and mirrors a field of
//! [`ReplicationConfig`]. Durations are given in seconds or milliseconds
//! as the key name says.

use dirsync_engine::{GuardConfig, RecoveryPolicy, ReplicationConfig, RetryConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Base DN of the replicated tree.
    pub base_dn: Option<String>,
    /// Bind DN on the local directory.
    pub bind_dn: Option<String>,
    /// URL of the local directory.
    pub ldap_url: Option<String>,
    /// State directory.
    pub state_dir: Option<PathBuf>,
    /// Subtree backup directory.
    pub backup_dir: Option<PathBuf>,
    /// Bind secret file.
    pub secret_file: Option<PathBuf>,
    /// Active schema file.
    pub schema_file: Option<PathBuf>,
    /// Schema staging file.
    pub schema_staging_file: Option<PathBuf>,
    /// Directory holding the database files.
    pub database_dir: Option<PathBuf>,
    /// `fallback` or `restart`.
    pub recovery_policy: Option<String>,
    /// Bind attempts before fallback.
    pub retry_attempts: Option<u32>,
    /// Seconds between bind attempts.
    pub retry_delay_secs: Option<u64>,
    /// Attempts per notification.
    pub max_apply_attempts: Option<u32>,
    /// Milliseconds to wait after restarting the directory server.
    pub server_settle_delay_ms: Option<u64>,
    /// Schema file line width.
    pub schema_line_width: Option<usize>,
    /// Length of generated secrets.
    pub secret_length: Option<usize>,
    /// Disk space guard.
    pub guard: Option<GuardSettings>,
}

/// `guard` section of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardSettings {
    /// Whether the guard runs.
    pub enabled: Option<bool>,
    /// Minimum free bytes.
    pub threshold_bytes: Option<u64>,
    /// Mail recipient.
    pub recipient: Option<String>,
    /// Mail sender.
    pub sender: Option<String>,
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    /// `--base-dn`
    pub base_dn: Option<String>,
    /// `--state-dir`
    pub state_dir: Option<PathBuf>,
    /// `--policy`
    pub policy: Option<String>,
}

/// Reads the configuration file, if one is given.
pub fn load(path: Option<&Path>) -> Result<FileConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    let config = serde_json::from_str(&text).map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
    Ok(config)
}

impl FileConfig {
    /// Builds the engine configuration.
    pub fn into_config(self, overrides: Overrides) -> Result<ReplicationConfig, String> {
        let base_dn = overrides
            .base_dn
            .or(self.base_dn)
            .ok_or("A base DN is required (--base-dn or \"base_dn\")")?;
        let mut config = ReplicationConfig::new(base_dn);

        if let Some(bind_dn) = self.bind_dn {
            config = config.with_bind_dn(bind_dn);
        }
        if let Some(url) = self.ldap_url {
            config = config.with_ldap_url(url);
        }
        if let Some(dir) = overrides.state_dir.or(self.state_dir) {
            config = config.with_state_dir(dir);
        }
        if let Some(dir) = self.backup_dir {
            config.backup_dir = dir;
        }
        if let Some(path) = self.secret_file {
            config.secret_file = path;
        }
        if let Some(path) = self.schema_file {
            config.schema_file = path;
        }
        if let Some(path) = self.schema_staging_file {
            config.schema_staging_file = path;
        }
        if let Some(dir) = self.database_dir {
            config.database_dir = dir;
        }
        if let Some(policy) = overrides.policy.or(self.recovery_policy) {
            let policy =
                RecoveryPolicy::parse(&policy).ok_or_else(|| format!("Unknown recovery policy {:?}", policy))?;
            config = config.with_recovery_policy(policy);
        }

        let mut retry = config.retry.clone();
        if let Some(attempts) = self.retry_attempts {
            retry = RetryConfig::new(attempts, retry.delay);
        }
        if let Some(secs) = self.retry_delay_secs {
            retry = retry.with_delay(Duration::from_secs(secs));
        }
        config = config.with_retry(retry);

        if let Some(attempts) = self.max_apply_attempts {
            config = config.with_max_apply_attempts(attempts);
        }
        if let Some(ms) = self.server_settle_delay_ms {
            config = config.with_server_settle_delay(Duration::from_millis(ms));
        }
        if let Some(width) = self.schema_line_width {
            config = config.with_schema_line_width(width);
        }
        if let Some(length) = self.secret_length {
            config.secret_length = length;
        }
        if let Some(guard) = self.guard {
            let defaults = GuardConfig::default();
            config = config.with_guard(GuardConfig {
                enabled: guard.enabled.unwrap_or(defaults.enabled),
                threshold_bytes: guard.threshold_bytes.unwrap_or(defaults.threshold_bytes),
                recipient: guard.recipient.unwrap_or(defaults.recipient),
                sender: guard.sender.unwrap_or(defaults.sender),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_are_applied() {
        let file: FileConfig = serde_json::from_str(
            r#"{
                "base_dn": "dc=example,dc=org",
                "recovery_policy": "restart",
                "retry_attempts": 5,
                "retry_delay_secs": 2,
                "guard": {"threshold_bytes": 1024, "recipient": "ops@example.org"}
            }"#,
        )
        .unwrap();
        let config = file.into_config(Overrides::default()).unwrap();
        assert_eq!(config.base_dn, "dc=example,dc=org");
        assert_eq!(config.recovery_policy, RecoveryPolicy::Restart);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay, Duration::from_secs(2));
        assert_eq!(config.guard.threshold_bytes, 1024);
        assert_eq!(config.guard.recipient, "ops@example.org");
        assert!(config.guard.enabled);
    }

    #[test]
    fn overrides_win() {
        let file = FileConfig {
            base_dn: Some("dc=file".to_string()),
            recovery_policy: Some("restart".to_string()),
            ..FileConfig::default()
        };
        let config = file
            .into_config(Overrides {
                base_dn: Some("dc=cli".to_string()),
                state_dir: Some(PathBuf::from("/tmp/dirsync")),
                policy: Some("fallback".to_string()),
            })
            .unwrap();
        assert_eq!(config.base_dn, "dc=cli");
        assert_eq!(config.state_dir, PathBuf::from("/tmp/dirsync"));
        assert_eq!(config.recovery_policy, RecoveryPolicy::Fallback);
    }

    #[test]
    fn base_dn_is_required() {
        assert!(FileConfig::default().into_config(Overrides::default()).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<FileConfig>(r#"{"base": "dc=x"}"#).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("missing.json"))).is_err());
        assert!(load(None).is_ok());
    }
}
