//! Fallback command implementations.

use dirsync_engine::{Connector, ReplicationEngine};
use serde::Serialize;

/// Fallback status as printed.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Whether changes are being captured.
    pub active: bool,
    /// Capture log path.
    pub path: String,
    /// Records waiting in the capture log.
    pub records: usize,
}

/// Prints the fallback status.
pub fn status<C: Connector>(
    engine: &mut ReplicationEngine<C>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = engine.fallback_status()?;
    let result = StatusResult {
        active: status.active,
        path: status.path.display().to_string(),
        records: status.records,
    };
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Fallback:    {}", if result.active { "active" } else { "inactive" });
            println!("Capture log: {}", result.path);
            println!("Records:     {}", result.records);
        }
    }
    Ok(())
}

/// Archives the capture log and returns to live mode.
pub fn reset<C: Connector>(engine: &mut ReplicationEngine<C>) -> Result<(), Box<dyn std::error::Error>> {
    match engine.reset_fallback()? {
        Some(archive) => println!("Capture log archived to {}", archive.display()),
        None => println!("No capture log to archive"),
    }
    Ok(())
}

/// Replays the capture log into the directory.
pub fn replay<C: Connector>(engine: &mut ReplicationEngine<C>) -> Result<(), Box<dyn std::error::Error>> {
    let report = engine.replay_capture()?;
    println!("Applied:   {}", report.applied);
    println!("Converged: {}", report.converged);
    if let Some(archive) = report.archive {
        println!("Archived:  {}", archive.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_engine::ChangeNotification;
    use dirsync_testkit::prelude::*;

    #[test]
    fn reset_leaves_fallback() {
        let mut replica = TestReplica::new();
        replica.engine.connections().enter_fallback();
        replica.apply(&ChangeNotification::add(dn("ann"), person("ann", 1)));

        status(&mut replica.engine, "json").unwrap();
        reset(&mut replica.engine).unwrap();

        assert!(!replica.engine.is_fallback());
        assert_eq!(replica.archived_logs().len(), 1);
        assert!(replica.entry(&dn("ann")).is_none());
    }

    #[test]
    fn replay_applies_captured_changes() {
        let mut replica = TestReplica::new();
        replica.engine.connections().enter_fallback();
        replica.apply(&ChangeNotification::add(dn("ann"), person("ann", 1)));

        replay(&mut replica.engine).unwrap();

        assert!(!replica.engine.is_fallback());
        assert!(replica.entry(&dn("ann")).is_some());
    }
}
