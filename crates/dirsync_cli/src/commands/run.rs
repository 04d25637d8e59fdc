//! Run command implementation.
//!
//! Reads one notification per line and hands each to the engine in
//! order. A hard error stops the run with a non-zero exit so the
//! supervisor restarts the process and the watcher redelivers.

use crate::wire;
use dirsync_engine::{Connector, ReplicationEngine, StatsSnapshot};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// Summary printed after a run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Lines read, blank lines excluded.
    pub lines: u64,
    /// Lines that could not be parsed.
    pub malformed: u64,
    /// Whether the engine ended in fallback mode.
    pub fallback: bool,
    /// Engine counters.
    pub stats: StatsSnapshot,
}

/// Runs the run command.
pub fn run<C: Connector>(
    engine: &mut ReplicationEngine<C>,
    input: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = match input {
        Some(path) => {
            let file = File::open(path).map_err(|e| format!("Cannot open {}: {}", path.display(), e))?;
            process(engine, BufReader::new(file))?
        }
        None => process(engine, io::stdin().lock())?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => print_text_output(&summary),
    }
    Ok(())
}

/// Applies every notification in `reader`.
pub fn process<C: Connector, R: BufRead>(
    engine: &mut ReplicationEngine<C>,
    reader: R,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let mut lines = 0;
    let mut malformed = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;
        let change = match wire::parse_line(&line) {
            Ok(change) => change,
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping malformed notification");
                malformed += 1;
                continue;
            }
        };
        engine.handle(&change)?;
    }
    Ok(RunSummary {
        lines,
        malformed,
        fallback: engine.is_fallback(),
        stats: engine.stats().snapshot(),
    })
}

fn print_text_output(summary: &RunSummary) {
    println!("Notifications");
    println!("=============");
    println!("  Read:           {}", summary.lines);
    println!("  Malformed:      {}", summary.malformed);
    println!("  Applied:        {}", summary.stats.applied);
    println!("  Reconciled:     {}", summary.stats.reconciled);
    println!("  Skipped:        {}", summary.stats.skipped);
    println!("  Deferred:       {}", summary.stats.deferred);
    println!("  Schema updates: {}", summary.stats.schema_updates);
    if summary.fallback {
        println!();
        println!("Fallback mode is active; changes are being captured.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_testkit::prelude::*;
    use std::io::Cursor;

    fn line(cn: &str, command: &str) -> String {
        format!(
            r#"{{"dn":"{}","new":{{"objectClass":["top","person"],"cn":["{}"],"sn":["x"]}},"command":"{}"}}"#,
            dn(cn),
            cn,
            command
        )
    }

    #[test]
    fn applies_lines_in_order() {
        let mut replica = TestReplica::new();
        let input = format!("{}\n\n{}\n", line("ann", "a"), line("bea", "a"));

        let summary = process(&mut replica.engine, Cursor::new(input)).unwrap();

        assert_eq!(summary.lines, 2);
        assert_eq!(summary.malformed, 0);
        assert_eq!(summary.stats.applied, 2);
        assert!(replica.entry(&dn("ann")).is_some());
        assert!(replica.entry(&dn("bea")).is_some());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut replica = TestReplica::new();
        let input = format!("not json\n{}\n", line("ann", "a"));

        let summary = process(&mut replica.engine, Cursor::new(input)).unwrap();

        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.stats.applied, 1);
    }

    #[test]
    fn hard_error_stops_the_run() {
        let mut replica = TestReplica::new();
        replica.probe.set(0);
        let input = format!("{}\n{}\n", line("ann", "a"), line("bea", "a"));

        assert!(process(&mut replica.engine, Cursor::new(input)).is_err());
        assert!(replica.snapshot().is_empty());
    }

    #[test]
    fn reads_from_file() {
        let mut replica = TestReplica::new();
        let path = replica.root().join("changes.jsonl");
        std::fs::write(&path, line("ann", "a")).unwrap();

        run(&mut replica.engine, Some(&path), "json").unwrap();

        assert!(replica.entry(&dn("ann")).is_some());
    }
}
