//! Initialize command implementation.

use dirsync_engine::{Connector, ReplicationEngine};

/// Runs the initialize command.
pub fn run<C: Connector>(engine: &mut ReplicationEngine<C>) -> Result<(), Box<dyn std::error::Error>> {
    engine.initialize()?;
    println!("Replica initialized for {}", engine.config().base_dn);
    Ok(())
}
