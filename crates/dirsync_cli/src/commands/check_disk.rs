//! Check-disk command implementation.

use dirsync_engine::{Connector, GuardVerdict, ReplicationEngine};

/// Runs the check-disk command. Fails when the guard halts.
pub fn run<C: Connector>(engine: &mut ReplicationEngine<C>) -> Result<(), Box<dyn std::error::Error>> {
    match engine.check_disk() {
        GuardVerdict::Proceed => {
            println!("Disk space OK");
            Ok(())
        }
        GuardVerdict::Halt { available } => Err(format!(
            "Only {} bytes free, below the threshold of {} bytes",
            available,
            engine.config().guard.threshold_bytes
        )
        .into()),
    }
}
