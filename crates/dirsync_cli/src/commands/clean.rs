//! Clean command implementation.

use dirsync_engine::{Connector, ReplicationEngine};

/// Runs the clean command.
pub fn run<C: Connector>(engine: &mut ReplicationEngine<C>) -> Result<(), Box<dyn std::error::Error>> {
    engine.clean()?;
    println!("Removed replica state under {}", engine.config().database_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_engine::ServiceAction;
    use dirsync_testkit::prelude::*;

    #[test]
    fn removes_database_files() {
        let mut replica = TestReplica::new();
        let db = replica.config().database_dir.clone();
        std::fs::create_dir_all(&db).unwrap();
        std::fs::write(db.join("data.mdb"), b"x").unwrap();

        run(&mut replica.engine).unwrap();

        assert!(db.exists());
        assert_eq!(std::fs::read_dir(&db).unwrap().count(), 0);
        assert_eq!(replica.directory_service.count(ServiceAction::Stop), 1);
    }
}
