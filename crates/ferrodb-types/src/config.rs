use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ferrodb_error::{FerroError, Result};

/// Minimum page-cache capacity the spec allows; below this the store
/// refuses to open (§4.1: "Capacity below 10 is fatal").
pub const MIN_CACHE_CAPACITY: usize = 10;

/// Process-level configuration recognized by the storage core (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Storage prefix shared by the `.db`, `.log`, and `.xid` files.
    pub path: PathBuf,
    /// Page-cache capacity, in pages.
    pub mem: usize,
}

impl DbConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mem: usize) -> Self {
        Self {
            path: path.into(),
            mem,
        }
    }

    /// Validate the configuration, matching the fatal-at-open checks the
    /// spec assigns to cache capacity (§4.1, §6).
    pub fn validate(&self) -> Result<()> {
        if self.mem < MIN_CACHE_CAPACITY {
            return Err(FerroError::MemTooSmall {
                requested: self.mem,
                minimum: MIN_CACHE_CAPACITY,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        with_extension(&self.path, "db")
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        with_extension(&self.path, "log")
    }

    #[must_use]
    pub fn xid_path(&self) -> PathBuf {
        with_extension(&self.path, "xid")
    }
}

fn with_extension(prefix: &Path, ext: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_capacity_below_minimum() {
        let cfg = DbConfig::new("/tmp/ferrodb_test", 4);
        assert!(matches!(
            cfg.validate(),
            Err(FerroError::MemTooSmall { .. })
        ));
    }

    #[test]
    fn accepts_minimum_capacity() {
        let cfg = DbConfig::new("/tmp/ferrodb_test", MIN_CACHE_CAPACITY);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn derives_companion_paths() {
        let cfg = DbConfig::new("/var/data/mydb", 32);
        assert_eq!(cfg.db_path(), PathBuf::from("/var/data/mydb.db"));
        assert_eq!(cfg.log_path(), PathBuf::from("/var/data/mydb.log"));
        assert_eq!(cfg.xid_path(), PathBuf::from("/var/data/mydb.xid"));
    }

    #[test]
    fn round_trips_through_json_for_embedders_loading_config_from_a_file() {
        let cfg = DbConfig::new("/var/data/mydb", 64);
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: DbConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.path, cfg.path);
        assert_eq!(restored.mem, cfg.mem);
    }
}
