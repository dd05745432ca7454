// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration inputs: the mapped-file directory and the data-source list.
//!
//! Reconfiguration must be validated before adoption (strong exception
//! safety: either the new config is fully applied or nothing changes), so
//! `Config::validate` is a pure check with no side effect on prior state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MemMgrError;
use crate::RrClass;

/// One configured data source: the RR class and name it serves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub rr_class: RrClass,
    pub name: String,
}

/// Top-level configuration delivered at startup and on reconfiguration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub mapped_file_dir: PathBuf,
    pub data_sources: Vec<DataSourceConfig>,
}

impl Config {
    /// Validate that `mapped_file_dir` exists and is writable. Probed with a
    /// throwaway temp file rather than trusting directory permission bits,
    /// since the process's effective uid may not be the file owner.
    pub fn validate(&self) -> Result<(), MemMgrError> {
        validate_mapped_file_dir(&self.mapped_file_dir)
    }
}

fn validate_mapped_file_dir(dir: &Path) -> Result<(), MemMgrError> {
    let metadata = fs::metadata(dir).map_err(|e| {
        MemMgrError::Config(format!(
            "mapped_file_dir {} does not exist or is not accessible: {e}",
            dir.display()
        ))
    })?;

    if !metadata.is_dir() {
        return Err(MemMgrError::Config(format!(
            "mapped_file_dir {} is not a directory",
            dir.display()
        )));
    }

    let probe = dir.join(format!(".zone-memmgr-probe-{}", std::process::id()));
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            debug!(dir = %dir.display(), "mapped_file_dir validated as writable");
            Ok(())
        }
        Err(e) => Err(MemMgrError::Config(format!(
            "mapped_file_dir {} is not writable: {e}",
            dir.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validate_accepts_writable_dir() {
        let dir = tempdir().unwrap();
        let config = Config {
            mapped_file_dir: dir.path().to_path_buf(),
            data_sources: vec![],
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_dir() {
        let config = Config {
            mapped_file_dir: PathBuf::from("/does/not/exist/for-sure"),
            data_sources: vec![],
        };
        assert!(matches!(config.validate(), Err(MemMgrError::Config(_))));
    }

    #[test]
    fn validate_rejects_file_in_place_of_dir() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("not-a-dir");
        fs::write(&file_path, b"x").unwrap();
        let config = Config {
            mapped_file_dir: file_path,
            data_sources: vec![],
        };
        assert!(matches!(config.validate(), Err(MemMgrError::Config(_))));
    }
}
