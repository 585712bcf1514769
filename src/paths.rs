use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.join("base")
    }

    pub fn diff_dir(&self) -> PathBuf {
        self.root.join("diff")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.meta_dir().join("state.db")
    }

    pub fn ops_log_path(&self) -> PathBuf {
        self.meta_dir().join("ops.log")
    }

    /// Ensure the expected directory layout exists.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root(),
            self.base_dir().as_path(),
            self.diff_dir().as_path(),
            self.meta_dir().as_path(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Location of the state database for an arbitrary root, used when probing
/// remembered workspaces without opening them.
pub fn state_db_path_for(root: &Path) -> PathBuf {
    AppPaths::new(root).state_db_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_layout_creates_every_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path().join("ws"));
        paths.ensure_layout().unwrap();
        assert!(paths.base_dir().is_dir());
        assert!(paths.diff_dir().is_dir());
        assert!(paths.meta_dir().is_dir());
        assert_eq!(
            state_db_path_for(paths.root()),
            paths.meta_dir().join("state.db")
        );
    }
}
