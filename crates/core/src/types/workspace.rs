use std::path::{Path, PathBuf};

/// Directory (relative to the workspace root) holding fetched input.
pub const INPUT_DIR: &str = "input";
/// Directory (relative to the workspace root) the job writes results into.
pub const OUTPUT_DIR: &str = "output";
/// File name the dataset is stored under inside [`INPUT_DIR`].
pub const DATASET_FILE: &str = "dataset";

/// Filesystem layout of one job workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl WorkspacePaths {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            input: root.join(INPUT_DIR),
            output: root.join(OUTPUT_DIR),
            root,
        }
    }

    /// Where the fetched dataset lands.
    pub fn dataset(&self) -> PathBuf {
        self.input.join(DATASET_FILE)
    }
}
