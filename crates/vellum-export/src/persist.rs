//! Atomic replacement of generated files.
//!
//! Payloads are first written to temporary files next to their targets and
//! only renamed into place once every payload of a batch was staged.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::Result;

pub type TempFile = tempfile::NamedTempFile;

/// A payload written to a temporary file, waiting to replace its target.
#[derive(Debug)]
pub struct Staged {
    target: PathBuf,
    file: TempFile,
}

impl Staged {
    /// Write `bytes` to a temporary file in the target's directory.
    ///
    /// Dropping the result without committing removes the temporary file.
    pub fn new(target: &Path, bytes: &[u8]) -> Result<Self> {
        let parent = target
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let mut file = TempFile::new_in(parent)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;

        Ok(Self {
            target: target.to_path_buf(),
            file,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the temporary file over the target.
    pub fn commit(self) -> Result<()> {
        self.file.persist(&self.target).map_err(|e| e.error)?;
        debug!(path = %self.target.display(), "Replaced file");
        Ok(())
    }
}

/// Replace a file in one step.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    Staged::new(target, bytes)?.commit()
}

/// Stage every payload, then commit them in order.
///
/// Nothing is replaced unless all payloads could be staged.
pub fn commit_all(payloads: &[(PathBuf, Vec<u8>)]) -> Result<()> {
    let staged = payloads
        .iter()
        .map(|(target, bytes)| Staged::new(target, bytes))
        .collect::<Result<Vec<_>>>()?;

    for file in staged {
        file.commit()?;
    }
    Ok(())
}
