//! Model bytes staged as a file for engines that load from a path.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::trace;

use crate::Result;

/// Temporary copy of model bytes on disk, removed on drop.
pub(crate) struct StagedModel {
    file: NamedTempFile,
}

impl StagedModel {
    pub(crate) fn new(bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("tensorbridge-")
            .suffix(".onnx")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        trace!("Staged {} model bytes at {}", bytes.len(), file.path().display());
        Ok(Self { file })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_staged_file_holds_bytes_and_is_removed() {
        let staged = StagedModel::new(b"\x08\x07model").unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"\x08\x07model".to_vec());
        drop(staged);
        assert!(!path.exists());
    }
}
