//! Disk persistence for committed blocks: one JSON file per block, named
//! `<hex-sha256-of-block-json>_<n>.json`. Files are append-only and never
//! rewritten.

use std::fs;
use std::path::{Path, PathBuf};

use chain_core::{sha256_hex, BlockRequest, ChainResult};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct BlockStore {
    dir: PathBuf,
}

impl BlockStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File basename for a block: the hex SHA-256 of its canonical JSON plus
    /// the committer's 1-based received count (dropped blocks included).
    pub fn file_name(block_bytes: &[u8], received_count: u64) -> String {
        format!("{}_{}", sha256_hex(block_bytes), received_count)
    }

    pub fn block_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(format!("{file_name}.json"))
    }

    /// Write the block bytes under `file_name`, creating the chain directory
    /// on first use. Block files are world-readable (0644).
    pub fn write_block(&self, file_name: &str, block_bytes: &[u8]) -> ChainResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.block_path(file_name);
        fs::write(&path, block_bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        }
        debug!(file = %path.display(), "block written");
        Ok(())
    }

    pub fn read_block(&self, file_name: &str) -> ChainResult<BlockRequest> {
        let bytes = fs::read(self.block_path(file_name))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_embed_hash_and_count() {
        let name = BlockStore::file_name(b"block bytes", 3);
        let (hash, count) = name.split_once('_').unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sha256_hex(b"block bytes"));
        assert_eq!(count, "3");
    }
}
