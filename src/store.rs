//! Frame store: the on-disk ordered frame sequence for one capture job.
//!
//! Layout is a single flat directory of `frame_00000.jpg`, `frame_00001.jpg`,
//! ... The index increments only when a frame is actually written, so read
//! failures upstream never leave numbering gaps. The external encoder
//! consumes the store through a glob over `*.jpg`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const FRAME_PREFIX: &str = "frame_";
pub const FRAME_EXTENSION: &str = "jpg";

pub struct FrameStore {
    dir: PathBuf,
    next_index: u32,
}

impl FrameStore {
    /// Open the store at `dir`, creating the directory if absent.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create frame store directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            next_index: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Frames written so far.
    pub fn frame_count(&self) -> u32 {
        self.next_index
    }

    /// Glob pattern the encoder consumes, e.g. `frames/*.jpg`.
    pub fn glob_pattern(&self) -> String {
        format!("{}/*.{}", self.dir.display(), FRAME_EXTENSION)
    }

    /// Persist one encoded frame under the next sequential name.
    pub fn store_jpeg(&mut self, jpeg: &[u8]) -> Result<PathBuf> {
        let path = self.frame_path(self.next_index);
        fs::write(&path, jpeg)
            .with_context(|| format!("write frame {}", path.display()))?;
        self.next_index += 1;
        Ok(path)
    }

    fn frame_path(&self, index: u32) -> PathBuf {
        self.dir
            .join(format!("{}{:05}.{}", FRAME_PREFIX, index, FRAME_EXTENSION))
    }
}
