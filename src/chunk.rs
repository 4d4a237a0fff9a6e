//! Sorted chunk storage.
//!
//! Chunks are plain text files, one record per line, `\n` terminated. A chunk is written
//! once by the split phase, read back once by the merge phase and deleted afterwards.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use log;
use tempfile;

/// Manages the temporary storage chunk files live in.
///
/// The store resolves a parent location (an explicitly provided directory, created if
/// absent, or the system temporary directory) and creates a run-scoped subdirectory
/// inside it, so chunk files from concurrent runs cannot collide. Chunk files are named
/// by a sequential index. The subdirectory is removed when the store is dropped; chunk
/// files themselves are removed by the merge phase once it has consumed them.
pub struct ChunkStore {
    dir: tempfile::TempDir,
    rw_buf_size: Option<usize>,
    next_id: usize,
}

impl ChunkStore {
    /// Creates a chunk store.
    ///
    /// # Arguments
    /// * `tmp_path` - Parent directory for the run-scoped storage. If the parameter is
    ///   [`None`] the default OS temporary directory will be used.
    /// * `rw_buf_size` - Chunk file read/write buffer size.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let dir = match tmp_path {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                tempfile::tempdir_in(parent)?
            }
            None => tempfile::tempdir()?,
        };

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(ChunkStore {
            dir,
            rw_buf_size,
            next_id: 0,
        });
    }

    /// Persists `lines` as the next chunk, assigning it the next sequential id.
    /// The caller is responsible for passing lines already sorted ascending.
    pub fn create_chunk(&mut self, lines: impl IntoIterator<Item = String>) -> io::Result<SortedChunk> {
        let id = self.next_id;
        self.next_id += 1;

        let path = self.dir.path().join(format!("chunk_{}", id));
        let chunk_file = fs::File::create(&path)?;
        let mut chunk_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, chunk_file),
            None => io::BufWriter::new(chunk_file),
        };

        let mut len = 0;
        for line in lines.into_iter() {
            chunk_writer.write_all(line.as_bytes())?;
            chunk_writer.write_all(b"\n")?;
            len += 1;
        }
        chunk_writer.flush()?;

        log::debug!("chunk {} saved to {} ({} records)", id, path.display(), len);

        return Ok(SortedChunk {
            id,
            path,
            len,
            rw_buf_size: self.rw_buf_size,
        });
    }

    /// Returns the run-scoped storage directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// A sorted chunk persisted to temporary storage.
pub struct SortedChunk {
    id: usize,
    path: PathBuf,
    len: usize,
    rw_buf_size: Option<usize>,
}

impl SortedChunk {
    /// Returns the chunk sequential id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the number of records the chunk holds.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the chunk file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a cursor over the chunk records.
    pub fn open(&self) -> io::Result<ChunkReader> {
        let chunk_file = fs::File::open(&self.path)?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, chunk_file),
            None => io::BufReader::new(chunk_file),
        };

        return Ok(ChunkReader { lines: reader.lines() });
    }

    /// Deletes the chunk file.
    pub fn remove(self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

/// Cursor over one chunk's persisted records.
pub struct ChunkReader {
    lines: io::Lines<io::BufReader<fs::File>>,
}

impl Iterator for ChunkReader {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next()
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use rstest::*;

    use super::ChunkStore;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[rstest]
    fn test_chunk_roundtrip(tmp_dir: tempfile::TempDir) {
        let saved = vec!["apple".to_string(), "banana".to_string(), "cherry".to_string()];

        let mut store = ChunkStore::new(Some(tmp_dir.path()), None).unwrap();
        let chunk = store.create_chunk(saved.clone()).unwrap();
        assert_eq!(chunk.len(), 3);

        let restored: Vec<String> = chunk.open().unwrap().map(Result::unwrap).collect();
        assert_eq!(restored, saved);
    }

    #[rstest]
    fn test_chunk_files_named_sequentially(tmp_dir: tempfile::TempDir) {
        let mut store = ChunkStore::new(Some(tmp_dir.path()), None).unwrap();

        let first = store.create_chunk(vec!["a".to_string()]).unwrap();
        let second = store.create_chunk(vec!["b".to_string()]).unwrap();

        assert_eq!(first.id(), 0);
        assert_eq!(second.id(), 1);
        assert_eq!(first.path(), store.path().join("chunk_0"));
        assert_eq!(second.path(), store.path().join("chunk_1"));
    }

    #[rstest]
    fn test_chunk_remove(tmp_dir: tempfile::TempDir) {
        let mut store = ChunkStore::new(Some(tmp_dir.path()), None).unwrap();
        let chunk = store.create_chunk(vec!["a".to_string()]).unwrap();

        let path: PathBuf = chunk.path().to_path_buf();
        assert!(path.exists());

        chunk.remove().unwrap();
        assert!(!path.exists());
    }

    #[rstest]
    fn test_store_creates_missing_parent(tmp_dir: tempfile::TempDir) {
        let parent = tmp_dir.path().join("scratch").join("chunks");
        assert!(!parent.exists());

        let store = ChunkStore::new(Some(&parent), None).unwrap();
        assert!(parent.exists());
        assert!(store.path().starts_with(&parent));
    }
}
