//! K-way chunk merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;

use log;

use crate::chunk::{ChunkReader, ChunkStore, SortedChunk};

/// Merges the sorted chunks of one run into a single ascending record stream.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of chunks.
///
/// Open readers live in an index-addressed active set and the heap holds at most one
/// pending record per open reader, tagged with the reader's slot, so popping the heap
/// always yields the current minimum across all not-yet-exhausted chunks. A reader is
/// dropped from its slot the moment it runs dry, releasing its file handle; one handle
/// is held per still-unexhausted chunk, so handle usage grows with the chunk count.
///
/// Once the stream is fully consumed the merger deletes every chunk file. The
/// run-scoped storage directory itself is removed when the merger is dropped, which
/// also covers chunk files left behind by an abandoned iteration.
pub struct LineMerger {
    chunks: Vec<SortedChunk>,
    readers: Vec<Option<ChunkReader>>,
    // binary heap is max-heap by default so records are reversed to convert it to a min-heap
    items: BinaryHeap<(Reverse<String>, usize)>,
    initiated: bool,
    finished: bool,
    // declared last so open readers are closed before the storage directory is removed
    store: ChunkStore,
}

impl LineMerger {
    /// Creates a merger over `chunks`, opening one reader per chunk.
    /// Chunk records must be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `store` - The store the chunks were created in. The merger takes ownership so
    ///   the storage directory outlives the merge.
    /// * `chunks` - Chunks to be merged into a single sorted stream.
    pub fn new(store: ChunkStore, chunks: Vec<SortedChunk>) -> io::Result<Self> {
        let mut readers = Vec::with_capacity(chunks.len());
        for chunk in chunks.iter() {
            readers.push(Some(chunk.open()?));
        }

        let items = BinaryHeap::with_capacity(readers.len());

        return Ok(LineMerger {
            chunks,
            readers,
            items,
            initiated: false,
            finished: false,
            store,
        });
    }

    /// Returns the number of chunks being merged.
    pub fn chunk_count(&self) -> usize {
        self.readers.len()
    }

    /// Pulls the next record from the reader in `slot`.
    /// An exhausted reader is removed from its slot, releasing the file handle;
    /// an empty or already removed slot yields nothing.
    fn pull(&mut self, slot: usize) -> io::Result<Option<String>> {
        let reader = match self.readers[slot].as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        match reader.next() {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(err)) => Err(err),
            None => {
                self.readers[slot] = None;
                Ok(None)
            }
        }
    }

    /// Drops any straggler readers and deletes every chunk file.
    fn cleanup(&mut self) -> io::Result<()> {
        for reader in self.readers.iter_mut() {
            reader.take();
        }

        log::debug!(
            "merge finished, removing {} chunk files from {}",
            self.chunks.len(),
            self.store.path().display()
        );
        for chunk in self.chunks.drain(..) {
            chunk.remove()?;
        }

        return Ok(());
    }
}

impl Iterator for LineMerger {
    type Item = io::Result<String>;

    /// Returns the next record from the chunks in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.initiated {
            for slot in 0..self.readers.len() {
                match self.pull(slot) {
                    Ok(Some(line)) => self.items.push((Reverse(line), slot)),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err)),
                }
            }
            self.initiated = true;
        }

        let (Reverse(record), slot) = match self.items.pop() {
            Some(entry) => entry,
            None => {
                self.finished = true;
                return match self.cleanup() {
                    Ok(()) => None,
                    Err(err) => Some(Err(err)),
                };
            }
        };

        // refill from the reader that produced the emitted record
        match self.pull(slot) {
            Ok(Some(line)) => self.items.push((Reverse(line), slot)),
            Ok(None) => {}
            Err(err) => return Some(Err(err)),
        }

        return Some(Ok(record));
    }
}
