//! `linesort` is a memory-bounded external merge sort for line-oriented text files.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass the input is split into chunks that each fit in RAM, sorted in memory and spilled to temporary
//! storage; during the second pass the sorted chunks are merged together through a min-heap holding one pending
//! record per open chunk. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `linesort` supports the following features:
//!
//! * **Explicit memory budget:**
//!   the split phase buffers lines under a byte budget derived from the configured memory limit,
//!   so an arbitrarily large input sorts within a fixed memory footprint.
//! * **Self-cleaning temporary storage:**
//!   chunk files live in a run-scoped subdirectory of the temporary location and are deleted once
//!   the merge has consumed them; nothing persists past a successful run.
//! * **Multithreading support:**
//!   in-memory chunk sorting runs on a thread pool utilizing maximum CPU resources and reducing
//!   sorting time, without changing the output.
//!
//! Lines are compared as whole records, byte-wise lexicographically; the output uses `\n`
//! terminators uniformly.
//!
//! # Example
//!
//! Sorting a file under a 512 MB memory limit:
//!
//! ```no_run
//! fn main() {
//!     linesort::sort("input.txt", "output.txt", 512).unwrap();
//! }
//! ```
//!
//! Streaming usage, for callers that want the sorted lines without a file-to-file pass:
//!
//! ```no_run
//! use std::fs;
//! use std::io::{self, prelude::*};
//!
//! use linesort::{ByteLimitedBufferBuilder, ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!     let mut output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_buffer(ByteLimitedBufferBuilder::new(100 * 1024 * 1024))
//!         .build()
//!         .unwrap();
//!
//!     let sorted = sorter.sort(input_reader.lines()).unwrap();
//!
//!     for line in sorted.map(Result::unwrap) {
//!         output_writer.write_all(format!("{}\n", line).as_bytes()).unwrap();
//!     }
//!     output_writer.flush().unwrap();
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod merger;
pub mod sort;

pub use buffer::{
    ByteLimitedBuffer, ByteLimitedBufferBuilder, CountLimitedBuffer, CountLimitedBufferBuilder, LineBuffer,
    LineBufferBuilder,
};
pub use chunk::{ChunkReader, ChunkStore, SortedChunk};
pub use merger::LineMerger;
pub use sort::{sort, ExternalSorter, ExternalSorterBuilder, FileSorter, SortError, MERGE_OVERHEAD_RESERVE};
