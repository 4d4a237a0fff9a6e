//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use rayon::slice::ParallelSliceMut;

use crate::chunk::{ChunkStore, SortedChunk};
use crate::merger::LineMerger;
use crate::{ByteLimitedBufferBuilder, LineBuffer, LineBufferBuilder};

/// Memory held back from the memory limit to cover read/write buffering and the merge
/// queue, so the chunk budget never claims the whole limit.
pub const MERGE_OVERHEAD_RESERVE: u64 = 50 * 1024 * 1024;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input file does not exist.
    InputNotFound(PathBuf),
    /// Input file exists but contains no data.
    InputEmpty(PathBuf),
    /// Memory limit leaves no chunk budget once the merge overhead reserve is subtracted.
    BudgetTooSmall {
        /// Configured memory limit in bytes.
        memory_limit: u64,
        /// Reserved merge overhead in bytes.
        reserve: u64,
    },
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuild(rayon::ThreadPoolBuildError),
    /// I/O failure while splitting the input into sorted chunks.
    SplitIo(io::Error),
    /// I/O failure while merging sorted chunks.
    MergeIo(io::Error),
}

impl SortError {
    /// Checks if the error is a soft precondition failure: the kind reported with a
    /// short diagnostic and a clean stop, as opposed to a fatal failure mid-run.
    /// Soft errors guarantee the output file has not been written or altered.
    pub fn is_soft(&self) -> bool {
        matches!(self, SortError::InputNotFound(_) | SortError::InputEmpty(_))
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InputNotFound(_) => None,
            SortError::InputEmpty(_) => None,
            SortError::BudgetTooSmall { .. } => None,
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuild(err) => Some(err),
            SortError::SplitIo(err) => Some(err),
            SortError::MergeIo(err) => Some(err),
        }
    }
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InputNotFound(path) => write!(f, "input file {} does not exist", path.display()),
            SortError::InputEmpty(path) => write!(f, "input file {} is empty", path.display()),
            SortError::BudgetTooSmall { memory_limit, reserve } => write!(
                f,
                "memory limit of {} bytes leaves no chunk budget after reserving {} bytes for merge overhead",
                memory_limit, reserve
            ),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuild(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::SplitIo(err) => write!(f, "chunk splitting failed: {}", err),
            SortError::MergeIo(err) => write!(f, "chunk merging failed: {}", err),
        }
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<B = ByteLimitedBufferBuilder>
where
    B: LineBufferBuilder,
{
    /// Number of threads to be used to sort chunks in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Chunk buffer builder.
    buffer_builder: B,
}

impl<B> ExternalSorterBuilder<B>
where
    B: LineBufferBuilder,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<B>, SortError> {
        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.buffer_builder,
            self.rw_buf_size,
        )
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<B> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<B> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets buffer builder.
    pub fn with_buffer(mut self, buffer_builder: B) -> ExternalSorterBuilder<B> {
        self.buffer_builder = buffer_builder;
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<B> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<B> Default for ExternalSorterBuilder<B>
where
    B: LineBufferBuilder,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            buffer_builder: B::default(),
        }
    }
}

/// External sorter. Splits the input into size-limited sorted chunks spilled to
/// temporary storage and returns a [`LineMerger`] over the chunks.
pub struct ExternalSorter<B = ByteLimitedBufferBuilder>
where
    B: LineBufferBuilder,
{
    /// Chunk sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl<B> ExternalSorter<B>
where
    B: LineBufferBuilder,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort chunks in parallel.
    ///   If the parameter is [`None`] threads number will be selected based on available
    ///   CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If parameter is
    ///   [`None`] default OS temporary directory will be used. Each sort run creates its
    ///   own subdirectory inside it.
    /// * `buffer_builder` - An instance of a buffer builder that will be used for chunk
    ///   buffer creation.
    /// * `rw_buf_size` - Chunk file read/write buffer size.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        buffer_builder: B,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        return Ok(ExternalSorter {
            rw_buf_size,
            buffer_builder,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: tmp_path.map(|path| path.into()),
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuild(err))?;

        return Ok(thread_pool);
    }

    /// Sorts lines from the input.
    /// Returns a [`LineMerger`] that can be used to get the sorted line stream.
    ///
    /// The input is accumulated into a buffer; each time the buffer reports full it is
    /// sorted and spilled to temporary storage as a chunk, and whatever remains at end
    /// of input is flushed as a final chunk regardless of size. An input that fits the
    /// buffer therefore produces exactly one chunk.
    ///
    /// # Arguments
    /// * `input` - Input stream lines to be fetched from
    pub fn sort<I>(&self, input: I) -> Result<LineMerger, SortError>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        let mut store =
            ChunkStore::new(self.tmp_dir.as_deref(), self.rw_buf_size).map_err(|err| SortError::TempDir(err))?;

        let mut chunk_buf = self.buffer_builder.build();
        let mut chunks = Vec::new();

        for line in input.into_iter() {
            match line {
                Ok(line) => chunk_buf.push(line),
                Err(err) => return Err(SortError::SplitIo(err)),
            }

            if chunk_buf.is_full() {
                chunks.push(self.create_chunk(&mut store, chunk_buf)?);
                chunk_buf = self.buffer_builder.build();
            }
        }

        if chunk_buf.len() > 0 {
            chunks.push(self.create_chunk(&mut store, chunk_buf)?);
        }

        log::debug!("split phase done, {} chunks created", chunks.len());

        return LineMerger::new(store, chunks).map_err(|err| SortError::MergeIo(err));
    }

    fn create_chunk(&self, store: &mut ChunkStore, mut buffer: B::Buffer) -> Result<SortedChunk, SortError> {
        log::debug!("sorting chunk data ...");
        self.thread_pool.install(|| {
            buffer.par_sort();
        });

        log::debug!("saving chunk data");
        let chunk = store.create_chunk(buffer).map_err(|err| SortError::SplitIo(err))?;

        return Ok(chunk);
    }
}

/// Whole-file sorting front end.
///
/// Validates the input preconditions, sizes the chunk byte budget from the memory
/// limit, and wires the split phase into the merge phase, writing the merged stream to
/// the output file with `\n` terminators. The output file is not created until the
/// preconditions and the budget have been checked.
pub struct FileSorter {
    threads_number: Option<usize>,
    tmp_dir: Option<Box<Path>>,
    rw_buf_size: Option<usize>,
    overhead_reserve: u64,
}

impl FileSorter {
    /// Creates a file sorter with default parameters.
    pub fn new() -> Self {
        FileSorter::default()
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> FileSorter {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> FileSorter {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> FileSorter {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets the amount of the memory limit held back for merge overhead.
    /// Defaults to [`MERGE_OVERHEAD_RESERVE`].
    pub fn with_overhead_reserve(mut self, reserve: u64) -> FileSorter {
        self.overhead_reserve = reserve;
        return self;
    }

    /// Sorts the lines of `input_path` into `output_path` under a memory limit of
    /// `memory_limit_mb` megabytes.
    ///
    /// On success the output file holds every input line, one per line, `\n`
    /// terminated, in ascending lexicographic order; the content is a permutation of
    /// the input lines. CR-LF input is accepted and normalized to `\n`.
    ///
    /// A missing or empty input is reported as a soft error (see [`SortError::is_soft`])
    /// and leaves the output file untouched. A memory limit not exceeding the overhead
    /// reserve is rejected as [`SortError::BudgetTooSmall`]. I/O failures abort the run;
    /// on that path a partially written output may remain.
    pub fn sort(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        memory_limit_mb: u64,
    ) -> Result<(), SortError> {
        let input_path = input_path.as_ref();
        let output_path = output_path.as_ref();

        let metadata = match fs::metadata(input_path) {
            Ok(metadata) => metadata,
            Err(_) => return Err(SortError::InputNotFound(input_path.to_path_buf())),
        };
        if metadata.len() == 0 {
            return Err(SortError::InputEmpty(input_path.to_path_buf()));
        }

        let memory_limit = memory_limit_mb.saturating_mul(1024 * 1024);
        let chunk_budget = self.chunk_budget(metadata.len(), memory_limit)?;
        log::info!(
            "sorting {} ({} bytes) with a {} byte chunk budget",
            input_path.display(),
            metadata.len(),
            chunk_budget
        );

        let mut sorter_builder =
            ExternalSorterBuilder::new().with_buffer(ByteLimitedBufferBuilder::new(chunk_budget));
        if let Some(threads_number) = self.threads_number {
            sorter_builder = sorter_builder.with_threads_number(threads_number);
        }
        if let Some(tmp_dir) = self.tmp_dir.as_deref() {
            sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
        }
        if let Some(rw_buf_size) = self.rw_buf_size {
            sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size);
        }
        let sorter = sorter_builder.build()?;

        let input_file = fs::File::open(input_path).map_err(|err| SortError::SplitIo(err))?;
        let merger = sorter.sort(io::BufReader::new(input_file).lines())?;

        let output_file = fs::File::create(output_path).map_err(|err| SortError::MergeIo(err))?;
        let mut output_writer = io::BufWriter::new(output_file);
        for line in merger {
            let line = line.map_err(|err| SortError::MergeIo(err))?;
            output_writer.write_all(line.as_bytes()).map_err(|err| SortError::MergeIo(err))?;
            output_writer.write_all(b"\n").map_err(|err| SortError::MergeIo(err))?;
        }
        output_writer.flush().map_err(|err| SortError::MergeIo(err))?;

        log::info!("sorted output written to {}", output_path.display());

        return Ok(());
    }

    /// Computes the per-chunk byte budget: the memory limit minus the merge overhead
    /// reserve, capped at the input size so small inputs sort in a single chunk.
    fn chunk_budget(&self, input_size: u64, memory_limit: u64) -> Result<u64, SortError> {
        let available = memory_limit.saturating_sub(self.overhead_reserve);
        if available == 0 {
            return Err(SortError::BudgetTooSmall {
                memory_limit,
                reserve: self.overhead_reserve,
            });
        }

        return Ok(available.min(input_size));
    }
}

impl Default for FileSorter {
    fn default() -> Self {
        FileSorter {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            overhead_reserve: MERGE_OVERHEAD_RESERVE,
        }
    }
}

/// Sorts the lines of `input_path` into `output_path` under a memory limit of
/// `memory_limit_mb` megabytes, using default [`FileSorter`] settings.
pub fn sort(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    memory_limit_mb: u64,
) -> Result<(), SortError> {
    FileSorter::new().sort(input_path, output_path, memory_limit_mb)
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{FileSorter, SortError};
    use crate::{ByteLimitedBufferBuilder, CountLimitedBufferBuilder, ExternalSorter, ExternalSorterBuilder};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn as_input(lines: Vec<String>) -> Vec<io::Result<String>> {
        Vec::from_iter(lines.into_iter().map(|line| Ok(line)))
    }

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(path, content).unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| line.to_string())
            .collect()
    }

    #[rstest]
    fn test_external_sorter(tmp_dir: tempfile::TempDir) {
        let input_sorted: Vec<String> = (0..100).map(|number| format!("{:03}", number)).collect();

        let mut input_shuffled = input_sorted.clone();
        input_shuffled.shuffle(&mut rand::thread_rng());

        let sorter: ExternalSorter<CountLimitedBufferBuilder> = ExternalSorterBuilder::new()
            .with_buffer(CountLimitedBufferBuilder::new(8, true))
            .with_threads_number(2)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let merger = sorter.sort(as_input(input_shuffled)).unwrap();
        assert_eq!(merger.chunk_count(), 13);

        let actual_result: io::Result<Vec<String>> = merger.collect();
        assert_eq!(actual_result.unwrap(), input_sorted);
    }

    #[rstest]
    fn test_sorter_single_chunk_when_input_fits_budget(tmp_dir: tempfile::TempDir) {
        let input = vec!["banana", "apple", "cherry", "apple"];

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_buffer(ByteLimitedBufferBuilder::new(1024))
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let merger = sorter
            .sort(as_input(input.into_iter().map(|line| line.to_string()).collect()))
            .unwrap();
        assert_eq!(merger.chunk_count(), 1);

        let actual_result: io::Result<Vec<String>> = merger.collect();
        assert_eq!(actual_result.unwrap(), vec!["apple", "apple", "banana", "cherry"]);
    }

    #[rstest]
    fn test_sorter_order_is_independent_of_chunk_boundaries(tmp_dir: tempfile::TempDir) {
        let input = vec!["banana", "apple", "cherry", "apple"];

        // a 10 byte budget splits the four lines into two chunks of two lines each
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_buffer(ByteLimitedBufferBuilder::new(10))
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let merger = sorter
            .sort(as_input(input.into_iter().map(|line| line.to_string()).collect()))
            .unwrap();
        assert_eq!(merger.chunk_count(), 2);

        let actual_result: io::Result<Vec<String>> = merger.collect();
        assert_eq!(actual_result.unwrap(), vec!["apple", "apple", "banana", "cherry"]);
    }

    #[rstest]
    fn test_sort_file_missing_input(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("absent.txt");
        let output_path = tmp_dir.path().join("output.txt");

        let result = FileSorter::new().sort(&input_path, &output_path, 512);

        match result {
            Err(SortError::InputNotFound(path)) => assert_eq!(path, input_path),
            other => panic!("unexpected result: {:?}", other.map_err(|err| err.to_string())),
        }
        assert!(!output_path.exists());
    }

    #[rstest]
    fn test_sort_file_empty_input(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("empty.txt");
        let output_path = tmp_dir.path().join("output.txt");
        fs::write(&input_path, "").unwrap();

        let result = FileSorter::new().sort(&input_path, &output_path, 512);

        match result {
            Err(err @ SortError::InputEmpty(_)) => assert!(err.is_soft()),
            other => panic!("unexpected result: {:?}", other.map_err(|err| err.to_string())),
        }
        assert!(!output_path.exists());
    }

    #[rstest]
    fn test_sort_file_budget_too_small(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.txt");
        let output_path = tmp_dir.path().join("output.txt");
        write_lines(&input_path, &["a"]);

        // 10 MB limit is consumed entirely by the 50 MiB merge overhead reserve
        let result = FileSorter::new().sort(&input_path, &output_path, 10);

        assert!(matches!(result, Err(SortError::BudgetTooSmall { .. })));
        assert!(!output_path.exists());
    }

    #[rstest]
    fn test_sort_file_single_line(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.txt");
        let output_path = tmp_dir.path().join("output.txt");
        write_lines(&input_path, &["solitary"]);

        FileSorter::new()
            .with_tmp_dir(tmp_dir.path())
            .sort(&input_path, &output_path, 512)
            .unwrap();

        assert_eq!(fs::read_to_string(&output_path).unwrap(), "solitary\n");
    }

    #[rstest]
    fn test_sort_file_sorted_input_reproduced(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.txt");
        let output_path = tmp_dir.path().join("output.txt");
        write_lines(&input_path, &["alpha", "beta", "gamma"]);

        FileSorter::new()
            .with_tmp_dir(tmp_dir.path())
            .sort(&input_path, &output_path, 512)
            .unwrap();

        assert_eq!(
            fs::read_to_string(&input_path).unwrap(),
            fs::read_to_string(&output_path).unwrap()
        );
    }

    #[rstest]
    fn test_sort_file_multi_chunk(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.txt");
        let output_path = tmp_dir.path().join("output.txt");
        let chunk_dir = tmp_dir.path().join("chunks");

        let mut input_lines: Vec<String> = (0..500).map(|number| format!("line-{:05}", number)).collect();
        let expected = {
            let mut sorted = input_lines.clone();
            sorted.sort();
            sorted
        };
        input_lines.shuffle(&mut rand::thread_rng());
        write_lines(&input_path, &Vec::from_iter(input_lines.iter().map(|line| line.as_str())));

        // shrink the budget to the point where the input cannot fit in one chunk
        let reserve = 1024 * 1024 - 200;
        FileSorter::new()
            .with_tmp_dir(&chunk_dir)
            .with_overhead_reserve(reserve)
            .sort(&input_path, &output_path, 1)
            .unwrap();

        let output_lines = read_lines(&output_path);
        assert_eq!(output_lines.len(), 500);
        assert_eq!(output_lines, expected);

        // all run-scoped storage is gone once the sort has completed
        assert_eq!(fs::read_dir(&chunk_dir).unwrap().count(), 0);
    }

    #[rstest]
    fn test_sort_convenience_entry(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.txt");
        let output_path = tmp_dir.path().join("output.txt");
        write_lines(&input_path, &["banana", "apple", "cherry", "apple"]);

        super::sort(&input_path, &output_path, 512).unwrap();

        assert_eq!(read_lines(&output_path), vec!["apple", "apple", "banana", "cherry"]);
    }
}
