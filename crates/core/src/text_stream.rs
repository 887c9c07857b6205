//! Random line access to large text files.
//!
//! An [`IndexedTextStream`] never loads the whole file. Right after it is opened
//! a background thread scans the file in fixed-size chunks and records where
//! lines start (see [`crate::index`]). Once that index is installed any line can
//! be reached by looking up the nearest indexed line and scanning forward at
//! most one chunk.
//!
//! The newline convention is taken from the first terminator byte of the file
//! and applied literally from there on: with `\n` files every `\n` ends a line,
//! with `\r` or `\r\n` files every `\r` ends a line. The other terminator byte
//! is never part of a line's text.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::Instant;

use log::{debug, error, info};

use crate::config::StreamSettings;
use crate::error::{Error, Result};
use crate::index::{LineIndex, NodeChain};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Read size used when iterating lines.
const SEQUENCE_READ_SIZE: usize = 64 * 1024;

/// Newline convention detected while indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    Cr,
    CrLf,
}

impl LineEnding {
    fn terminator(self) -> u8 {
        match self {
            LineEnding::Lf => LF,
            LineEnding::Cr | LineEnding::CrLf => CR,
        }
    }
}

impl Display for LineEnding {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LineEnding::Lf => formatter.write_str("LF"),
            LineEnding::Cr => formatter.write_str("CR"),
            LineEnding::CrLf => formatter.write_str("CRLF"),
        }
    }
}

/// Lifecycle of the line index of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// The background scan is running.
    Building,
    /// The index is installed and lines can be read.
    Built,
    /// Opening or scanning the file failed; this is permanent.
    Failed,
    /// The stream was closed.
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
enum ByteKind {
    Content,
    Terminator,
    Ignored,
}

/// Splits bytes into line content and line terminators.
#[derive(Debug, Clone, Copy)]
struct LineSplitter {
    terminator: Option<u8>,
}

impl LineSplitter {
    fn new(terminator: Option<u8>) -> Self {
        Self { terminator }
    }

    fn classify(&mut self, byte: u8) -> ByteKind {
        match byte {
            CR | LF => {
                let terminator = *self.terminator.get_or_insert(byte);
                if byte == terminator {
                    ByteKind::Terminator
                } else {
                    ByteKind::Ignored
                }
            }
            _ => ByteKind::Content,
        }
    }
}

#[derive(Debug)]
struct Cursor {
    file: Option<File>,
    buffer: Vec<u8>,
}

#[derive(Debug)]
struct BuiltIndex {
    index: LineIndex,
    line_ending: Option<LineEnding>,
}

/// A text file with a line index built in the background.
#[derive(Debug)]
pub struct IndexedTextStream {
    path: String,
    size: u64,
    chunk_size: usize,
    total_chunks: u64,
    chunks_done: AtomicU64,
    cursor: Mutex<Cursor>,
    built: OnceLock<BuiltIndex>,
    failure: OnceLock<Error>,
    closed: AtomicBool,
}

impl IndexedTextStream {
    /// Opens a file and starts building its line index in the background.
    ///
    /// This never blocks on the scan. A file that cannot be opened still gives a
    /// stream, whose [`IndexState`] is [`IndexState::Failed`] with the reason in
    /// [`IndexedTextStream::failure`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gcode_stream_core::config::StreamSettings;
    /// use gcode_stream_core::text_stream::IndexedTextStream;
    ///
    /// let stream = IndexedTextStream::open("part.gcode", &StreamSettings::default());
    /// while !stream.index_built() {
    ///     std::thread::sleep(std::time::Duration::from_millis(10));
    /// }
    /// for line in stream.sequence(10)?.take(3) {
    ///     println!("{}", line?);
    /// }
    /// # Ok::<(), gcode_stream_core::error::Error>(())
    /// ```
    pub fn open(path: &str, settings: &StreamSettings) -> Arc<Self> {
        let stream = Arc::new(Self::new(path, settings));
        if stream.index_state() == IndexState::Failed {
            return stream;
        }

        let builder = Arc::clone(&stream);
        let spawned = thread::Builder::new()
            .name("gcode-index".to_string())
            .spawn(move || builder.build_index());
        if let Err(e) = spawned {
            error!("Could not start indexing `{}`: {}", path, e);
            stream.fail(Error::Thread(e));
        }

        stream
    }

    /// Opens the file without starting the index build.
    pub(crate) fn new(path: &str, settings: &StreamSettings) -> Self {
        let chunk_size = settings.chunk_size.max(1);
        let opened = File::open(path).and_then(|file| {
            let size = file.metadata()?.len();
            Ok((file, size))
        });

        let (file, size, failure) = match opened {
            Ok((file, size)) => {
                info!(
                    "Opened `{}`, {} bytes in {} chunks",
                    path,
                    size,
                    size.div_ceil(chunk_size as u64)
                );
                (Some(file), size, None)
            }
            Err(e) => {
                error!("Could not open `{}`: {}", path, e);
                (
                    None,
                    0,
                    Some(Error::io_error("G-code".to_string(), path.to_string(), e)),
                )
            }
        };

        let stream = Self {
            path: path.to_string(),
            size,
            chunk_size,
            total_chunks: size.div_ceil(chunk_size as u64),
            chunks_done: AtomicU64::new(0),
            cursor: Mutex::new(Cursor {
                file,
                buffer: vec![0; SEQUENCE_READ_SIZE],
            }),
            built: OnceLock::new(),
            failure: OnceLock::new(),
            closed: AtomicBool::new(false),
        };
        if let Some(failure) = failure {
            stream.fail(failure);
        }
        stream
    }

    fn lock_cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, failure: Error) {
        // Only the first failure is kept and reported.
        let _ = self.failure.set(failure);
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn index_state(&self) -> IndexState {
        if self.closed.load(Ordering::Acquire) {
            IndexState::Closed
        } else if self.built.get().is_some() {
            IndexState::Built
        } else if self.failure.get().is_some() {
            IndexState::Failed
        } else {
            IndexState::Building
        }
    }

    pub fn index_built(&self) -> bool {
        self.index_state() == IndexState::Built
    }

    /// Why opening or indexing failed, if it did.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.get()
    }

    /// Number of lines, known once the index is built and 0 before.
    pub fn total_lines(&self) -> u64 {
        self.built.get().map_or(0, |built| built.index.total_lines())
    }

    /// Fraction of chunks scanned so far, in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    pub fn index_build_progress(&self) -> f32 {
        if self.built.get().is_some() {
            return 1.0;
        }
        if self.total_chunks == 0 {
            return 0.0;
        }
        let done = self.chunks_done.load(Ordering::Relaxed);
        (done as f32 / self.total_chunks as f32).min(1.0)
    }

    /// Newline convention of the file, `None` if it has no terminator at all.
    pub fn line_ending(&self) -> Option<LineEnding> {
        self.built.get().and_then(|built| built.line_ending)
    }

    /// The installed index, for inspection.
    pub fn line_index(&self) -> Option<&LineIndex> {
        self.built.get().map(|built| &built.index)
    }

    /// Current byte position of the shared file cursor.
    ///
    /// Waits for the cursor lock, so it must not be called by a thread that holds
    /// a live [`LineSequence`] of this stream.
    pub fn position(&self) -> u64 {
        let mut cursor = self.lock_cursor();
        cursor
            .file
            .as_mut()
            .and_then(|file| file.stream_position().ok())
            .unwrap_or(0)
    }

    /// Stops indexing, releases the file, and rejects further reads.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing `{}`", self.path);
        self.lock_cursor().file = None;
    }

    fn build_index(&self) {
        info!("Building line index of `{}`", self.path);
        let started = Instant::now();

        let mut splitter = LineSplitter::new(None);
        let mut chain = NodeChain::new();
        let mut chunk = vec![0; self.chunk_size];
        let mut offset = 0u64;
        let mut line = 0u64;
        let mut line_has_content = false;
        let mut last_line_start = (0u64, 0u64);
        let mut line_ending = None;
        let mut first_terminator_at = None;

        loop {
            if self.closed.load(Ordering::Acquire) {
                info!("Indexing of `{}` stopped, stream closed", self.path);
                return;
            }

            let read = {
                let mut cursor = self.lock_cursor();
                let Some(file) = cursor.file.as_mut() else {
                    return;
                };
                read_chunk(file, offset, &mut chunk)
            };
            let read = match read {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    error!("Indexing of `{}` failed at byte {}: {}", self.path, offset, e);
                    self.fail(Error::IndexBuild {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    });
                    return;
                }
            };

            for (at, &byte) in (offset..).zip(&chunk[..read]) {
                if line_ending == Some(LineEnding::Cr)
                    && byte == LF
                    && first_terminator_at.is_some_and(|first| first + 1 == at)
                {
                    line_ending = Some(LineEnding::CrLf);
                }
                match splitter.classify(byte) {
                    ByteKind::Terminator => {
                        if first_terminator_at.is_none() {
                            first_terminator_at = Some(at);
                            line_ending = Some(if byte == LF {
                                LineEnding::Lf
                            } else {
                                LineEnding::Cr
                            });
                        }
                        line += 1;
                        line_has_content = false;
                        last_line_start = (line, at + 1);
                    }
                    ByteKind::Content => line_has_content = true,
                    ByteKind::Ignored => {}
                }
            }

            offset += read as u64;
            self.chunks_done.fetch_add(1, Ordering::Relaxed);
            chain.push(last_line_start.0, last_line_start.1);
        }

        let total_lines = line + u64::from(line_has_content);
        let node_count = chain.len();
        let index = LineIndex::from_chain(chain, total_lines);
        let depth = index.depth();
        let _ = self.built.set(BuiltIndex { index, line_ending });

        info!(
            "Indexed `{}`: {} lines, {} chunks, {} nodes (depth {}), line ending {}, in {} ms",
            self.path,
            total_lines,
            self.chunks_done.load(Ordering::Relaxed),
            node_count,
            depth,
            line_ending.map_or_else(|| "none".to_string(), |ending| ending.to_string()),
            started.elapsed().as_millis()
        );
    }

    fn built_index(&self) -> Result<&BuiltIndex> {
        match self.index_state() {
            IndexState::Closed => Err(Error::StreamClosed(self.path.clone())),
            IndexState::Failed => Err(Error::IndexBuild {
                path: self.path.clone(),
                reason: self
                    .failure
                    .get()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
            }),
            IndexState::Building => Err(Error::IndexNotBuilt(self.path.clone())),
            IndexState::Built => self
                .built
                .get()
                .ok_or_else(|| Error::IndexNotBuilt(self.path.clone())),
        }
    }

    /// Iterates lines starting at `start_line`.
    ///
    /// `start_line` may equal the line count, which gives an empty sequence.
    /// The sequence holds the stream's cursor lock until it is dropped; every
    /// call returns a fresh cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The index has not been built yet, the build failed, or the stream is closed
    /// - `start_line` is negative or greater than the number of lines
    /// - Reading the file while seeking to the line fails
    pub fn sequence(&self, start_line: i64) -> Result<LineSequence<'_>> {
        let built = self.built_index()?;
        let total_lines = built.index.total_lines();
        let start = Self::start_in_range(start_line, total_lines)?;

        let cursor = self.lock_cursor();
        if cursor.file.is_none() {
            return Err(Error::StreamClosed(self.path.clone()));
        }

        let node = built.index.floor(start);
        let mut sequence = LineSequence {
            path: &self.path,
            cursor,
            splitter: LineSplitter::new(built.line_ending.map(LineEnding::terminator)),
            offset: node.offset,
            consumed: 0,
            filled: 0,
            line: node.line,
            total_lines,
            done: false,
        };
        sequence.skip_to(start)?;
        Ok(sequence)
    }

    /// Checks that a sequence could start at `start_line`, without reading.
    ///
    /// Returns the start as an unsigned line index.
    ///
    /// # Errors
    ///
    /// Same as [`IndexedTextStream::sequence`], except for read errors.
    pub fn check_start(&self, start_line: i64) -> Result<u64> {
        let built = self.built_index()?;
        Self::start_in_range(start_line, built.index.total_lines())
    }

    fn start_in_range(start_line: i64, total_lines: u64) -> Result<u64> {
        u64::try_from(start_line)
            .ok()
            .filter(|start| *start <= total_lines)
            .ok_or(Error::LineOutOfRange {
                line: start_line,
                total_lines,
            })
    }

    /// Iterates all lines from the first one.
    ///
    /// # Errors
    ///
    /// Same as [`IndexedTextStream::sequence`].
    pub fn lines(&self) -> Result<LineSequence<'_>> {
        self.sequence(0)
    }
}

fn read_chunk(file: &mut File, offset: u64, chunk: &mut [u8]) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < chunk.len() {
        let read = file.read(&mut chunk[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// Lazy sequence of raw lines, holding the stream's cursor lock.
#[derive(Debug)]
pub struct LineSequence<'a> {
    path: &'a str,
    cursor: MutexGuard<'a, Cursor>,
    splitter: LineSplitter,
    /// File offset of the next unread byte.
    offset: u64,
    consumed: usize,
    filled: usize,
    /// Index of the line the next call to `next` returns.
    line: u64,
    total_lines: u64,
    done: bool,
}

impl LineSequence<'_> {
    /// Index of the line the next call to `next` returns.
    pub fn next_line_index(&self) -> u64 {
        self.line
    }

    fn next_byte(&mut self) -> std::io::Result<Option<u8>> {
        let cursor = &mut *self.cursor;
        if self.consumed == self.filled {
            let Some(file) = cursor.file.as_mut() else {
                return Ok(None);
            };
            file.seek(SeekFrom::Start(self.offset))?;
            let read = file.read(&mut cursor.buffer)?;
            if read == 0 {
                return Ok(None);
            }
            self.filled = read;
            self.consumed = 0;
        }

        let byte = cursor.buffer[self.consumed];
        self.consumed += 1;
        self.offset += 1;
        Ok(Some(byte))
    }

    fn read_error(&self, e: std::io::Error) -> Error {
        Error::io_error("G-code".to_string(), self.path.to_string(), e)
    }

    fn skip_to(&mut self, target: u64) -> Result<()> {
        while self.line < target {
            match self.next_byte().map_err(|e| self.read_error(e))? {
                None => break,
                Some(byte) => {
                    if self.splitter.classify(byte) == ByteKind::Terminator {
                        self.line += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Iterator for LineSequence<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.line >= self.total_lines {
            return None;
        }

        let mut text = Vec::new();
        let mut has_content = false;
        loop {
            match self.next_byte() {
                Err(e) => {
                    self.done = true;
                    return Some(Err(self.read_error(e)));
                }
                Ok(None) => {
                    self.done = true;
                    if !has_content {
                        return None;
                    }
                    break;
                }
                Ok(Some(byte)) => match self.splitter.classify(byte) {
                    ByteKind::Terminator => break,
                    ByteKind::Content => {
                        has_content = true;
                        text.push(byte);
                    }
                    ByteKind::Ignored => {}
                },
            }
        }

        self.line += 1;
        Some(Ok(String::from_utf8(text)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())))
    }
}
