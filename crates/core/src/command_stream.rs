//! Parsed commands on top of an [`IndexedTextStream`].
//!
//! A [`CommandStream`] parses lines lazily and keeps the most recently parsed
//! commands in a bounded [`ParseCache`], so that re-reading a region of the
//! file (the read-ahead buffer catching up, or a caller looking at recently
//! executed lines) does not touch the file again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::cache::ParseCache;
use crate::command::Command;
use crate::config::StreamSettings;
use crate::error::Result;
use crate::parser::parse_line;
use crate::text_stream::{IndexState, IndexedTextStream, LineSequence};

#[derive(Debug)]
pub struct CommandStream {
    text: Arc<IndexedTextStream>,
    cache: Mutex<ParseCache>,
}

impl CommandStream {
    /// Opens a G-code file; its index is built in the background.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gcode_stream_core::command_stream::CommandStream;
    /// use gcode_stream_core::config::StreamSettings;
    ///
    /// let stream = CommandStream::open("part.gcode", &StreamSettings::default());
    /// while !stream.index_built() {
    ///     std::thread::sleep(std::time::Duration::from_millis(10));
    /// }
    /// if let Some(command) = stream.get_command(0)? {
    ///     println!("{:?} {}", command.kind, command);
    /// }
    /// # Ok::<(), gcode_stream_core::error::Error>(())
    /// ```
    pub fn open(path: &str, settings: &StreamSettings) -> Arc<Self> {
        Arc::new(Self::from_text_stream(
            IndexedTextStream::open(path, settings),
            settings.cache_capacity,
        ))
    }

    pub fn from_text_stream(text: Arc<IndexedTextStream>, cache_capacity: usize) -> Self {
        Self {
            text,
            cache: Mutex::new(ParseCache::new(cache_capacity)),
        }
    }

    pub fn text_stream(&self) -> &Arc<IndexedTextStream> {
        &self.text
    }

    pub fn path(&self) -> &str {
        self.text.path()
    }

    pub fn index_state(&self) -> IndexState {
        self.text.index_state()
    }

    pub fn index_built(&self) -> bool {
        self.text.index_built()
    }

    pub fn total_lines(&self) -> u64 {
        self.text.total_lines()
    }

    fn lock_cache(&self) -> MutexGuard<'_, ParseCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache-only lookup; never reads the file.
    pub fn try_get_cached(&self, line_index: u64) -> Option<Arc<Command>> {
        self.lock_cache().get(line_index)
    }

    pub fn cache_capacity(&self) -> usize {
        self.lock_cache().capacity()
    }

    /// Changes the cache capacity; shrinking evicts right away.
    pub fn set_cache_capacity(&self, capacity: usize) {
        self.lock_cache().set_capacity(capacity);
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn parse_and_cache(&self, raw: &str, line_index: u64) -> Arc<Command> {
        let command = Arc::new(parse_line(raw, line_index));
        self.lock_cache().insert(command)
    }

    /// Returns the command on one line, `None` at the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is not built, the line is past the end of
    /// the stream, or reading the file fails.
    pub fn get_command(&self, line_index: u64) -> Result<Option<Arc<Command>>> {
        if let Some(command) = self.try_get_cached(line_index) {
            return Ok(Some(command));
        }

        let start = i64::try_from(line_index).unwrap_or(i64::MAX);
        let mut lines = self.text.sequence(start)?;
        match lines.next() {
            None => Ok(None),
            Some(raw) => Ok(Some(self.parse_and_cache(&raw?, line_index))),
        }
    }

    /// Iterates commands starting at `start_line`.
    ///
    /// Cached commands are served without touching the file until the first
    /// uncached line; from there on lines are read in one pass and parsed
    /// unless already cached. While reading, the sequence holds the text
    /// stream's cursor lock, so other reads of the same stream wait for it.
    ///
    /// # Errors
    ///
    /// Same as [`IndexedTextStream::sequence`].
    pub fn sequence(&self, start_line: i64) -> Result<CommandSequence<'_>> {
        let next_line = self.text.check_start(start_line)?;

        Ok(CommandSequence {
            stream: self,
            lines: None,
            next_line,
            total_lines: self.text.total_lines(),
        })
    }

    pub fn close(&self) {
        debug!("Closing command stream of `{}`", self.path());
        self.text.close();
        self.lock_cache().clear();
    }
}

#[derive(Debug)]
pub struct CommandSequence<'a> {
    stream: &'a CommandStream,
    lines: Option<LineSequence<'a>>,
    next_line: u64,
    total_lines: u64,
}

impl CommandSequence<'_> {
    fn finish(&mut self) {
        self.next_line = self.total_lines;
        self.lines = None;
    }
}

impl Iterator for CommandSequence<'_> {
    type Item = Result<Arc<Command>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_line >= self.total_lines {
            return None;
        }
        let line_index = self.next_line;

        if self.lines.is_none() {
            if let Some(command) = self.stream.try_get_cached(line_index) {
                self.next_line += 1;
                return Some(Ok(command));
            }

            let start = i64::try_from(line_index).unwrap_or(i64::MAX);
            match self.stream.text.sequence(start) {
                Ok(lines) => self.lines = Some(lines),
                Err(e) => {
                    self.finish();
                    return Some(Err(e));
                }
            }
        }

        let raw = match self.lines.as_mut()?.next() {
            None => {
                self.finish();
                return None;
            }
            Some(Err(e)) => {
                self.finish();
                return Some(Err(e));
            }
            Some(Ok(raw)) => raw,
        };

        self.next_line += 1;
        let command = match self.stream.try_get_cached(line_index) {
            Some(cached) => cached,
            None => self.stream.parse_and_cache(&raw, line_index),
        };
        Some(Ok(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::error::Error;
    use crate::text_stream::tests::{wait_built, write_temp};
    use tempfile::NamedTempFile;

    fn open_built(content: &str, cache_capacity: usize) -> (NamedTempFile, Arc<CommandStream>) {
        let temp_file = write_temp(content.as_bytes());
        let settings = StreamSettings {
            chunk_size: 16,
            cache_capacity,
        };
        let stream = CommandStream::open(temp_file.path().to_str().unwrap(), &settings);
        wait_built(stream.text_stream());
        (temp_file, stream)
    }

    fn program(lines: u64) -> String {
        (0..lines).map(|i| format!("G1 X{i} ; move {i}\n")).collect()
    }

    #[test]
    fn test_get_command_parses_and_caches() {
        let (_file, stream) = open_built(&program(10), 5);
        assert!(stream.try_get_cached(3).is_none());

        let command = stream.get_command(3).unwrap().unwrap();
        assert_eq!(command.kind, CommandKind::G);
        assert_eq!(command.line_index, 3);
        assert_eq!(command.comment.as_deref(), Some("move 3"));

        let cached = stream.try_get_cached(3).unwrap();
        assert!(Arc::ptr_eq(&command, &cached));
    }

    #[test]
    fn test_get_command_end_and_range() {
        let (_file, stream) = open_built(&program(4), 5);
        assert!(stream.get_command(4).unwrap().is_none());
        assert!(matches!(
            stream.get_command(5),
            Err(Error::LineOutOfRange { .. })
        ));
    }

    #[test]
    fn test_sequence_mixes_cached_and_parsed() {
        let (_file, stream) = open_built(&program(20), 50);
        let cached_five = stream.get_command(5).unwrap().unwrap();
        cached_five.set_execute_time_ms(77);

        let commands: Vec<Arc<Command>> = stream
            .sequence(5)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(commands.len(), 15);
        assert!(Arc::ptr_eq(&commands[0], &cached_five));
        assert_eq!(commands[0].execute_time_ms(), 77);
        for (offset, command) in commands.iter().enumerate() {
            assert_eq!(command.line_index, 5 + offset as u64);
            assert_eq!(command.raw, format!("G1 X{0} ; move {0}", 5 + offset));
        }
    }

    #[test]
    fn test_cached_line_is_not_reparsed_mid_sequence() {
        let (_file, stream) = open_built(&program(10), 50);
        let seven = stream.get_command(7).unwrap().unwrap();

        let from_two: Vec<Arc<Command>> = stream
            .sequence(2)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!(Arc::ptr_eq(&from_two[5], &seven));
    }

    #[test]
    fn test_sequence_respects_cache_capacity() {
        let (_file, stream) = open_built(&program(30), 8);
        assert_eq!(stream.sequence(0).unwrap().count(), 30);
        assert_eq!(stream.cached_len(), 8);
        assert!(stream.try_get_cached(29).is_some());
        assert!(stream.try_get_cached(21).is_none());

        stream.set_cache_capacity(2);
        assert_eq!(stream.cache_capacity(), 2);
        assert_eq!(stream.cached_len(), 2);
    }

    #[test]
    fn test_sequence_errors_out_of_range_and_after_close() {
        let (_file, stream) = open_built(&program(3), 8);
        assert!(matches!(
            stream.sequence(-2),
            Err(Error::LineOutOfRange { .. })
        ));

        stream.close();
        assert!(matches!(stream.sequence(0), Err(Error::StreamClosed(_))));
        assert!(stream.try_get_cached(0).is_none());
    }
}
