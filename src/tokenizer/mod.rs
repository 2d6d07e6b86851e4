//! # Tokenizer Module
//!
//! Incremental line and value tokenization over a text stream that arrives in
//! chunks of arbitrary size.
//!
//! Text after the last `'\n'` is kept in a pending buffer until a later chunk
//! completes the line. Each completed line is reported as a
//! [`TokenEvent::Line`], optionally followed by a [`TokenEvent::Values`] with
//! the line split on the configured separator, and optionally remembered in a
//! bounded [`LineHistory`] that consumers drain between ingests.
//!
//! Carriage returns are not stripped: a `"\r\n"` stream yields lines ending
//! in `'\r'`.
//!
//! ```
//! use serial_lines::tokenizer::{StreamLineTokenizer, TokenizerSettings};
//!
//! let tokenizer = StreamLineTokenizer::new(TokenizerSettings::new().max_remembered(2)).unwrap();
//! tokenizer.ingest("ab");
//! let result = tokenizer.ingest("cd\nef\ngh\n");
//! assert_eq!(result.lines().collect::<Vec<_>>(), vec!["abcd", "ef", "gh"]);
//! assert_eq!(result.evicted, 1);
//! assert_eq!(tokenizer.drain_all(false), vec!["ef", "gh"]);
//! ```

mod history;

pub use history::LineHistory;

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::error::{Result, SerialLinesError};

/// line terminator
pub const LINE_TERMINATOR: char = '\n';

/// default value separator
pub const DEFAULT_VALUE_SEPARATOR: char = '\t';

/// tokenizer settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenizerSettings {
    /// Maximum number of remembered lines, `0` disables retention.
    pub max_remembered: usize,
    /// Emit a [`TokenEvent::Values`] after every line.
    pub split_values: bool,
    /// Separator used to split a line into values.
    pub value_separator: char,
}

impl TokenizerSettings {
    /// tokenizer settings initialization
    pub fn new() -> Self {
        TokenizerSettings {
            max_remembered: 0,
            split_values: false,
            value_separator: DEFAULT_VALUE_SEPARATOR,
        }
    }

    /// set maximum number of remembered lines
    #[must_use]
    pub fn max_remembered(mut self, max_remembered: usize) -> Self {
        self.max_remembered = max_remembered;
        self
    }

    /// enable value splitting with the given separator
    #[must_use]
    pub fn split_values(mut self, value_separator: char) -> Self {
        self.split_values = true;
        self.value_separator = value_separator;
        self
    }

    /// Rejects settings the tokenizer cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.value_separator == LINE_TERMINATOR {
            return Err(SerialLinesError::invalid_config(
                "value separator must differ from the line terminator",
            ));
        }
        Ok(())
    }
}

impl Default for TokenizerSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// token produced by [`StreamLineTokenizer::ingest`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenEvent {
    /// a completed line, terminator stripped
    Line(String),
    /// the fields of the preceding line
    Values(Vec<String>),
}

/// Everything one call to [`StreamLineTokenizer::ingest`] produced, in the
/// order the lines were completed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestResult {
    /// line and value events
    pub events: Vec<TokenEvent>,
    /// number of remembered lines evicted by this call
    pub evicted: usize,
}

impl IngestResult {
    /// completed lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|event| match event {
            TokenEvent::Line(line) => Some(line.as_str()),
            TokenEvent::Values(_) => None,
        })
    }

    /// split values
    pub fn values(&self) -> impl Iterator<Item = &[String]> {
        self.events.iter().filter_map(|event| match event {
            TokenEvent::Values(values) => Some(values.as_slice()),
            TokenEvent::Line(_) => None,
        })
    }

    /// nothing was completed
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

struct TokenizerState {
    pending: String,
    history: LineHistory,
    evicted_total: usize,
}

/// Splits a chunked text stream into lines and values.
///
/// All operations take `&self`; the pending buffer and history sit behind a
/// single mutex so the tokenizer can be shared behind an `Arc` between the
/// ingesting side and any number of draining consumers.
pub struct StreamLineTokenizer {
    settings: TokenizerSettings,
    state: Mutex<TokenizerState>,
}

impl StreamLineTokenizer {
    /// tokenizer initialization
    pub fn new(settings: TokenizerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(StreamLineTokenizer {
            settings,
            state: Mutex::new(TokenizerState {
                pending: String::new(),
                history: LineHistory::new(settings.max_remembered),
                evicted_total: 0,
            }),
        })
    }

    /// get settings
    pub fn settings(&self) -> &TokenizerSettings {
        &self.settings
    }

    // Every mutation leaves the state consistent, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, TokenizerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feeds a chunk of received text and returns the lines it completed.
    pub fn ingest(&self, chunk: &str) -> IngestResult {
        let mut result = IngestResult::default();
        let mut state = self.lock();

        if !chunk.contains(LINE_TERMINATOR) {
            state.pending.push_str(chunk);
            return result;
        }

        let mut buffered = std::mem::take(&mut state.pending);
        buffered.push_str(chunk);

        let mut pieces = buffered.split(LINE_TERMINATOR);
        let tail = pieces.next_back().unwrap_or_default();

        for line in pieces {
            result.events.push(TokenEvent::Line(line.to_owned()));
            if self.settings.split_values {
                let values = line
                    .split(self.settings.value_separator)
                    .map(str::to_owned)
                    .collect();
                result.events.push(TokenEvent::Values(values));
            }
            result.evicted += state.history.push(line);
        }

        state.pending = tail.to_owned();
        state.evicted_total += result.evicted;

        debug!(
            "ingested {} bytes, {} pending, {} evicted",
            chunk.len(),
            state.pending.len(),
            result.evicted
        );

        result
    }

    /// Returns all remembered lines in insertion order, clearing them unless
    /// `keep` is set.
    pub fn drain_all(&self, keep: bool) -> Vec<String> {
        let mut state = self.lock();
        if keep {
            state.history.to_vec()
        } else {
            state.history.take_all()
        }
    }

    /// Returns the most recently remembered line, or an empty string when
    /// there is none. Clears all remembered lines unless `keep` is set.
    pub fn drain_last(&self, keep: bool) -> String {
        let mut state = self.lock();
        let line = state.history.last().unwrap_or_default().to_owned();
        if !keep {
            state.history.clear();
        }
        line
    }

    /// get number of remembered lines
    pub fn lines_count(&self) -> usize {
        self.lock().history.len()
    }

    /// get length in bytes of the unterminated tail
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// get number of lines evicted since creation
    pub fn evicted_total(&self) -> usize {
        self.lock().evicted_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn tokenizer(settings: TokenizerSettings) -> StreamLineTokenizer {
        StreamLineTokenizer::new(settings).unwrap()
    }

    #[test]
    fn test_line_split_across_chunks() {
        let tokenizer = tokenizer(TokenizerSettings::new());
        assert!(tokenizer.ingest("ab").is_empty());
        assert_eq!(tokenizer.pending_len(), 2);

        let result = tokenizer.ingest("cd\n");
        assert_eq!(result.events, vec![TokenEvent::Line("abcd".to_string())]);
        assert_eq!(tokenizer.pending_len(), 0);
    }

    #[test]
    fn test_consecutive_terminators_yield_empty_lines() {
        let tokenizer = tokenizer(TokenizerSettings::new());
        let result = tokenizer.ingest("\n\n");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["", ""]);
    }

    #[test]
    fn test_leading_terminator_completes_pending() {
        let tokenizer = tokenizer(TokenizerSettings::new().max_remembered(4));
        tokenizer.ingest("abc");
        let result = tokenizer.ingest("\nd");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["abc"]);

        let result = tokenizer.ingest("\n\n");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["d", ""]);
        assert_eq!(tokenizer.drain_all(false), vec!["abc", "d", ""]);
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let tokenizer = tokenizer(TokenizerSettings::new());
        assert!(tokenizer.ingest("").is_empty());
        assert_eq!(tokenizer.pending_len(), 0);
    }

    #[test]
    fn test_carriage_return_is_preserved() {
        let tokenizer = tokenizer(TokenizerSettings::new());
        let result = tokenizer.ingest("ok\r\n");
        assert_eq!(result.lines().collect::<Vec<_>>(), vec!["ok\r"]);
    }

    #[test]
    fn test_values_follow_their_line() {
        let tokenizer = tokenizer(TokenizerSettings::new().split_values('\t'));
        let result = tokenizer.ingest("x\ty\tz\n1\t2\n");
        assert_eq!(
            result.events,
            vec![
                TokenEvent::Line("x\ty\tz".to_string()),
                TokenEvent::Values(vec!["x".into(), "y".into(), "z".into()]),
                TokenEvent::Line("1\t2".to_string()),
                TokenEvent::Values(vec!["1".into(), "2".into()]),
            ]
        );
    }

    #[test]
    fn test_values_with_custom_separator() {
        let tokenizer = tokenizer(TokenizerSettings::new().split_values(','));
        let result = tokenizer.ingest("12,,34\n");
        let values: Vec<&[String]> = result.values().collect();
        assert_eq!(values, vec![&["12".to_string(), String::new(), "34".to_string()][..]]);
    }

    #[test]
    fn test_history_eviction_reports_count() {
        let tokenizer = tokenizer(TokenizerSettings::new().max_remembered(2));
        let result = tokenizer.ingest("a\nb\nc\n");
        assert_eq!(result.evicted, 1);
        assert_eq!(tokenizer.evicted_total(), 1);
        assert_eq!(tokenizer.drain_all(true), vec!["b", "c"]);
    }

    #[test]
    fn test_history_disabled_still_emits_lines() {
        let tokenizer = tokenizer(TokenizerSettings::new());
        let result = tokenizer.ingest("a\nb\n");
        assert_eq!(result.lines().count(), 2);
        assert_eq!(result.evicted, 0);
        assert_eq!(tokenizer.lines_count(), 0);
        assert!(tokenizer.drain_all(false).is_empty());
    }

    #[test]
    fn test_drain_all_clears_unless_kept() {
        let tokenizer = tokenizer(TokenizerSettings::new().max_remembered(10));
        tokenizer.ingest("one\ntwo\n");

        assert_eq!(tokenizer.drain_all(true), vec!["one", "two"]);
        assert_eq!(tokenizer.lines_count(), 2);

        assert_eq!(tokenizer.drain_all(false), vec!["one", "two"]);
        assert!(tokenizer.drain_all(false).is_empty());
    }

    #[test]
    fn test_drain_last() {
        let tokenizer = tokenizer(TokenizerSettings::new().max_remembered(10));
        assert_eq!(tokenizer.drain_last(false), "");

        tokenizer.ingest("one\ntwo\nthr");
        assert_eq!(tokenizer.drain_last(true), "two");
        assert_eq!(tokenizer.lines_count(), 2);
        assert_eq!(tokenizer.drain_last(false), "two");
        assert_eq!(tokenizer.lines_count(), 0);
        assert_eq!(tokenizer.drain_last(false), "");
    }

    #[test]
    fn test_separator_equal_to_terminator_is_rejected() {
        let settings = TokenizerSettings::new().split_values('\n');
        assert!(matches!(
            StreamLineTokenizer::new(settings),
            Err(SerialLinesError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_concurrent_ingest_and_drain() {
        let tokenizer = Arc::new(tokenizer(TokenizerSettings::new().max_remembered(10_000)));
        let writer = {
            let tokenizer = Arc::clone(&tokenizer);
            thread::spawn(move || {
                for i in 0..1000 {
                    tokenizer.ingest(&format!("line {i}\n"));
                }
            })
        };

        let mut drained = Vec::new();
        while !writer.is_finished() {
            drained.extend(tokenizer.drain_all(false));
        }
        writer.join().unwrap();
        drained.extend(tokenizer.drain_all(false));

        assert_eq!(drained.len(), 1000);
        assert_eq!(drained[0], "line 0");
        assert_eq!(drained[999], "line 999");
    }
}
