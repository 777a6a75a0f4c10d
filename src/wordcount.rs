//! Word count, the canonical pipeline
//!
//! Input text is read as lines, each line is mapped to one `(word, 1)` pair
//! per whitespace-separated word, and the reducer sums the ones.

use crate::pipeline::{MapReduce, PipelineBuilder, StdoutWriter};
use std::collections::BTreeMap;

/// Word counts keyed by word, in sorted order.
pub type WordCounts = BTreeMap<String, u64>;

/// Builder for a word-count pipeline over a block of text.
///
/// The writer and bucket count can still be changed before `build()`.
pub fn pipeline() -> PipelineBuilder<String, String, String, u64> {
    MapReduce::with_input::<String>()
        .with_reader(|text: String| Ok(split_lines(&text)))
        .with_mapper(|line: String| Ok(map_line(&line)))
        .with_reducer(|_, counts: Vec<u64>| Ok(counts.into_iter().sum()))
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

fn map_line(line: &str) -> Vec<(String, u64)> {
    line.split_whitespace()
        .map(|word| (word.to_string(), 1))
        .collect()
}

/// Collect emitted pairs into sorted counts.
pub fn collect_counts(pairs: impl IntoIterator<Item = (String, u64)>) -> WordCounts {
    pairs.into_iter().collect()
}

/// Render counts the way the default writer prints them, one line per word.
pub fn render_text(counts: &WordCounts) -> String {
    counts
        .iter()
        .map(|(word, count)| format!("{}\n", StdoutWriter::format_pair(word, count)))
        .collect()
}
