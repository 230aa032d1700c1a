//! Blob-level diff: line-by-line comparison of file contents.
//!
//! Uses the `similar` crate (Myers diff algorithm) to produce structured
//! hunks with context lines. The hunks feed the interactive patch
//! callbacks of stage/unstage, and [`apply_hunks`] rebuilds file content
//! from an accepted subset of hunks.

use similar::{ChangeTag, TextDiff};

/// Context lines kept around each hunk.
const CONTEXT_LINES: usize = 3;

/// The result of diffing two blobs (file contents).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobDiff {
    /// The diff hunks.
    pub hunks: Vec<DiffHunk>,
    /// Total number of lines in the old content.
    pub old_lines: usize,
    /// Total number of lines in the new content.
    pub new_lines: usize,
    /// Whether the old content ended with a newline.
    pub old_ends_nl: bool,
    /// Whether the new content ended with a newline.
    pub new_ends_nl: bool,
}

impl BlobDiff {
    /// Returns `true` if the two blobs are identical.
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Total number of lines added across all hunks.
    pub fn additions(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| matches!(l, DiffLine::Added(_)))
            .count()
    }

    /// Total number of lines removed across all hunks.
    pub fn deletions(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| matches!(l, DiffLine::Removed(_)))
            .count()
    }
}

/// A contiguous region of changes in a diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffHunk {
    /// Line number in the old content where this hunk starts (1-based).
    pub old_start: usize,
    /// Number of lines from the old content in this hunk.
    pub old_count: usize,
    /// Line number in the new content where this hunk starts (1-based).
    pub new_start: usize,
    /// Number of lines from the new content in this hunk.
    pub new_count: usize,
    /// The individual diff lines in this hunk.
    pub lines: Vec<DiffLine>,
}

/// A single line in a diff hunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffLine {
    /// A line present in both old and new (context).
    Context(String),
    /// A line added in the new content.
    Added(String),
    /// A line removed from the old content.
    Removed(String),
}

fn split_lines(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.lines().collect()
    }
}

/// Compute a line-by-line diff between two text contents.
pub fn diff_blobs(old: &str, new: &str) -> BlobDiff {
    let old_ends_nl = old.ends_with('\n');
    let new_ends_nl = new.ends_with('\n');
    let old_lines = split_lines(old).len();
    let new_lines = split_lines(new).len();

    if old == new {
        return BlobDiff {
            hunks: Vec::new(),
            old_lines,
            new_lines,
            old_ends_nl,
            new_ends_nl,
        };
    }

    let text_diff = TextDiff::from_lines(old, new);
    let hunks = text_diff
        .grouped_ops(CONTEXT_LINES)
        .iter()
        .filter_map(|group| {
            let first = group.first()?;
            let last = group.last()?;
            let lines = group
                .iter()
                .flat_map(|op| text_diff.iter_changes(op))
                .map(|change| {
                    let text = change.value().trim_end_matches('\n').to_string();
                    match change.tag() {
                        ChangeTag::Equal => DiffLine::Context(text),
                        ChangeTag::Delete => DiffLine::Removed(text),
                        ChangeTag::Insert => DiffLine::Added(text),
                    }
                })
                .collect();
            Some(DiffHunk {
                old_start: first.old_range().start + 1,
                old_count: last.old_range().end - first.old_range().start,
                new_start: first.new_range().start + 1,
                new_count: last.new_range().end - first.new_range().start,
                lines,
            })
        })
        .collect();

    BlobDiff {
        hunks,
        old_lines,
        new_lines,
        old_ends_nl,
        new_ends_nl,
    }
}

/// Rebuild content by applying a subset of a diff's hunks to the old
/// content.
///
/// `accepted` holds indices into `diff.hunks`, in any order. Hunks not
/// accepted leave their region of the old content untouched. Applying
/// every hunk reproduces the new content.
pub fn apply_hunks(old: &str, diff: &BlobDiff, accepted: &[usize]) -> String {
    let old_lines = split_lines(old);
    let mut picked: Vec<&DiffHunk> = accepted.iter().map(|&i| &diff.hunks[i]).collect();
    picked.sort_by_key(|h| h.old_start);

    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize; // 0-based index into old_lines

    for hunk in &picked {
        let hunk_start = hunk.old_start.saturating_sub(1);
        while cursor < hunk_start && cursor < old_lines.len() {
            out.push(old_lines[cursor].to_string());
            cursor += 1;
        }
        for line in &hunk.lines {
            match line {
                DiffLine::Context(text) | DiffLine::Added(text) => out.push(text.clone()),
                DiffLine::Removed(_) => {}
            }
        }
        cursor = (hunk_start + hunk.old_count).min(old_lines.len());
    }

    while cursor < old_lines.len() {
        out.push(old_lines[cursor].to_string());
        cursor += 1;
    }

    let mut result = out.join("\n");
    if !result.is_empty() && (diff.old_ends_nl || diff.new_ends_nl) {
        result.push('\n');
    }
    result
}
