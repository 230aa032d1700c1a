//! Three-way text merge.
//!
//! Merges two derived versions of a text against their common ancestor.
//! Regions changed on only one side take that side's content; regions
//! changed identically on both sides merge silently; disagreeing
//! regions become conflict blocks bracketed by the classic markers:
//!
//! ```text
//! <<<<<<< <ours-label>
//! ours lines
//! =======
//! theirs lines
//! >>>>>>> <theirs-label>
//! ```
//!
//! Edit scripts come from the `similar` crate (Myers diff); the merge
//! itself builds a per-base-line action table for each side and walks
//! the base once.

use similar::{DiffOp, TextDiff};

/// Marker opening a conflict block ("ours" side follows).
pub const CONFLICT_MARKER_BEGIN: &str = "<<<<<<<";
/// Marker separating the two sides of a conflict block.
pub const CONFLICT_MARKER_SEP: &str = "=======";
/// Marker closing a conflict block ("theirs" side precedes).
pub const CONFLICT_MARKER_END: &str = ">>>>>>>";

/// The outcome of a three-way merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    /// Merged text, conflict markers included when `conflicts > 0`.
    pub text: String,
    /// Number of conflict blocks emitted.
    pub conflicts: usize,
}

impl MergeResult {
    /// Returns `true` if the merge completed without conflicts.
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

/// What one side did at a particular base line position.
#[derive(Clone, Debug, PartialEq)]
enum LineAction {
    /// Keep the base line unchanged.
    Keep,
    /// Delete the base line.
    Delete,
    /// Replace the base line with different content. Only the first
    /// line of a replaced run carries the replacement.
    Replace(Vec<String>),
}

fn split_lines(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.lines().collect()
    }
}

/// Build a per-base-line action table for one derived side.
///
/// Returns `(actions, inserts_before)` where `inserts_before[i]` holds
/// the lines this side inserted before base line `i`;
/// `inserts_before[base_len]` holds trailing insertions.
fn build_action_table(base: &str, derived: &str) -> (Vec<LineAction>, Vec<Vec<String>>) {
    let base_lines = split_lines(base);
    let derived_lines = split_lines(derived);
    let base_len = base_lines.len();

    let mut actions = vec![LineAction::Keep; base_len];
    let mut inserts_before: Vec<Vec<String>> = vec![Vec::new(); base_len + 1];

    let diff = TextDiff::from_slices(&base_lines, &derived_lines);
    for op in diff.ops() {
        match op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete { old_index, old_len, .. } => {
                for action in actions.iter_mut().skip(*old_index).take(*old_len) {
                    *action = LineAction::Delete;
                }
            }
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => {
                let lines = derived_lines[*new_index..*new_index + *new_len]
                    .iter()
                    .map(|s| s.to_string());
                inserts_before[*old_index].extend(lines);
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                let replacement: Vec<String> = derived_lines[*new_index..*new_index + *new_len]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                actions[*old_index] = LineAction::Replace(replacement);
                for action in actions.iter_mut().skip(*old_index + 1).take(*old_len - 1) {
                    *action = LineAction::Delete;
                }
            }
        }
    }

    (actions, inserts_before)
}

fn push_conflict(
    out: &mut Vec<String>,
    conflicts: &mut usize,
    ours: &[String],
    theirs: &[String],
    label_ours: &str,
    label_theirs: &str,
) {
    out.push(format!("{CONFLICT_MARKER_BEGIN} {label_ours}"));
    out.extend(ours.iter().cloned());
    out.push(CONFLICT_MARKER_SEP.to_string());
    out.extend(theirs.iter().cloned());
    out.push(format!("{CONFLICT_MARKER_END} {label_theirs}"));
    *conflicts += 1;
}

/// Perform a three-way merge of `ours` and `theirs` against `base`.
///
/// `label_ours` and `label_theirs` annotate the conflict markers. An
/// empty `base` makes both sides' content appear in full, so two
/// independent additions of differing content conflict in their
/// entirety.
pub fn merge3(
    base: &str,
    ours: &str,
    theirs: &str,
    label_ours: &str,
    label_theirs: &str,
) -> MergeResult {
    // Fast paths.
    if ours == theirs {
        return MergeResult {
            text: ours.to_string(),
            conflicts: 0,
        };
    }
    if base == ours {
        return MergeResult {
            text: theirs.to_string(),
            conflicts: 0,
        };
    }
    if base == theirs {
        return MergeResult {
            text: ours.to_string(),
            conflicts: 0,
        };
    }

    let base_lines = split_lines(base);
    let (our_actions, our_inserts) = build_action_table(base, ours);
    let (their_actions, their_inserts) = build_action_table(base, theirs);

    let mut out: Vec<String> = Vec::new();
    let mut conflicts = 0usize;

    for i in 0..=base_lines.len() {
        // Insertions anchored before base line i (or trailing when i ==
        // base_len).
        let ins_ours = &our_inserts[i];
        let ins_theirs = &their_inserts[i];
        match (ins_ours.is_empty(), ins_theirs.is_empty()) {
            (false, true) => out.extend(ins_ours.iter().cloned()),
            (true, false) => out.extend(ins_theirs.iter().cloned()),
            (false, false) => {
                if ins_ours == ins_theirs {
                    out.extend(ins_ours.iter().cloned());
                } else {
                    push_conflict(
                        &mut out,
                        &mut conflicts,
                        ins_ours,
                        ins_theirs,
                        label_ours,
                        label_theirs,
                    );
                }
            }
            (true, true) => {}
        }

        if i == base_lines.len() {
            break;
        }

        match (&our_actions[i], &their_actions[i]) {
            (LineAction::Keep, LineAction::Keep) => out.push(base_lines[i].to_string()),
            (LineAction::Keep, LineAction::Delete) | (LineAction::Delete, LineAction::Keep) => {}
            (LineAction::Delete, LineAction::Delete) => {}
            (LineAction::Keep, LineAction::Replace(r)) => out.extend(r.iter().cloned()),
            (LineAction::Replace(r), LineAction::Keep) => out.extend(r.iter().cloned()),
            (LineAction::Replace(l), LineAction::Replace(r)) => {
                if l == r {
                    out.extend(l.iter().cloned());
                } else {
                    push_conflict(&mut out, &mut conflicts, l, r, label_ours, label_theirs);
                }
            }
            (LineAction::Delete, LineAction::Replace(r)) => {
                push_conflict(&mut out, &mut conflicts, &[], r, label_ours, label_theirs);
            }
            (LineAction::Replace(l), LineAction::Delete) => {
                push_conflict(&mut out, &mut conflicts, l, &[], label_ours, label_theirs);
            }
        }
    }

    let mut text = out.join("\n");
    let trailing = base.ends_with('\n') || ours.ends_with('\n') || theirs.ends_with('\n');
    if trailing && !text.is_empty() {
        text.push('\n');
    }
    MergeResult { text, conflicts }
}
