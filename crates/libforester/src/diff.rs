//! Line-oriented unified diffs between stored and working file contents.

use std::{iter, str};

/// Lines of context around each change.
const CONTEXT: usize = 3;

/// Above this many line pairs the LCS table is skipped and the whole file is
/// reported as replaced.
const MAX_TABLE_CELLS: usize = 16_000_000;

/// Bytes inspected when sniffing for binary content.
const SNIFF_LEN: usize = 8000;

/// Whether contents should be treated as binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_LEN)].contains(&0) || str::from_utf8(bytes).is_err()
}

/// One step of an edit script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    /// Line present on both sides.
    Equal,
    /// Line only in the old file.
    Delete,
    /// Line only in the new file.
    Insert,
}

/// Render a diff for one path. `None` stands for an absent file.
pub fn unified_diff(path: &str, old: Option<&[u8]>, new: Option<&[u8]>) -> String {
    let mut out = String::new();
    let old_name = old.map_or_else(|| "/dev/null".to_string(), |_| format!("a/{path}"));
    let new_name = new.map_or_else(|| "/dev/null".to_string(), |_| format!("b/{path}"));
    out.push_str(&format!("diff --forester a/{path} b/{path}\n"));
    out.push_str(&format!("--- {old_name}\n"));
    out.push_str(&format!("+++ {new_name}\n"));

    let old_bytes = old.unwrap_or_default();
    let new_bytes = new.unwrap_or_default();
    if is_binary(old_bytes) || is_binary(new_bytes) {
        out.push_str(&format!("Binary files {old_name} and {new_name} differ\n"));
        return out;
    }

    let old_text = String::from_utf8_lossy(old_bytes);
    let new_text = String::from_utf8_lossy(new_bytes);
    let old_lines: Vec<&str> = old_text.lines().collect();
    let new_lines: Vec<&str> = new_text.lines().collect();
    let script = edit_script(&old_lines, &new_lines);
    render_hunks(&mut out, &script, &old_lines, &new_lines);
    out
}

/// Longest-common-subsequence edit script.
fn edit_script(old: &[&str], new: &[&str]) -> Vec<Op> {
    let (n, m) = (old.len(), new.len());
    if n.saturating_mul(m) > MAX_TABLE_CELLS {
        let mut ops = vec![Op::Delete; n];
        ops.extend(iter::repeat_n(Op::Insert, m));
        return ops;
    }

    // lcs[i][j] = LCS length of old[i..] and new[j..].
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if old[i] == new[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    ops.extend(iter::repeat_n(Op::Delete, n - i));
    ops.extend(iter::repeat_n(Op::Insert, m - j));
    ops
}

/// Group the script into hunks and append them to `out`.
fn render_hunks(out: &mut String, script: &[Op], old: &[&str], new: &[&str]) {
    let changes: Vec<usize> = script
        .iter()
        .enumerate()
        .filter(|(_, op)| **op != Op::Equal)
        .map(|(i, _)| i)
        .collect();
    if changes.is_empty() {
        return;
    }

    // Split change positions into groups close enough to share a hunk.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &pos in &changes {
        match groups.last_mut() {
            Some((_, end)) if pos - *end <= 2 * CONTEXT => *end = pos,
            _ => groups.push((pos, pos)),
        }
    }

    // Old/new line positions before each script index.
    let mut old_pos = Vec::with_capacity(script.len() + 1);
    let mut new_pos = Vec::with_capacity(script.len() + 1);
    let (mut o, mut n) = (0, 0);
    for op in script {
        old_pos.push(o);
        new_pos.push(n);
        match op {
            Op::Equal => {
                o += 1;
                n += 1;
            }
            Op::Delete => o += 1,
            Op::Insert => n += 1,
        }
    }
    old_pos.push(o);
    new_pos.push(n);

    for (first, last) in groups {
        let start = first.saturating_sub(CONTEXT);
        let end = (last + CONTEXT + 1).min(script.len());
        let old_count = old_pos[end] - old_pos[start];
        let new_count = new_pos[end] - new_pos[start];
        let old_start = if old_count == 0 { old_pos[start] } else { old_pos[start] + 1 };
        let new_start = if new_count == 0 { new_pos[start] } else { new_pos[start] + 1 };
        out.push_str(&format!("@@ -{old_start},{old_count} +{new_start},{new_count} @@\n"));
        for idx in start..end {
            match script[idx] {
                Op::Equal => {
                    out.push_str(&format!(" {}\n", old[old_pos[idx]]));
                }
                Op::Delete => {
                    out.push_str(&format!("-{}\n", old[old_pos[idx]]));
                }
                Op::Insert => {
                    out.push_str(&format!("+{}\n", new[new_pos[idx]]));
                }
            }
        }
    }
}
