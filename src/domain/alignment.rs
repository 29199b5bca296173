//! Token alignment between a target phrase and a recognized transcript.
//!
//! Both strings are reduced to lowercase alphabetic tokens and aligned with a
//! longest-common-subsequence table. The resulting mask marks which target
//! tokens were spoken, in order. [`project`] maps the mask back onto the
//! original target text for word-level diff rendering.

use serde::{Deserialize, Serialize};

/// Outcome of aligning a transcript against a target phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// One flag per target token, true when the token is part of the LCS.
    pub matched_mask: Vec<bool>,
    /// Fraction of target tokens matched, in `[0, 1]`.
    pub score: f32,
}

impl AlignmentResult {
    /// Score as a whole percentage.
    #[must_use]
    pub fn percent(&self) -> u8 {
        (self.score * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Number of matched target tokens.
    #[must_use]
    pub fn matched_count(&self) -> usize {
        self.matched_mask.iter().filter(|&&m| m).count()
    }

    /// Diff spans over the original target text.
    #[must_use]
    pub fn spans(&self, target: &str) -> Vec<DiffSpan> {
        project(target, &self.matched_mask)
    }
}

/// A segment of the original target text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSpan {
    pub text: String,
    pub kind: SpanKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SpanKind {
    /// A word carrying a match flag.
    Word { matched: bool },
    /// Whitespace or punctuation; never flagged as wrong.
    Separator,
}

impl DiffSpan {
    fn word(text: &str, matched: bool) -> Self {
        Self {
            text: text.to_string(),
            kind: SpanKind::Word { matched },
        }
    }

    fn separator(text: &str) -> Self {
        Self {
            text: text.to_string(),
            kind: SpanKind::Separator,
        }
    }

    /// False only for a word that was not matched.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        !matches!(self.kind, SpanKind::Word { matched: false })
    }
}

/// Normalize one whitespace-delimited chunk into a token.
fn normalize_chunk(chunk: &str) -> String {
    chunk
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split text into lowercase alphabetic tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(normalize_chunk)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Mark which reference tokens participate in the longest common subsequence.
///
/// Backtracking starts at the bottom-right cell; a token match always takes
/// the diagonal, otherwise the walk moves up when the upper cell is at least
/// as large as the left cell.
pub fn lcs_mask<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> Vec<bool> {
    let n = reference.len();
    let m = hypothesis.len();
    let mut mask = vec![false; n];
    if n == 0 || m == 0 {
        return mask;
    }

    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in 1..=n {
        for j in 1..=m {
            table[i * width + j] = if reference[i - 1] == hypothesis[j - 1] {
                table[(i - 1) * width + (j - 1)] + 1
            } else {
                table[(i - 1) * width + j].max(table[i * width + (j - 1)])
            };
        }
    }

    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        if reference[i - 1] == hypothesis[j - 1] {
            mask[i - 1] = true;
            i -= 1;
            j -= 1;
        } else if table[(i - 1) * width + j] >= table[i * width + (j - 1)] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    mask
}

/// Align a recognized transcript against the target phrase.
pub fn align(target: &str, recognized: &str) -> AlignmentResult {
    let reference = tokenize(target);
    let hypothesis = tokenize(recognized);
    let matched_mask = lcs_mask(&reference, &hypothesis);

    let score = if reference.is_empty() {
        0.0
    } else {
        let matched = matched_mask.iter().filter(|&&m| m).count();
        (matched as f32 / reference.len() as f32).clamp(0.0, 1.0)
    };

    AlignmentResult {
        matched_mask,
        score,
    }
}

/// Project a token mask onto the original target text.
///
/// Each whitespace-delimited chunk that produces a token yields exactly one
/// word span running from its first to its last alphabetic character; leading
/// and trailing punctuation and all whitespace become separator spans.
/// Concatenating the span texts reproduces `target` exactly.
pub fn project(target: &str, matched_mask: &[bool]) -> Vec<DiffSpan> {
    let mut spans = Vec::new();
    let mut token_index = 0usize;
    let mut rest = target;

    while !rest.is_empty() {
        let ws_len = rest
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map_or(rest.len(), |(i, _)| i);
        if ws_len > 0 {
            spans.push(DiffSpan::separator(&rest[..ws_len]));
            rest = &rest[ws_len..];
            continue;
        }

        let chunk_len = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map_or(rest.len(), |(i, _)| i);
        let chunk = &rest[..chunk_len];
        rest = &rest[chunk_len..];

        let first_alpha = chunk.char_indices().find(|(_, c)| c.is_alphabetic());
        let last_alpha = chunk.char_indices().rev().find(|(_, c)| c.is_alphabetic());
        match (first_alpha, last_alpha) {
            (Some((start, _)), Some((last, c))) => {
                let end = last + c.len_utf8();
                if start > 0 {
                    spans.push(DiffSpan::separator(&chunk[..start]));
                }
                let matched = matched_mask.get(token_index).copied().unwrap_or(false);
                spans.push(DiffSpan::word(&chunk[start..end], matched));
                token_index += 1;
                if end < chunk.len() {
                    spans.push(DiffSpan::separator(&chunk[end..]));
                }
            }
            _ => spans.push(DiffSpan::separator(chunk)),
        }
    }
    spans
}
