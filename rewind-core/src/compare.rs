//! Diff/Cost Comparator
//!
//! Compares an original response with its replayed counterpart: cost savings,
//! token efficiency and a textual diff. Comparison is total; any two
//! snapshots, including empty ones, produce a result.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag};

use crate::replay::ResponseSnapshot;

/// Unit of the textual diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffGranularity {
    #[default]
    Word,
    Line,
}

/// Kind of a diff span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOp {
    Equal,
    Insert,
    Delete,
}

/// A run of consecutive units with the same change kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSpan {
    pub op: DiffOp,
    pub text: String,
}

/// Textual difference between two responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDiff {
    pub granularity: DiffGranularity,
    /// Ordered spans; concatenating Equal+Delete gives the original,
    /// Equal+Insert gives the replayed text
    pub spans: Vec<DiffSpan>,
    /// Units only in the replayed text (blank units not counted)
    pub inserted: usize,
    /// Units only in the original text (blank units not counted)
    pub deleted: usize,
    pub unchanged: usize,
    /// Similarity ratio in `0.0..=1.0`
    pub similarity: f64,
}

impl TextDiff {
    /// Diff `original` against `replayed`
    pub fn compute(original: &str, replayed: &str, granularity: DiffGranularity) -> Self {
        let diff = match granularity {
            DiffGranularity::Word => similar::TextDiff::configure()
                .algorithm(Algorithm::Myers)
                .diff_words(original, replayed),
            DiffGranularity::Line => similar::TextDiff::configure()
                .algorithm(Algorithm::Patience)
                .diff_lines(original, replayed),
        };

        let mut spans: Vec<DiffSpan> = Vec::new();
        let (mut inserted, mut deleted, mut unchanged) = (0, 0, 0);

        for change in diff.iter_all_changes() {
            let op = match change.tag() {
                ChangeTag::Equal => DiffOp::Equal,
                ChangeTag::Insert => DiffOp::Insert,
                ChangeTag::Delete => DiffOp::Delete,
            };
            let value = change.value();

            if !value.trim().is_empty() {
                match op {
                    DiffOp::Equal => unchanged += 1,
                    DiffOp::Insert => inserted += 1,
                    DiffOp::Delete => deleted += 1,
                }
            }

            match spans.last_mut() {
                Some(last) if last.op == op => last.text.push_str(value),
                _ => spans.push(DiffSpan {
                    op,
                    text: value.to_string(),
                }),
            }
        }

        Self {
            granularity,
            spans,
            inserted,
            deleted,
            unchanged,
            similarity: diff.ratio() as f64,
        }
    }

    pub fn is_identical(&self) -> bool {
        self.spans.iter().all(|s| s.op == DiffOp::Equal)
    }
}

/// Structured comparison of two responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub original_cost: f64,
    pub replayed_cost: f64,
    /// `original - replayed`; negative when the replay was more expensive
    pub cost_savings: f64,
    /// Savings relative to the original cost; `None` when the original was free
    pub cost_savings_percent: Option<f64>,
    /// `None` when the side used no tokens
    pub original_cost_per_1k_tokens: Option<f64>,
    pub replayed_cost_per_1k_tokens: Option<f64>,
    pub original_tokens: u64,
    pub replayed_tokens: u64,
    /// `replayed_tokens - original_tokens`
    pub token_delta: i64,
    pub diff: TextDiff,
}

/// Compare with a word-level diff
pub fn compare(original: &ResponseSnapshot, replayed: &ResponseSnapshot) -> ComparisonResult {
    compare_with(original, replayed, DiffGranularity::Word)
}

/// Compare with the given diff granularity
pub fn compare_with(
    original: &ResponseSnapshot,
    replayed: &ResponseSnapshot,
    granularity: DiffGranularity,
) -> ComparisonResult {
    let cost_savings = original.cost - replayed.cost;
    let cost_savings_percent =
        (original.cost != 0.0).then(|| cost_savings / original.cost * 100.0);

    let original_tokens = original.usage.total();
    let replayed_tokens = replayed.usage.total();

    ComparisonResult {
        original_cost: original.cost,
        replayed_cost: replayed.cost,
        cost_savings,
        cost_savings_percent,
        original_cost_per_1k_tokens: cost_per_1k(original.cost, original_tokens),
        replayed_cost_per_1k_tokens: cost_per_1k(replayed.cost, replayed_tokens),
        original_tokens,
        replayed_tokens,
        token_delta: token_delta(original_tokens, replayed_tokens),
        diff: TextDiff::compute(&original.content, &replayed.content, granularity),
    }
}

/// `replayed - original`, clamped to the `i64` range
fn token_delta(original: u64, replayed: u64) -> i64 {
    let delta = i128::from(replayed) - i128::from(original);
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

fn cost_per_1k(cost: f64, tokens: u64) -> Option<f64> {
    (tokens > 0).then(|| cost / tokens as f64 * 1000.0)
}
