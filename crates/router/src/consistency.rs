//! Consistency checks between a primary result and a secondary result.
//!
//! Every function here is pure: it compares two already-captured answers
//! and reports the first disagreement it finds. Recording and logging
//! happen in the dispatcher.

use pstore_common::{summarize, Code, CountResponse, DriftKind, GetKeysResponse, ReadResponse};

/// A detected disagreement, with enough context for a postmortem log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub kind: DriftKind,
    pub detail: String,
}

/// Outcome of checking one secondary against the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Both answered and agree.
    Agree,
    /// Both answered and disagree.
    Drift(Mismatch),
    /// The primary has the key, the secondary reports NotFound.
    Missing,
    /// Nothing comparable: a side failed, or the operation is not compared.
    Skipped,
}

impl From<Option<Mismatch>> for Verdict {
    fn from(mismatch: Option<Mismatch>) -> Self {
        match mismatch {
            Some(m) => Verdict::Drift(m),
            None => Verdict::Agree,
        }
    }
}

/// Index of the first differing byte, or `None` when the slices are equal.
/// Slices of different length differ at the shorter length at the latest.
pub fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    match a.iter().zip(b).position(|(x, y)| x != y) {
        Some(i) => Some(i),
        None if a.len() != b.len() => Some(a.len().min(b.len())),
        None => None,
    }
}

/// Length first, then bytes. Stops at the first differing byte.
pub fn compare_read(primary: &ReadResponse, secondary: &ReadResponse) -> Option<Mismatch> {
    let p = &primary.value.payload;
    let s = &secondary.value.payload;
    if p.len() != s.len() {
        return Some(Mismatch {
            kind: DriftKind::Read,
            detail: format!(
                "length {} != {} (primary '{}', secondary '{}')",
                p.len(),
                s.len(),
                summarize(p),
                summarize(s)
            ),
        });
    }
    first_difference(p, s).map(|at| Mismatch {
        kind: DriftKind::Read,
        detail: format!(
            "byte {} differs (primary '{}', secondary '{}')",
            at,
            summarize(p),
            summarize(s)
        ),
    })
}

/// Count first, then element-wise in returned order. A count mismatch and
/// an ordering mismatch land in distinct counters.
pub fn compare_keys(primary: &GetKeysResponse, secondary: &GetKeysResponse) -> Option<Mismatch> {
    if primary.keys.len() != secondary.keys.len() {
        return Some(Mismatch {
            kind: DriftKind::GetKeysCount,
            detail: format!(
                "{} keys != {} keys",
                primary.keys.len(),
                secondary.keys.len()
            ),
        });
    }
    primary
        .keys
        .iter()
        .zip(&secondary.keys)
        .position(|(p, s)| p != s)
        .map(|at| Mismatch {
            kind: DriftKind::GetKeysOrder,
            detail: format!(
                "position {}: primary '{}', secondary '{}'",
                at, primary.keys[at], secondary.keys[at]
            ),
        })
}

/// Delete outcomes are compared by status code.
pub fn compare_delete(primary: Code, secondary: Code) -> Option<Mismatch> {
    (primary != secondary).then(|| Mismatch {
        kind: DriftKind::Delete,
        detail: format!("code {} != {}", primary, secondary),
    })
}

pub fn compare_count(primary: &CountResponse, secondary: &CountResponse) -> Option<Mismatch> {
    (primary.count != secondary.count).then(|| Mismatch {
        kind: DriftKind::Count,
        detail: format!("{} != {}", primary.count, secondary.count),
    })
}
