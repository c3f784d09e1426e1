//! Sequence sets for message ranges.

use std::num::NonZeroU32;
use std::ops::RangeInclusive;

/// One end of a sequence range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqBound {
    /// An explicit message number or UID.
    Value(NonZeroU32),
    /// `*`, the largest number in use.
    Largest,
}

impl SeqBound {
    fn resolve(self, largest: u32) -> u32 {
        match self {
            Self::Value(n) => n.get(),
            Self::Largest => largest,
        }
    }
}

impl std::fmt::Display for SeqBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(n) => write!(f, "{n}"),
            Self::Largest => f.write_str("*"),
        }
    }
}

/// A single `a` or `a:b` element of a sequence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    /// First bound as written by the client.
    pub start: SeqBound,
    /// Second bound; equal to `start` for single values.
    pub end: SeqBound,
}

/// Sequence set as sent by a client, e.g. `1:5,7,10:*`.
///
/// The same syntax is used for message sequence numbers and UIDs; the
/// command decides which one it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet {
    ranges: Vec<SeqRange>,
}

impl SequenceSet {
    /// Creates a set holding the range `start:end`.
    #[must_use]
    pub fn range(start: u32, end: u32) -> Option<Self> {
        Some(Self {
            ranges: vec![SeqRange {
                start: SeqBound::Value(NonZeroU32::new(start)?),
                end: SeqBound::Value(NonZeroU32::new(end)?),
            }],
        })
    }

    /// Creates a set holding a single number.
    #[must_use]
    pub fn single(n: u32) -> Option<Self> {
        Self::range(n, n)
    }

    /// Parses the `sequence-set` grammar. Returns `None` on syntax errors.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let ranges = s
            .split(',')
            .map(|part| {
                let (a, b) = part.split_once(':').unwrap_or((part, part));
                Some(SeqRange {
                    start: parse_bound(a)?,
                    end: parse_bound(b)?,
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { ranges })
    }

    /// Returns the ranges as written.
    #[must_use]
    pub fn ranges(&self) -> &[SeqRange] {
        &self.ranges
    }

    /// Resolves `*` against `largest` and returns sorted, merged,
    /// non-overlapping ranges.
    ///
    /// With `largest == 0` (empty mailbox) `*` resolves to nothing.
    #[must_use]
    pub fn resolve(&self, largest: u32) -> Vec<RangeInclusive<u32>> {
        let mut spans: Vec<(u32, u32)> = self
            .ranges
            .iter()
            .filter_map(|r| {
                let a = r.start.resolve(largest);
                let b = r.end.resolve(largest);
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                (lo > 0).then_some((lo, hi))
            })
            .collect();
        spans.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(spans.len());
        for (lo, hi) in spans {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }
        merged.into_iter().map(|(lo, hi)| lo..=hi).collect()
    }

    /// Returns true if `n` is a member of the set.
    #[must_use]
    pub fn contains(&self, n: u32, largest: u32) -> bool {
        self.ranges.iter().any(|r| {
            let a = r.start.resolve(largest);
            let b = r.end.resolve(largest);
            a.min(b) <= n && n <= a.max(b)
        })
    }
}

fn parse_bound(s: &str) -> Option<SeqBound> {
    if s == "*" {
        return Some(SeqBound::Largest);
    }
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .map(SeqBound::Value)
}

impl std::fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if r.start == r.end {
                write!(f, "{}", r.start)?;
            } else {
                write!(f, "{}:{}", r.start, r.end)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_and_range() {
        let set = SequenceSet::parse("1:500").unwrap();
        assert_eq!(set.resolve(1000), vec![1..=500]);
        assert_eq!(SequenceSet::parse("7").unwrap().resolve(10), vec![7..=7]);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SequenceSet::parse("").is_none());
        assert!(SequenceSet::parse("0").is_none());
        assert!(SequenceSet::parse("1:").is_none());
        assert!(SequenceSet::parse("a").is_none());
        assert!(SequenceSet::parse("1,,2").is_none());
        assert!(SequenceSet::parse("+1").is_none());
    }

    #[test]
    fn star_resolves_to_largest() {
        let set = SequenceSet::parse("5:*").unwrap();
        assert_eq!(set.resolve(9), vec![5..=9]);
        let reversed = SequenceSet::parse("*:5").unwrap();
        assert_eq!(reversed.resolve(9), vec![5..=9]);
    }

    #[test]
    fn star_on_empty_mailbox_is_empty() {
        assert!(SequenceSet::parse("*").unwrap().resolve(0).is_empty());
    }

    #[test]
    fn resolve_merges_overlaps() {
        let set = SequenceSet::parse("10:12,1:3,4,11:20").unwrap();
        assert_eq!(set.resolve(100), vec![1..=4, 10..=20]);
    }

    #[test]
    fn contains_respects_star() {
        let set = SequenceSet::parse("3,8:*").unwrap();
        assert!(set.contains(3, 10));
        assert!(set.contains(10, 10));
        assert!(!set.contains(4, 10));
    }

    #[test]
    fn display_round_trips_input() {
        for input in ["1", "1:10", "50:*", "*", "1,5:10"] {
            assert_eq!(SequenceSet::parse(input).unwrap().to_string(), input);
        }
    }
}
