//! Splitting resolved sequence ranges into fixed-size batches.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::ops::RangeInclusive;

use crate::types::SequenceSet;

/// A contiguous run of message sequence numbers fetched in one store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBatch {
    range: RangeInclusive<u32>,
}

impl ResultBatch {
    /// Creates a batch covering `range`.
    #[must_use]
    pub const fn new(range: RangeInclusive<u32>) -> Self {
        Self { range }
    }

    /// First sequence number.
    #[must_use]
    pub const fn start(&self) -> u32 {
        *self.range.start()
    }

    /// Last sequence number.
    #[must_use]
    pub const fn end(&self) -> u32 {
        *self.range.end()
    }

    /// Number of messages in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.range.clone().count()
    }

    /// Returns true if the batch covers no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Iterates the sequence numbers in the batch.
    #[must_use]
    pub fn iter(&self) -> RangeInclusive<u32> {
        self.range.clone()
    }
}

impl std::fmt::Display for ResultBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start(), self.end())
    }
}

/// Lazy iterator of [`ResultBatch`]es.
///
/// Only the remaining ranges are stored; a batch exists once `next` hands
/// it out.
#[derive(Debug, Clone)]
pub struct Batches {
    ranges: VecDeque<RangeInclusive<u32>>,
    size: u32,
}

impl Batches {
    /// Creates batches over sorted, non-overlapping ranges.
    #[must_use]
    pub fn new(ranges: Vec<RangeInclusive<u32>>, batch_size: NonZeroUsize) -> Self {
        Self {
            ranges: ranges.into_iter().filter(|r| !r.is_empty()).collect(),
            size: u32::try_from(batch_size.get()).unwrap_or(u32::MAX),
        }
    }

    /// Creates batches for a client sequence set against a mailbox holding
    /// `exists` messages.
    #[must_use]
    pub fn for_sequence_set(set: &SequenceSet, exists: u32, batch_size: NonZeroUsize) -> Self {
        Self::new(set.resolve(exists), batch_size)
    }

    /// Creates batches from individual sequence numbers, such as the result
    /// of mapping UIDs to sequence numbers.
    #[must_use]
    pub fn for_numbers(mut numbers: Vec<u32>, batch_size: NonZeroUsize) -> Self {
        numbers.sort_unstable();
        numbers.dedup();
        let mut ranges: Vec<RangeInclusive<u32>> = Vec::new();
        for n in numbers.into_iter().filter(|&n| n > 0) {
            match ranges.last_mut() {
                Some(last) if *last.end() + 1 == n => *last = *last.start()..=n,
                _ => ranges.push(n..=n),
            }
        }
        Self::new(ranges, batch_size)
    }

    /// Number of messages not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.ranges.iter().map(|r| r.clone().count()).sum()
    }
}

impl Iterator for Batches {
    type Item = ResultBatch;

    fn next(&mut self) -> Option<ResultBatch> {
        let range = self.ranges.front_mut()?;
        let (start, end) = (*range.start(), *range.end());
        let batch_end = start.saturating_add(self.size - 1).min(end);
        if batch_end == end {
            self.ranges.pop_front();
        } else {
            *range = batch_end + 1..=end;
        }
        Some(ResultBatch::new(start..=batch_end))
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

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn bounds(batches: Batches) -> Vec<(u32, u32)> {
        batches.map(|b| (b.start(), b.end())).collect()
    }

    #[test]
    fn test_create_range_batches() {
        let set = SequenceSet::range(1, 25).unwrap();
        let batches = Batches::for_sequence_set(&set, 25, size(10));
        assert_eq!(bounds(batches), vec![(1, 10), (11, 20), (21, 25)]);
    }

    #[test]
    fn test_create_range_batches_exact() {
        let set = SequenceSet::parse("1:*").unwrap();
        let batches = Batches::for_sequence_set(&set, 20, size(10));
        assert_eq!(bounds(batches), vec![(1, 10), (11, 20)]);
    }

    #[test]
    fn test_create_range_batches_empty() {
        let set = SequenceSet::parse("1:*").unwrap();
        let mut batches = Batches::for_sequence_set(&set, 0, size(10));
        assert_eq!(batches.remaining(), 0);
        assert!(batches.next().is_none());
    }

    #[test]
    fn batches_never_span_a_gap() {
        let set = SequenceSet::parse("1:3,10:12").unwrap();
        let batches = Batches::for_sequence_set(&set, 20, size(100));
        assert_eq!(bounds(batches), vec![(1, 3), (10, 12)]);
    }

    #[test]
    fn numbers_are_grouped_into_runs() {
        let batches = Batches::for_numbers(vec![7, 2, 3, 4, 9, 3], size(2));
        assert_eq!(batches.remaining(), 5);
        assert_eq!(bounds(batches), vec![(2, 3), (4, 4), (7, 7), (9, 9)]);
    }

    #[test]
    fn five_hundred_in_hundreds() {
        let set = SequenceSet::range(1, 500).unwrap();
        let batches: Vec<_> = Batches::for_sequence_set(&set, 500, size(100)).collect();
        assert_eq!(batches.len(), 5);
        assert!(batches.iter().all(|b| b.len() == 100));
        assert_eq!(batches[4].to_string(), "401:500");
    }
}
