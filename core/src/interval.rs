//! Interval-indexed lookup for validity windows.
//!
//! Registry rows and ownership links are valid over `[start, end]` date
//! windows. Rather than expanding every row across every grid quarter and
//! filtering, rows are sorted by start date and each quarter is answered by
//! a binary search over the starts plus an end-date check.

use chrono::NaiveDate;

#[derive(Debug, Clone)]
struct Entry<T> {
    start: NaiveDate,
    end: NaiveDate,
    seq: usize,
    value: T,
}

#[derive(Debug, Clone)]
pub struct IntervalIndex<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for IntervalIndex<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> IntervalIndex<T> {
    /// Build from `(start, end, value)` triples. Insertion order is kept as
    /// the tie-break order for [`IntervalIndex::containing`].
    pub fn build(items: impl IntoIterator<Item = (NaiveDate, NaiveDate, T)>) -> Self {
        let mut entries: Vec<Entry<T>> = items
            .into_iter()
            .enumerate()
            .map(|(seq, (start, end, value))| Entry { start, end, seq, value })
            .collect();
        entries.sort_by_key(|e| (e.start, e.seq));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every value whose window contains `date`, in insertion order.
    pub fn containing(&self, date: NaiveDate) -> Vec<&T> {
        let started = self.entries.partition_point(|e| e.start <= date);
        let mut hits: Vec<&Entry<T>> = self.entries[..started]
            .iter()
            .filter(|e| e.end >= date)
            .collect();
        hits.sort_by_key(|e| e.seq);
        hits.into_iter().map(|e| &e.value).collect()
    }

    /// Every value regardless of window, in insertion order.
    pub fn all(&self) -> Vec<&T> {
        let mut all: Vec<&Entry<T>> = self.entries.iter().collect();
        all.sort_by_key(|e| e.seq);
        all.into_iter().map(|e| &e.value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn containing_respects_both_bounds() {
        let idx = IntervalIndex::build(vec![
            (d(2015, 1, 1), d(2019, 12, 31), "old"),
            (d(2020, 1, 1), d(9999, 12, 31), "new"),
        ]);
        assert_eq!(idx.containing(d(2016, 3, 31)), vec![&"old"]);
        assert_eq!(idx.containing(d(2021, 6, 30)), vec![&"new"]);
        assert!(idx.containing(d(2014, 12, 31)).is_empty());
    }

    #[test]
    fn overlapping_hits_keep_insertion_order() {
        let idx = IntervalIndex::build(vec![
            (d(2018, 1, 1), d(2022, 12, 31), "second-start"),
            (d(2010, 1, 1), d(2022, 12, 31), "first-start"),
        ]);
        assert_eq!(
            idx.containing(d(2020, 3, 31)),
            vec![&"second-start", &"first-start"]
        );
    }
}
