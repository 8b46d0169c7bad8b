use std::{
    cmp::{max, min},
    collections::{btree_map::Iter, BTreeMap},
    ops::Range,
};

/// Set of disjoint half open ranges. Overlapping and touching ranges are
/// merged when added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet<T: Ord + Copy> {
    ranges: BTreeMap<T, T>,
}

impl<T: Ord + Copy> RangeSet<T> {
    pub fn new() -> RangeSet<T> {
        RangeSet {
            ranges: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, range: Range<T>) {
        use std::ops::Bound::*;

        if range.start >= range.end {
            return;
        }

        let Range { mut start, mut end } = range;
        let mut lower = self.ranges.range((Unbounded, Excluded(start)));
        if let Some((s, e)) = lower.next_back() {
            if start <= *e {
                start = min(*s, start);
                end = max(end, *e);
            }
        }

        let mut remove = vec![];
        let higher = self.ranges.range((Included(start), Unbounded));
        for (s, e) in higher {
            if *s <= end {
                start = min(*s, start);
                end = max(end, *e);
                remove.push(*s);
            } else {
                break;
            }
        }

        for rem in remove {
            self.ranges.remove(&rem);
        }

        self.ranges.insert(start, end);
    }

    /// Remove a range, splitting any range that only partially overlaps it.
    pub fn remove(&mut self, range: Range<T>) {
        use std::ops::Bound::*;

        if range.start >= range.end {
            return;
        }

        let mut affected = vec![];
        if let Some((s, e)) = self.ranges.range((Unbounded, Excluded(range.start))).next_back() {
            if *e > range.start {
                affected.push((*s, *e));
            }
        }
        for (s, e) in self.ranges.range((Included(range.start), Excluded(range.end))) {
            affected.push((*s, *e));
        }

        for (s, e) in affected {
            self.ranges.remove(&s);
            if s < range.start {
                self.ranges.insert(s, range.start);
            }
            if range.end < e {
                self.ranges.insert(range.end, e);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> RangeSetIter<'_, T> {
        let iter = self.ranges.iter();
        RangeSetIter { iter }
    }
}

impl<T: Ord + Copy> Default for RangeSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Copy> FromIterator<Range<T>> for RangeSet<T> {
    fn from_iter<I: IntoIterator<Item = Range<T>>>(iter: I) -> Self {
        let mut set = RangeSet::new();
        for range in iter {
            set.add(range);
        }
        set
    }
}

#[derive(Debug)]
pub struct RangeSetIter<'a, T: Ord + Copy> {
    iter: Iter<'a, T, T>,
}

impl<'a, T: Ord + Copy> Iterator for RangeSetIter<'a, T> {
    type Item = Range<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let (s, e) = self.iter.next()?;
        Some(*s..*e)
    }
}

impl<'a, T: Ord + Copy> DoubleEndedIterator for RangeSetIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let (s, e) = self.iter.next_back()?;
        Some(*s..*e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn one(r: &RangeSet<usize>) -> Range<usize> {
        assert!(r.ranges.len() == 1, "Found too many ranges");
        let item = r.iter().next();

        item.expect("No first item found")
    }

    #[test]
    fn basic() {
        let mut ranges = RangeSet::default();
        ranges.add(10..30);
        assert_eq!(10..30, one(&ranges));
        ranges.add(12..20);
        assert_eq!(10..30, one(&ranges));
        ranges.add(5..10);
        assert_eq!(5..30, one(&ranges));
        ranges.add(30..33);
        assert_eq!(5..33, one(&ranges));
        ranges.add(1..40);
        assert_eq!(1..40, one(&ranges));
    }

    #[test]
    fn empty_ranges_are_ignored() {
        let mut ranges = RangeSet::default();
        ranges.add(3..3);
        assert!(ranges.is_empty());
    }

    #[test]
    fn remove_splits() {
        let mut ranges: RangeSet<usize> = [0..10, 20..30].into_iter().collect();
        ranges.remove(5..25);

        let all: Vec<Range<usize>> = ranges.iter().collect();
        assert_eq!(vec![0..5, 25..30], all);
    }

    #[test]
    fn remove_whole() {
        let mut ranges: RangeSet<usize> = [2..4, 6..8].into_iter().collect();
        ranges.remove(0..10);
        assert!(ranges.is_empty());
    }
}
