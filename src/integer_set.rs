//! Ordered set of integer-like values.
//!
//! Backed by a sorted vector, which keeps membership, rank and iteration
//! cheap for the key sets the channel layer tracks.

/// Sorted, duplicate-free collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerSet<T> {
    values: Vec<T>,
}

impl<T> Default for IntegerSet<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T: Copy + Ord> IntegerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert values, returning how many were not already present.
    pub fn insert(&mut self, values: impl IntoIterator<Item = T>) -> usize {
        let mut added = 0;
        for v in values {
            if let Err(pos) = self.values.binary_search(&v) {
                self.values.insert(pos, v);
                added += 1;
            }
        }
        added
    }

    /// Remove values, returning how many were present.
    pub fn remove(&mut self, values: impl IntoIterator<Item = T>) -> usize {
        let mut removed = 0;
        for v in values {
            if let Ok(pos) = self.values.binary_search(&v) {
                self.values.remove(pos);
                removed += 1;
            }
        }
        removed
    }

    pub fn contains(&self, value: T) -> bool {
        self.values.binary_search(&value).is_ok()
    }

    /// Number of members strictly less than `value`.
    pub fn count_less_than(&self, value: T) -> usize {
        self.values.partition_point(|v| *v < value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.values.iter().copied()
    }
}

impl<T: Copy + Ord> FromIterator<T> for IntegerSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut values: Vec<T> = iter.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        Self { values }
    }
}
