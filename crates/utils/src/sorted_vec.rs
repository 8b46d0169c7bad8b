/// A vector that is always sorted.
///
/// Items comparing equal keep their insertion order.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SortedVec<T: Ord> {
    items: Vec<T>,
}

impl<T: Ord> SortedVec<T> {
    pub fn new() -> SortedVec<T> {
        SortedVec { items: Vec::new() }
    }

    /// Insert an item after all items that compare less or equal to it.
    /// Returns the index it was placed at.
    pub fn insert(&mut self, item: T) -> usize {
        let pos = self.items.partition_point(|it| it <= &item);
        self.items.insert(pos, item);
        pos
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Ord> From<Vec<T>> for SortedVec<T> {
    fn from(mut items: Vec<T>) -> Self {
        // Stable so equal items stay in the order they were given
        items.sort();
        SortedVec { items }
    }
}
