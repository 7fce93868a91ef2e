//! Array-backed binary heap ordered by a caller supplied predicate.
//!
//! The root is always the element for which `is_ordered(root, other)` holds against every
//! other element, so passing `|a, b| a < b` gives a min-heap.

/// Binary heap over `T`, ordered by `F`.
#[derive(Clone)]
pub struct Heap<T, F = fn(&T, &T) -> bool>
where
    F: Fn(&T, &T) -> bool,
{
    elements: Vec<T>,
    is_ordered: F,
}

impl<T, F> Heap<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    /// Creates an empty heap with the given ordering predicate.
    pub fn new(is_ordered: F) -> Self {
        Heap {
            elements: Vec::new(),
            is_ordered,
        }
    }

    /// Creates an empty heap with room for `capacity` elements.
    pub fn with_capacity(capacity: usize, is_ordered: F) -> Self {
        Heap {
            elements: Vec::with_capacity(capacity),
            is_ordered,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns the root without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.elements.first()
    }

    /// Appends `value` and sifts it up. `O(log n)`.
    pub fn insert(&mut self, value: T) {
        self.elements.push(value);
        self.sift_up(self.elements.len() - 1);
    }

    /// Removes and returns the root.
    pub fn pop(&mut self) -> Option<T> {
        self.remove_at(0)
    }

    /// Removes the element at `index`, or returns `None` without touching the heap if
    /// `index` is out of range. `O(log n)`.
    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        if index >= self.elements.len() {
            return None;
        }

        let removed = self.elements.swap_remove(index);

        // The element moved into `index` may belong above or below it.
        if index < self.elements.len() && !self.sift_down(index) {
            self.sift_up(index);
        }

        Some(removed)
    }

    /// Drops every element.
    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Iterates the elements in storage order, not priority order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !(self.is_ordered)(&self.elements[index], &self.elements[parent]) {
                return;
            }
            self.elements.swap(index, parent);
            index = parent;
        }
    }

    /// Returns true if the element moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.elements.len();
        let mut index = start;

        loop {
            let left = 2 * index + 1;
            let right = left + 1;

            let mut first = index;
            if left < len && (self.is_ordered)(&self.elements[left], &self.elements[first]) {
                first = left;
            }
            if right < len && (self.is_ordered)(&self.elements[right], &self.elements[first]) {
                first = right;
            }
            if first == index {
                return index != start;
            }

            self.elements.swap(index, first);
            index = first;
        }
    }
}

impl<T: std::fmt::Debug, F> std::fmt::Debug for Heap<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("elements", &self.elements)
            .finish()
    }
}
