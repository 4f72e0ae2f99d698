/// Sparse mapping from batch number to the key of that batch's first row.
///
/// Slots are filled lazily as batches are probed or loaded; a `None` slot is
/// unknown. Slot 0 always exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchIndex {
    first_keys: Vec<Option<i64>>,
}

impl Default for BatchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchIndex {
    pub fn new() -> Self {
        Self {
            first_keys: vec![None],
        }
    }

    /// Number of slots, known or not. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.first_keys.len()
    }

    pub fn get(&self, batch: usize) -> Option<i64> {
        self.first_keys.get(batch).copied().flatten()
    }

    pub fn is_known(&self, batch: usize) -> bool {
        self.get(batch).is_some()
    }

    /// Records the first key of `batch`, growing the index with unknown slots.
    pub fn set(&mut self, batch: usize, key: i64) {
        if batch >= self.first_keys.len() {
            self.first_keys.resize(batch + 1, None);
        }
        self.first_keys[batch] = Some(key);
    }

    pub fn invalidate(&mut self, batch: usize) {
        if let Some(slot) = self.first_keys.get_mut(batch) {
            *slot = None;
        }
    }

    pub fn clear(&mut self) {
        self.first_keys.clear();
        self.first_keys.push(None);
    }

    /// Closest batch below `batch` whose key is known, with that key.
    ///
    /// Falls back to `(0, None)` when nothing below is known, in which case a
    /// probe has to count rows from the start of the table.
    pub fn nearest_known_below(&self, batch: usize) -> (usize, Option<i64>) {
        let mut lower = batch.saturating_sub(1);
        while lower > 0 {
            if let Some(key) = self.get(lower) {
                return (lower, Some(key));
            }
            lower -= 1;
        }
        (0, self.get(0))
    }

    pub fn known_batches(&self) -> usize {
        self.first_keys.iter().filter(|k| k.is_some()).count()
    }
}
