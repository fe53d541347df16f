const NONE: usize = usize::MAX;

enum Entry<T> {
    Vacant { next: usize },
    Occupied(T),
}

/// Growable slab with a LIFO free list.
///
/// Owns every live task element; the slot ring and the key index only
/// ever hold the `usize` ids handed out by [`Slab::insert`].
pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    free_head: usize,
    len: usize,
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: NONE,
            len: 0,
        }
    }

    /// Insert a value. Returns the id.
    pub fn insert(&mut self, value: T) -> usize {
        self.len += 1;

        if self.free_head == NONE {
            self.entries.push(Entry::Occupied(value));
            return self.entries.len() - 1;
        }

        let id = self.free_head;
        let entry = &mut self.entries[id];
        let Entry::Vacant { next } = *entry else {
            unreachable!("free list points at occupied entry {id}");
        };

        self.free_head = next;
        *entry = Entry::Occupied(value);
        id
    }

    /// Remove by id. Returns `None` if the id is vacant or out of range.
    pub fn remove(&mut self, id: usize) -> Option<T> {
        let entry = self.entries.get_mut(id)?;
        if !matches!(entry, Entry::Occupied(_)) {
            return None;
        }

        let old = std::mem::replace(
            entry,
            Entry::Vacant {
                next: self.free_head,
            },
        );
        self.free_head = id;
        self.len -= 1;

        match old {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: usize) -> Option<&T> {
        match self.entries.get(id)? {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        match self.entries.get_mut(id)? {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: usize) -> bool {
        self.get(id).is_some()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of entries ever allocated, vacant ones included.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}
