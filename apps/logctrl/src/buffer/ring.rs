/// Fixed-capacity store of lines that keeps the most recent entries.
///
/// Entries are stored in a rotating slot vector: `start` points at the oldest
/// retained entry and `len` entries follow it (wrapping at `capacity`).
#[derive(Clone, Debug)]
pub struct RingBuffer {
    slots: Vec<String>,
    capacity: usize,
    start: usize,
    len: usize,
}

impl RingBuffer {
    /// Creates an empty buffer. A capacity of zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            start: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `item`, evicting the oldest entry when the buffer is full.
    pub fn push(&mut self, item: impl Into<String>) {
        let item = item.into();
        if self.len < self.capacity {
            let index = (self.start + self.len) % self.capacity;
            if index == self.slots.len() {
                self.slots.push(item);
            } else {
                self.slots[index] = item;
            }
            self.len += 1;
        } else {
            self.slots[self.start] = item;
            self.start = (self.start + 1) % self.capacity;
        }
    }

    /// Changes the capacity, keeping the newest `min(len, capacity)` entries
    /// in their original order.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.capacity {
            return;
        }
        let keep = self.len.min(capacity);
        let skip = self.len - keep;
        let mut slots = Vec::with_capacity(capacity);
        slots.extend(self.drain_ordered().skip(skip));
        self.slots = slots;
        self.capacity = capacity;
        self.start = 0;
        self.len = keep;
    }

    /// Oldest-to-newest iteration over the retained entries.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.len).map(move |offset| self.slots[(self.start + offset) % self.capacity].as_str())
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(str::to_owned).collect()
    }

    /// Joins the retained entries with `separator`; an empty buffer renders
    /// as an empty string.
    pub fn render(&self, separator: &str) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for (index, entry) in self.iter().enumerate() {
            if index > 0 {
                out.push_str(separator);
            }
            out.push_str(entry);
        }
        out
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.start = 0;
        self.len = 0;
    }

    fn drain_ordered(&mut self) -> std::vec::IntoIter<String> {
        let mut slots = std::mem::take(&mut self.slots);
        // rotate so the oldest entry sits at index 0
        if self.start < slots.len() {
            slots.rotate_left(self.start);
        }
        slots.truncate(self.len);
        slots.into_iter()
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(1)
    }
}
