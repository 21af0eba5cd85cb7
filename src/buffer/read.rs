use super::{INT_SIZE, LONG_SIZE, NUT, SHORT_SIZE};

/// A read-only cursor over a borrowed byte region.
///
/// The cursor advances monotonically and every read is bounds-checked
/// *before* the cursor moves; a read whose end would pass the region size
/// panics, since it indicates a caller defect rather than a transient
/// condition. The underlying region is never mutated.
///
/// Multi-byte integers are read in native byte order, matching
/// [`WriteBuffer`](super::WriteBuffer).
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    read_index: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            read_index: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn read_index(&self) -> usize {
        self.read_index
    }

    /// Repositions the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `index >= size`.
    pub fn set_read_index(&mut self, index: usize) {
        assert!(index < self.data.len(), "read index out of bound");
        self.read_index = index;
    }

    /// The unread tail of the region.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.read_index..]
    }

    fn take(&mut self, count: usize) -> &'a [u8] {
        let next = self.read_index + count;
        assert!(next <= self.data.len(), "read index overflow");
        let slice = &self.data[self.read_index..next];
        self.read_index = next;
        slice
    }

    pub fn read_byte(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub fn read_short(&mut self) -> i16 {
        i16::from_ne_bytes(self.take(SHORT_SIZE).try_into().unwrap())
    }

    pub fn read_int(&mut self) -> i32 {
        i32::from_ne_bytes(self.take(INT_SIZE).try_into().unwrap())
    }

    pub fn read_long(&mut self) -> i64 {
        i64::from_ne_bytes(self.take(LONG_SIZE).try_into().unwrap())
    }

    /// Reads `count` bytes as a sub-slice of the region.
    pub fn read_bytes(&mut self, count: usize) -> &'a [u8] {
        self.take(count)
    }

    /// Scans forward for the first occurrence of `separators` and returns
    /// the bytes strictly before it (empty if the separator is adjacent),
    /// advancing the cursor past the separator.
    ///
    /// Returns `None` without moving the cursor when the separator sequence
    /// is absent, letting the caller wait for more input. This models
    /// C-style terminated framing without reading delimiter bytes eagerly.
    pub fn read_until(&mut self, separators: &[u8]) -> Option<&'a [u8]> {
        if separators.is_empty() || separators.len() > self.data.len() {
            return None;
        }
        for cur in self.read_index..=self.data.len() - separators.len() {
            if &self.data[cur..cur + separators.len()] == separators {
                let result = &self.data[self.read_index..cur];
                self.read_index = cur + separators.len();
                return Some(result);
            }
        }
        None
    }

    /// Reads a `\0`-terminated string, decoded as UTF-8.
    ///
    /// Returns `None` when no terminator is present (cursor unmoved) or when
    /// the terminated run is empty or not valid UTF-8.
    pub fn read_c_str(&mut self) -> Option<&'a str> {
        let bytes = self.read_until(&[NUT])?;
        if bytes.is_empty() {
            return None;
        }
        std::str::from_utf8(bytes).ok()
    }
}
