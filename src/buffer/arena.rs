use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};

/// A confined allocation context.
///
/// An `Arena` owns every region it hands out and releases all of them in one
/// bulk operation when it is dropped. There is no per-allocation free: the
/// arena trades reclaim granularity for zero bookkeeping on the hot path,
/// which fits regions whose lifetimes all end together (a connection's write
/// buffers, a handshake's scratch memory).
///
/// An arena is owned by exactly one buffer or connection and is not
/// thread-safe; it moves with its owner instead of being shared.
pub struct Arena {
    chunks: Vec<(*mut u8, Layout)>,
}

// Safety: the arena is never aliased; it is moved between threads together
// with the single buffer that owns it.
unsafe impl Send for Arena {}

impl Arena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Allocates a zeroed region of `len` bytes owned by this arena.
    ///
    /// The returned pointer stays valid until the arena is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or overflows the addressable size.
    pub fn alloc(&mut self, len: usize) -> *mut u8 {
        assert!(len > 0, "arena allocation must be non-empty");

        let layout = Layout::array::<u8>(len).expect("memory size overflow");
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            handle_alloc_error(layout);
        }

        self.chunks.push((ptr, layout));
        ptr
    }

    /// Number of live allocations held by the arena.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    /// Releases every region the arena handed out.
    fn drop(&mut self) {
        for (ptr, layout) in self.chunks.drain(..) {
            unsafe { dealloc(ptr, layout) };
        }
    }
}
