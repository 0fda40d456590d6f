use std::fmt;
use std::sync::Arc;

use crate::pool::Slab;

/// Reference-counted byte window handed between blocks.
///
/// Clones share one backing slab; `offset`/`length` describe this holder's
/// live window `[offset, offset + length)`. Reads are available to every
/// holder. Writes go through `Arc::get_mut`, so they require the sole
/// strong reference, which the engine guarantees by only writing into
/// buffers it has popped out of a queue and not yet published.
#[derive(Clone)]
pub struct SBuffer {
    slab: Arc<Slab>,
    pub offset: usize,
    pub length: usize,
}

impl SBuffer {
    pub(crate) fn from_slab(slab: Arc<Slab>) -> Self {
        let length = slab.len();
        Self {
            slab,
            offset: 0,
            length,
        }
    }

    /// True iff this holder is the sole reference to the backing slab.
    pub fn unique(&self) -> bool {
        Arc::strong_count(&self.slab) == 1
    }

    /// Full size of the backing slab, independent of the current window.
    pub fn actual_length(&self) -> usize {
        self.slab.len()
    }

    /// Bytes of the slab past the end of the current window.
    pub fn tail_capacity(&self) -> usize {
        self.actual_length() - (self.offset + self.length)
    }

    /// The live window.
    pub fn bytes(&self) -> &[u8] {
        &self.slab.bytes()[self.offset..self.offset + self.length]
    }

    /// Mutable view of the live window.
    ///
    /// # Panics
    ///
    /// Panics unless this is the sole reference to the slab.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let start = self.offset;
        let end = self.offset + self.length;
        let slab = Arc::get_mut(&mut self.slab)
            .expect("mutable buffer access requires the sole reference");
        &mut slab.bytes_mut()[start..end]
    }

    /// Append `src` directly after the current window, growing `length`.
    ///
    /// # Panics
    ///
    /// Panics unless this is the sole reference, or if `src` exceeds
    /// [`tail_capacity`](Self::tail_capacity).
    pub fn extend_from(&mut self, src: &[u8]) {
        assert!(src.len() <= self.tail_capacity(), "buffer tail overflow");
        let start = self.offset + self.length;
        let slab = Arc::get_mut(&mut self.slab)
            .expect("mutable buffer access requires the sole reference");
        slab.bytes_mut()[start..start + src.len()].copy_from_slice(src);
        self.length += src.len();
    }

    /// Overwrite the window with `byte`.
    pub fn fill(&mut self, byte: u8) {
        self.bytes_mut().fill(byte);
    }

    /// Reset the window to `[0, src.len())` and copy `src` into it.
    ///
    /// # Panics
    ///
    /// Panics unless this is the sole reference, or if `src` exceeds the
    /// slab.
    pub fn fill_from(&mut self, src: &[u8]) {
        assert!(src.len() <= self.actual_length(), "buffer overflow");
        self.offset = 0;
        self.length = src.len();
        self.bytes_mut().copy_from_slice(src);
    }
}

impl fmt::Debug for SBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SBuffer")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("actual_length", &self.actual_length())
            .field("unique", &self.unique())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::BufferShelf;

    #[test]
    fn unique_tracks_clones() {
        let shelf = BufferShelf::new(16);
        let buffer = shelf.acquire();
        assert!(buffer.unique());

        let window = buffer.clone();
        assert!(!buffer.unique());
        assert!(!window.unique());

        drop(window);
        assert!(buffer.unique());
    }

    #[test]
    fn window_math() {
        let shelf = BufferShelf::new(32);
        let mut buffer = shelf.acquire();
        buffer.offset = 4;
        buffer.length = 8;
        assert_eq!(buffer.bytes().len(), 8);
        assert_eq!(buffer.tail_capacity(), 20);
    }

    #[test]
    fn extend_appends_past_the_window() {
        let shelf = BufferShelf::new(16);
        let mut buffer = shelf.acquire();
        buffer.length = 0;
        buffer.fill_from(&[1, 2, 3]);
        buffer.extend_from(&[4, 5]);
        assert_eq!(buffer.bytes(), &[1, 2, 3, 4, 5]);
        assert_eq!(buffer.length, 5);
    }

    #[test]
    #[should_panic(expected = "sole reference")]
    fn shared_windows_refuse_writes() {
        let shelf = BufferShelf::new(16);
        let mut buffer = shelf.acquire();
        let _window = buffer.clone();
        buffer.bytes_mut()[0] = 1;
    }

    #[test]
    fn clones_read_the_same_bytes() {
        let shelf = BufferShelf::new(16);
        let mut buffer = shelf.acquire();
        buffer.fill_from(&[9, 8, 7]);

        let mut window = buffer.clone();
        window.offset = 1;
        window.length = 2;
        assert_eq!(window.bytes(), &[8, 7]);
    }
}
