use std::collections::VecDeque;

use weir_core::{BufferShelf, SBuffer};

use crate::config::QueueConfig;
use crate::error::EngineError;

const AUX_SLABS_PER_PORT: usize = 2;

/// Pending upstream buffers for the input ports of one block.
///
/// Each port presents work with a contiguous front window of at least
/// `history_bytes + multiple_bytes` bytes whose consumable tail is a whole
/// number of multiples, merging fragmented deliveries in place when the
/// front is exclusively owned and through a bounded staging slab otherwise.
pub struct InputBufferQueues {
    ports: Vec<PortQueue>,
}

struct PortQueue {
    deque: VecDeque<SBuffer>,
    enqueued_bytes: usize,
    history_bytes: usize,
    multiple_bytes: usize,
    reserve_bytes: usize,
    aux: Option<BufferShelf>,
    in_hist_buff: bool,
    ready: bool,
}

impl PortQueue {
    fn new() -> Self {
        Self {
            deque: VecDeque::new(),
            enqueued_bytes: 0,
            history_bytes: 0,
            multiple_bytes: 0,
            reserve_bytes: 0,
            aux: None,
            in_hist_buff: false,
            ready: false,
        }
    }

    fn aux(&self) -> &BufferShelf {
        self.aux.as_ref().expect("input queue used before init")
    }

    fn update_ready(&mut self) {
        self.ready = self.enqueued_bytes >= self.reserve_bytes;
    }

    /// Restore the front-window invariant by merging deque entries until the
    /// front holds at least `reserve_bytes`.
    ///
    /// Byte content is conserved: the merge only migrates bytes between the
    /// destination and the entries behind it.
    fn prepare(&mut self) {
        debug_assert!(
            self.deque.front().is_some_and(|f| f.length >= self.history_bytes),
            "front must retain the history prefix"
        );

        while self.deque.front().expect("prepare on an empty queue").length < self.reserve_bytes
        {
            // Reuse the front in place when it is exclusively ours and its
            // slab tail can still grow to the full reserve.
            let reusable = {
                let front = self.deque.front().expect("checked above");
                front.unique() && front.actual_length() - front.offset >= self.reserve_bytes
            };

            let mut dst = if reusable {
                self.deque.pop_front().expect("checked above")
            } else {
                let mut staged = self.aux().acquire();
                staged.offset = 0;
                staged.length = 0;
                staged
            };

            let mut src = self
                .deque
                .pop_front()
                .expect("ready queue holds more bytes behind a short front");
            let bytes = dst.tail_capacity().min(src.length);
            dst.extend_from(&src.bytes()[..bytes]);
            src.offset += bytes;
            src.length -= bytes;

            if src.length > 0 {
                self.deque.push_front(src);
            }
            self.deque.push_front(dst);
        }
    }
}

impl InputBufferQueues {
    pub fn new() -> Self {
        Self { ports: Vec::new() }
    }

    /// Number of input ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Grow or shrink to `size` ports; new ports start zeroed and unready.
    pub fn resize(&mut self, size: usize) {
        self.ports.resize_with(size, PortQueue::new);
    }

    /// Fix each port's sizing constants, allocate its staging slabs, and
    /// seed zeroed history where required.
    pub fn init(
        &mut self,
        history_items: &[usize],
        multiple_items: &[usize],
        item_sizes: &[usize],
        config: &QueueConfig,
    ) -> Result<(), EngineError> {
        let expected = self.ports.len();
        for (what, got) in [
            ("input_history_items", history_items.len()),
            ("input_multiple_items", multiple_items.len()),
            ("input_item_sizes", item_sizes.len()),
        ] {
            if got != expected {
                return Err(EngineError::PortVectorMismatch {
                    what,
                    got,
                    expected,
                });
            }
        }

        for port in 0..expected {
            let history_bytes = item_sizes[port] * history_items[port];
            let multiple_bytes = (item_sizes[port] * multiple_items[port]).max(1);
            // Least multiple of the multiple that covers history plus one
            // whole work granule.
            let reserve_bytes =
                (history_bytes + multiple_bytes).div_ceil(multiple_bytes) * multiple_bytes;
            if reserve_bytes > config.aux_buffer_bytes {
                return Err(EngineError::AuxTooSmall {
                    port,
                    aux_bytes: config.aux_buffer_bytes,
                    reserve_bytes,
                });
            }

            let aux =
                BufferShelf::with_preallocated(config.aux_buffer_bytes, AUX_SLABS_PER_PORT);

            let state = &mut self.ports[port];
            state.history_bytes = history_bytes;
            state.multiple_bytes = multiple_bytes;
            state.reserve_bytes = reserve_bytes;

            // Seed the history prefix so the very first front already spans
            // `history` items of silence.
            if history_bytes != 0 && state.enqueued_bytes < history_bytes {
                let mut seed = aux.acquire();
                seed.offset = 0;
                seed.length = history_bytes;
                seed.fill(0);
                state.aux = Some(aux);
                self.push(port, seed);
            } else {
                state.aux = Some(aux);
            }
        }
        Ok(())
    }

    pub fn push(&mut self, port: usize, buffer: SBuffer) {
        let state = &mut self.ports[port];
        state.enqueued_bytes += buffer.length;
        state.deque.push_back(buffer);
        state.update_ready();
    }

    /// The front window for one work invocation, plus the in-place hint.
    ///
    /// The returned view shares the front's slab with `length` shortened by
    /// the history prefix and rounded down to a whole number of multiples.
    /// The hint is true when the caller could write output straight back
    /// into this memory: the front is exclusively owned, carries no history,
    /// and the view covers it exactly. Nothing downstream consumes the hint
    /// yet.
    pub fn front(&mut self, port: usize) -> (SBuffer, bool) {
        let state = &mut self.ports[port];
        debug_assert!(state.ready, "front on an unready port");
        state.prepare();

        let front = state.deque.front().expect("prepared queue has a front");
        debug_assert!(front.length >= state.history_bytes);
        let unique = front.unique();

        let mut view = front.clone();
        view.length -= state.history_bytes;
        view.length -= view.length % state.multiple_bytes;
        let potential_inline =
            unique && state.history_bytes == 0 && view.length == front.length;
        (view, potential_inline)
    }

    /// Advance the front window past `bytes` consumed by work.
    ///
    /// Returns whether downstream output flushing is safe, which is always
    /// true while the staging-front flag stays vestigial.
    pub fn consume(&mut self, port: usize, bytes: usize) -> bool {
        let state = &mut self.ports[port];
        {
            let front = state.deque.front_mut().expect("consume on an empty queue");
            debug_assert!(front.length >= bytes, "consume past the front window");
            front.offset += bytes;
            front.length -= bytes;
            if front.length == 0 && state.history_bytes == 0 {
                state.deque.pop_front();
            }
        }

        debug_assert!(state.enqueued_bytes >= bytes);
        state.enqueued_bytes -= bytes;
        state.update_ready();
        !state.in_hist_buff
    }

    /// Drop all pending input on one port. Sizing constants survive.
    pub fn flush(&mut self, port: usize) {
        let state = &mut self.ports[port];
        state.deque.clear();
        state.enqueued_bytes = 0;
        state.update_ready();
    }

    pub fn flush_all(&mut self) {
        for port in 0..self.ports.len() {
            self.flush(port);
        }
    }

    pub fn ready(&self, port: usize) -> bool {
        self.ports[port].ready
    }

    pub fn all_ready(&self) -> bool {
        self.ports.iter().all(|state| state.ready)
    }

    pub fn enqueued_bytes(&self, port: usize) -> usize {
        self.ports[port].enqueued_bytes
    }

    pub fn history_bytes(&self, port: usize) -> usize {
        self.ports[port].history_bytes
    }

    pub fn multiple_bytes(&self, port: usize) -> usize {
        self.ports[port].multiple_bytes
    }

    pub fn reserve_bytes(&self, port: usize) -> usize {
        self.ports[port].reserve_bytes
    }

    /// Concatenated live bytes across the port's deque, oldest first.
    #[cfg(test)]
    pub(crate) fn buffered_bytes(&self, port: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for buffer in &self.ports[port].deque {
            bytes.extend_from_slice(buffer.bytes());
        }
        bytes
    }
}

impl Default for InputBufferQueues {
    fn default() -> Self {
        Self::new()
    }
}
