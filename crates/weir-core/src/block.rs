use thiserror::Error;

use crate::tag::Tag;

/// Contract violation inside or around a work invocation.
///
/// Faults are fatal to the block, never to the graph: the engine marks the
/// block done, releases its resources, and lets the neighbors react to the
/// token drop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkFault {
    #[error("input {port}: produce-driven work without fixed rate never set consume")]
    UnsetConsume { port: usize },
    #[error("output {port}: produced {items} items into a buffer holding {capacity}")]
    Overproduced {
        port: usize,
        items: u64,
        capacity: u64,
    },
    #[error("input {port}: consumed {bytes} bytes with only {available} available")]
    Overconsumed {
        port: usize,
        bytes: u64,
        available: u64,
    },
    #[error("work failed: {0}")]
    Failed(String),
}

/// What one work invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Uniform production: this many items were written to every output port.
    Items(usize),
    /// Per-port production was declared through [`WorkIo::produce`].
    CalledProduce,
    /// The block is finished; the engine terminates it.
    Done,
    /// The block hit an unrecoverable condition; the engine terminates it.
    Fatal(WorkFault),
}

/// A signal-processing block.
///
/// The engine drives `work` whenever every input port has a full reserve of
/// bytes and every output port has a buffer to fill. Blocks read and write
/// through [`WorkIo`] and report what happened via [`WorkOutcome`].
pub trait Block: Send {
    fn name(&self) -> &str;

    fn work(&mut self, io: &mut WorkIo<'_>) -> WorkOutcome;
}

/// One input port's view for a single work invocation.
pub struct InputSpan<'a> {
    bytes: &'a [u8],
    items: usize,
}

impl<'a> InputSpan<'a> {
    pub fn new(bytes: &'a [u8], items: usize) -> Self {
        Self { bytes, items }
    }

    /// Readable bytes. On history-bearing ports this extends one history
    /// span past the last consumable item, so taps may read ahead.
    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Whole items available to consume.
    pub fn items(&self) -> usize {
        self.items
    }
}

/// One output port's writable region for a single work invocation.
pub struct OutputSpan<'a> {
    bytes: &'a mut [u8],
    items: usize,
}

impl<'a> OutputSpan<'a> {
    pub fn new(bytes: &'a mut [u8], items: usize) -> Self {
        Self { bytes, items }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// Whole items this buffer can hold.
    pub fn items(&self) -> usize {
        self.items
    }
}

/// Everything a work invocation may touch.
///
/// Spans expose the port buffers; `consume`/`produce` are per-invocation
/// mailboxes the engine reads back for accounting; tags flow in (sorted by
/// offset) and out (flushed downstream after the output buffers are
/// published).
pub struct WorkIo<'io> {
    inputs: &'io [InputSpan<'io>],
    outputs: &'io mut [OutputSpan<'io>],
    consume_items: &'io mut [u64],
    consume_written: &'io mut [bool],
    produce_items: &'io mut [u64],
    input_tags: &'io [Vec<Tag>],
    output_tags: &'io mut [Vec<Tag>],
}

impl<'io> WorkIo<'io> {
    /// Assembled by the engine once per invocation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inputs: &'io [InputSpan<'io>],
        outputs: &'io mut [OutputSpan<'io>],
        consume_items: &'io mut [u64],
        consume_written: &'io mut [bool],
        produce_items: &'io mut [u64],
        input_tags: &'io [Vec<Tag>],
        output_tags: &'io mut [Vec<Tag>],
    ) -> Self {
        Self {
            inputs,
            outputs,
            consume_items,
            consume_written,
            produce_items,
            input_tags,
            output_tags,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, port: usize) -> &InputSpan<'io> {
        &self.inputs[port]
    }

    pub fn output(&mut self, port: usize) -> &mut OutputSpan<'io> {
        &mut self.outputs[port]
    }

    /// Both span sides at once, for blocks that copy input into output.
    pub fn spans(&mut self) -> (&[InputSpan<'io>], &mut [OutputSpan<'io>]) {
        (self.inputs, &mut *self.outputs)
    }

    /// Declare items read from an input port.
    ///
    /// Accumulates across calls within one invocation. Blocks without fixed
    /// rate must call this on every invocation that consumes; the mailbox
    /// resets to zero afterwards.
    pub fn consume(&mut self, port: usize, items: u64) {
        self.consume_items[port] += items;
        self.consume_written[port] = true;
    }

    /// [`consume`](Self::consume) the same count on every input port.
    pub fn consume_each(&mut self, items: u64) {
        for port in 0..self.consume_items.len() {
            self.consume(port, items);
        }
    }

    /// Declare items written to an output port, for
    /// [`WorkOutcome::CalledProduce`] invocations.
    pub fn produce(&mut self, port: usize, items: u64) {
        self.produce_items[port] += items;
    }

    /// Input tags not yet passed by consumption, sorted by offset.
    pub fn tags(&self, port: usize) -> &[Tag] {
        &self.input_tags[port]
    }

    /// Queue a tag for downstream, flushed after this invocation's output
    /// buffers are published.
    pub fn post_tag(&mut self, port: usize, tag: Tag) {
        self.output_tags[port].push(tag);
    }
}

/// Legacy driver signature: every span up front, explicit consumed counts.
///
/// `consumed[i]` starts at zero each invocation; set it to the items read
/// from input `i`.
pub trait GeneralWork: Send {
    fn name(&self) -> &str;

    fn general_work(
        &mut self,
        noutput_items: usize,
        ninput_items: &[usize],
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
        consumed: &mut [u64],
    ) -> WorkOutcome;
}

/// Adapter presenting a [`GeneralWork`] implementation as a [`Block`].
pub struct GeneralWorkBlock<G> {
    inner: G,
}

impl<G: GeneralWork> GeneralWorkBlock<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }
}

impl<G: GeneralWork> Block for GeneralWorkBlock<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> WorkOutcome {
        let noutput_items = io.outputs.iter().map(OutputSpan::items).min().unwrap_or(0);
        let ninput_items: Vec<usize> = io.inputs.iter().map(InputSpan::items).collect();
        let inputs: Vec<&[u8]> = io.inputs.iter().map(InputSpan::bytes).collect();
        let mut outputs: Vec<&mut [u8]> = io
            .outputs
            .iter_mut()
            .map(|span| &mut *span.bytes)
            .collect();

        let mut consumed = vec![0u64; ninput_items.len()];
        let outcome = self.inner.general_work(
            noutput_items,
            &ninput_items,
            &inputs,
            &mut outputs,
            &mut consumed,
        );

        for (port, items) in consumed.into_iter().enumerate() {
            if items > 0 {
                io.consume(port, items);
            }
        }
        outcome
    }
}
