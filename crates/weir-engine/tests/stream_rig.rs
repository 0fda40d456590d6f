//! Two handlers wired through real mailboxes: a counting source feeding a
//! collecting sink, with the test driving dispatch the way an executor
//! would. Covers byte-stream integrity across buffer loans, tag delivery
//! across the edge, and the termination fan-out.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use weir_core::{Block, BufferShelf, PortMessage, SBuffer, Tag, TaskContext, WorkIo, WorkOutcome};
use weir_engine::{BlockConfig, BlockTaskHandler, QueueConfig};

enum BlockEvent {
    Input { port: usize, buffer: SBuffer },
    OutputReturn { port: usize, buffer: SBuffer },
    InputTag { port: usize, tag: Tag },
    CheckTokens,
}

/// Routes posted messages into the neighbor's mailbox, translating them to
/// the event the neighbor's dispatcher would raise.
struct ChannelContext {
    num_inputs: usize,
    num_outputs: usize,
    upstream: Vec<(Sender<BlockEvent>, usize)>,
    downstream: Vec<(Sender<BlockEvent>, usize)>,
}

impl TaskContext for ChannelContext {
    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn post_upstream(&mut self, port: usize, message: PortMessage) {
        let (tx, peer_port) = &self.upstream[port];
        let event = match message {
            PortMessage::Buffer(buffer) => BlockEvent::OutputReturn {
                port: *peer_port,
                buffer,
            },
            PortMessage::Tag(tag) => BlockEvent::InputTag {
                port: *peer_port,
                tag,
            },
            PortMessage::CheckTokens => BlockEvent::CheckTokens,
        };
        let _ = tx.send(event);
    }

    fn post_downstream(&mut self, port: usize, message: PortMessage) {
        let (tx, peer_port) = &self.downstream[port];
        let event = match message {
            PortMessage::Buffer(buffer) => BlockEvent::Input {
                port: *peer_port,
                buffer,
            },
            PortMessage::Tag(tag) => BlockEvent::InputTag {
                port: *peer_port,
                tag,
            },
            PortMessage::CheckTokens => BlockEvent::CheckTokens,
        };
        let _ = tx.send(event);
    }
}

fn dispatch(handler: &mut BlockTaskHandler, ctx: &mut ChannelContext, rx: &Receiver<BlockEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            BlockEvent::Input { port, buffer } => handler.deliver_input(port, buffer, ctx),
            BlockEvent::OutputReturn { port, buffer } => handler.return_output(port, buffer, ctx),
            BlockEvent::InputTag { port, tag } => handler.deliver_tag(port, tag, ctx),
            BlockEvent::CheckTokens => handler.check_tokens(ctx),
        }
    }
}

/// Emits a wrapping byte counter until its budget runs out, then reports
/// done. Stamps one tag at stream offset zero.
struct CounterSource {
    next: u8,
    remaining: usize,
    tagged: bool,
}

impl Block for CounterSource {
    fn name(&self) -> &str {
        "counter-source"
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> WorkOutcome {
        if self.remaining == 0 {
            return WorkOutcome::Done;
        }
        let span = io.output(0);
        let items = span.items().min(self.remaining);
        for byte in span.bytes_mut()[..items].iter_mut() {
            *byte = self.next;
            self.next = self.next.wrapping_add(1);
        }
        self.remaining -= items;
        if !self.tagged {
            self.tagged = true;
            io.post_tag(0, Tag::new(0, "stream-start", serde_json::Value::Null));
        }
        WorkOutcome::Items(items)
    }
}

/// Swallows the stream, recording bytes and every tag it observes.
struct CollectSink {
    seen: Arc<Mutex<Vec<u8>>>,
    tags: Arc<Mutex<Vec<Tag>>>,
}

impl Block for CollectSink {
    fn name(&self) -> &str {
        "collect-sink"
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> WorkOutcome {
        for tag in io.tags(0) {
            self.tags.lock().expect("tag log").push(tag.clone());
        }
        let items = io.input(0).items();
        self.seen
            .lock()
            .expect("byte log")
            .extend_from_slice(&io.input(0).bytes()[..items]);
        io.consume(0, items as u64);
        WorkOutcome::Items(0)
    }
}

#[test]
fn stream_survives_the_edge_intact() {
    const TOTAL_BYTES: usize = 200;
    const LOAN_BYTES: usize = 16;

    let (source_tx, source_rx) = unbounded();
    let (sink_tx, sink_rx) = unbounded();

    let mut source = BlockTaskHandler::new(
        Box::new(CounterSource {
            next: 0,
            remaining: TOTAL_BYTES,
            tagged: false,
        }),
        BlockConfig::new(vec![], vec![1]),
        &QueueConfig::default(),
    )
    .expect("source handler");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tags = Arc::new(Mutex::new(Vec::new()));
    let mut sink = BlockTaskHandler::new(
        Box::new(CollectSink {
            seen: Arc::clone(&seen),
            tags: Arc::clone(&tags),
        }),
        BlockConfig::new(vec![1], vec![]),
        &QueueConfig::default(),
    )
    .expect("sink handler");

    // wiring: each side pools the other's interest token
    source.hold_peer_token(sink.input_token(0));
    sink.hold_peer_token(source.output_token(0));

    let mut source_ctx = ChannelContext {
        num_inputs: 0,
        num_outputs: 1,
        upstream: vec![],
        downstream: vec![(sink_tx.clone(), 0)],
    };
    let mut sink_ctx = ChannelContext {
        num_inputs: 1,
        num_outputs: 0,
        upstream: vec![(source_tx.clone(), 0)],
        downstream: vec![],
    };

    // the downstream side's allocator loans output buffers to the source
    let shelf = BufferShelf::with_preallocated(LOAN_BYTES, 2);
    let mut guard = 0;
    while !source.done() {
        if shelf.idle_slabs() > 0 {
            let _ = source_tx.send(BlockEvent::OutputReturn {
                port: 0,
                buffer: shelf.acquire(),
            });
        }
        dispatch(&mut source, &mut source_ctx, &source_rx);
        dispatch(&mut sink, &mut sink_ctx, &sink_rx);

        guard += 1;
        assert!(guard < 1000, "rig failed to make progress");
    }
    // drain the termination fan-out
    dispatch(&mut sink, &mut sink_ctx, &sink_rx);
    dispatch(&mut source, &mut source_ctx, &source_rx);

    let expected: Vec<u8> = (0..TOTAL_BYTES).map(|i| i as u8).collect();
    assert_eq!(*seen.lock().expect("byte log"), expected);
    assert_eq!(source.items_produced(0), TOTAL_BYTES as u64);
    assert_eq!(sink.items_consumed(0), TOTAL_BYTES as u64);

    let tags = tags.lock().expect("tag log");
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].offset, 0);
    assert_eq!(tags[0].key, "stream-start");

    // the source released the sink's interest handle when it finished
    assert!(source.done());
    assert_eq!(sink.input_token(0).use_count(), 2); // sink's own + this probe
}
