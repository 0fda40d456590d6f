use tracing::{info, trace, warn};
use weir_core::rate::{round_rate, scale_offset};
use weir_core::{
    Block, InputSpan, OutputSpan, PortMessage, SBuffer, Tag, TaskContext, Token, TokenPool,
    WorkFault, WorkIo, WorkOutcome,
};

use crate::config::{BlockConfig, QueueConfig, TagPropagationPolicy};
use crate::error::EngineError;
use crate::input_queues::InputBufferQueues;
use crate::output_queues::OutputBufferQueues;

/// Drives one block: decides when it may run, gathers its buffers, invokes
/// work, accounts consumption and production, propagates tags, and carries
/// out the termination protocol.
///
/// The dispatcher serializes all calls into one handler; nothing here locks.
pub struct BlockTaskHandler {
    block: Box<dyn Block>,
    config: BlockConfig,
    active: bool,
    done: bool,
    input_queues: InputBufferQueues,
    output_queues: OutputBufferQueues,
    input_tags: Vec<Vec<Tag>>,
    input_tags_changed: Vec<bool>,
    output_tags: Vec<Vec<Tag>>,
    consume_items: Vec<u64>,
    consume_written: Vec<bool>,
    produce_items: Vec<u64>,
    items_consumed: Vec<u64>,
    items_produced: Vec<u64>,
    input_tokens: Vec<Token>,
    output_tokens: Vec<Token>,
    token_pool: TokenPool,
    output_buffer_tokens: TokenPool,
}

impl BlockTaskHandler {
    pub fn new(
        block: Box<dyn Block>,
        config: BlockConfig,
        queue_config: &QueueConfig,
    ) -> Result<Self, EngineError> {
        if config.relative_rate <= 0.0 {
            return Err(EngineError::NonPositiveRate {
                rate: config.relative_rate,
            });
        }
        let num_inputs = config.num_inputs();
        let num_outputs = config.num_outputs();

        let mut input_queues = InputBufferQueues::new();
        input_queues.resize(num_inputs);
        input_queues.init(
            &config.input_history_items,
            &config.input_multiple_items,
            &config.input_item_sizes,
            queue_config,
        )?;
        let mut output_queues = OutputBufferQueues::new();
        output_queues.resize(num_outputs);

        Ok(Self {
            block,
            config,
            active: true,
            done: false,
            input_queues,
            output_queues,
            input_tags: vec![Vec::new(); num_inputs],
            input_tags_changed: vec![false; num_inputs],
            output_tags: vec![Vec::new(); num_outputs],
            consume_items: vec![0; num_inputs],
            consume_written: vec![false; num_inputs],
            produce_items: vec![0; num_outputs],
            items_consumed: vec![0; num_inputs],
            items_produced: vec![0; num_outputs],
            input_tokens: (0..num_inputs).map(|_| Token::new()).collect(),
            output_tokens: (0..num_outputs).map(|_| Token::new()).collect(),
            token_pool: TokenPool::new(),
            output_buffer_tokens: TokenPool::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.block.name()
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// Dispatcher-side activation control; a deactivated block ignores task
    /// events until reactivated or marked done.
    pub fn set_active(&mut self, active: bool) {
        if !self.done {
            self.active = active;
        }
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn items_consumed(&self, port: usize) -> u64 {
        self.items_consumed[port]
    }

    pub fn items_produced(&self, port: usize) -> u64 {
        self.items_produced[port]
    }

    pub fn inputs_ready(&self) -> bool {
        self.input_queues.all_ready()
    }

    pub fn outputs_ready(&self) -> bool {
        self.output_queues.all_ready()
    }

    /// Interest handle for the upstream peer feeding input `port`. The peer
    /// keeps the clone in its own pool; while it lives, this block stays
    /// interested in running.
    pub fn input_token(&self, port: usize) -> Token {
        self.input_tokens[port].clone()
    }

    /// Interest handle for the downstream peer on output `port`.
    pub fn output_token(&self, port: usize) -> Token {
        self.output_tokens[port].clone()
    }

    /// Hold a peer's (or the executor's) token; cleared on `mark_done` so
    /// the peer observes the drop.
    pub fn hold_peer_token(&mut self, token: Token) {
        self.token_pool.hold(token);
    }

    /// Hold an allocator token backing loaned output buffers.
    pub fn hold_output_buffer_token(&mut self, token: Token) {
        self.output_buffer_tokens.hold(token);
    }

    /// Dispatcher event: a new upstream buffer arrived on input `port`.
    pub fn deliver_input(&mut self, port: usize, buffer: SBuffer, ctx: &mut dyn TaskContext) {
        if self.done {
            return;
        }
        self.input_queues.push(port, buffer);
        self.handle_task(ctx);
    }

    /// Dispatcher event: downstream returned an empty buffer on output
    /// `port`. The buffer must arrive exclusively owned; the handler writes
    /// into it.
    pub fn return_output(&mut self, port: usize, buffer: SBuffer, ctx: &mut dyn TaskContext) {
        if self.done {
            return;
        }
        self.output_queues.push(port, buffer);
        self.handle_task(ctx);
    }

    /// Dispatcher event: a tag crossed the edge into input `port`.
    pub fn deliver_tag(&mut self, port: usize, tag: Tag, ctx: &mut dyn TaskContext) {
        if self.done {
            return;
        }
        self.input_tags[port].push(tag);
        self.input_tags_changed[port] = true;
        self.handle_task(ctx);
    }

    /// Dispatcher event: a peer asked us to re-check interest.
    pub fn check_tokens(&mut self, ctx: &mut dyn TaskContext) {
        self.handle_task(ctx);
    }

    /// Run at most one work invocation. Returns without side effects when
    /// the block is not ready.
    pub fn handle_task(&mut self, ctx: &mut dyn TaskContext) {
        if !(self.active && self.input_queues.all_ready() && self.output_queues.all_ready()) {
            trace!(block = self.block.name(), "task event ignored, not ready");
            return;
        }

        let num_inputs = ctx.num_inputs();
        let num_outputs = ctx.num_outputs();
        debug_assert_eq!(num_inputs, self.config.num_inputs());
        debug_assert_eq!(num_outputs, self.config.num_outputs());

        // Sort each changed tag list so trimming sees ascending offsets.
        for port in 0..num_inputs {
            if !self.input_tags_changed[port] {
                continue;
            }
            self.input_tags[port].sort_by(Tag::offset_order);
            self.input_tags_changed[port] = false;
        }

        // Gather input windows. The read window extends `history` bytes past
        // the consumable region so taps can look ahead; `avail` bounds what
        // work may consume.
        let mut input_views: Vec<(SBuffer, usize)> = Vec::with_capacity(num_inputs);
        let mut avail_bytes: Vec<usize> = Vec::with_capacity(num_inputs);
        let mut input_token_count = 0;
        for port in 0..num_inputs {
            input_token_count += self.input_tokens[port].use_count();
            let (view, _potential_inline) = self.input_queues.front(port);
            let items = view.length / self.config.input_item_sizes[port];
            avail_bytes.push(view.length);
            let mut read = view;
            read.length += self.input_queues.history_bytes(port);
            input_views.push((read, items));
        }

        // Pop output buffers now; they are published below, or dropped back
        // to their pools if this invocation terminates the block.
        let mut output_bufs: Vec<SBuffer> = Vec::with_capacity(num_outputs);
        let mut output_caps: Vec<usize> = Vec::with_capacity(num_outputs);
        let mut output_token_count = 0;
        for port in 0..num_outputs {
            output_token_count += self.output_tokens[port].use_count();
            let buffer = self
                .output_queues
                .pop(port)
                .expect("ready output port holds a buffer");
            output_caps.push(buffer.length / self.config.output_item_sizes[port]);
            output_bufs.push(buffer);
        }

        // No peer holds a token on one full side: nobody is interested.
        if (num_inputs != 0 && input_token_count == num_inputs)
            || (num_outputs != 0 && output_token_count == num_outputs)
        {
            self.mark_done(ctx);
            return;
        }

        let input_spans: Vec<InputSpan<'_>> = input_views
            .iter()
            .map(|(read, items)| InputSpan::new(read.bytes(), *items))
            .collect();
        let mut output_spans: Vec<OutputSpan<'_>> = output_bufs
            .iter_mut()
            .zip(&output_caps)
            .map(|(buffer, items)| OutputSpan::new(buffer.bytes_mut(), *items))
            .collect();

        for written in self.consume_written.iter_mut() {
            *written = false;
        }

        let outcome = {
            let mut io = WorkIo::new(
                &input_spans,
                &mut output_spans,
                &mut self.consume_items,
                &mut self.consume_written,
                &mut self.produce_items,
                &self.input_tags,
                &mut self.output_tags,
            );
            self.block.work(&mut io)
        };

        let noutput_items: Option<u64> = match outcome {
            WorkOutcome::Done => {
                self.mark_done(ctx);
                return;
            }
            WorkOutcome::Fatal(fault) => {
                self.fail(fault, ctx);
                return;
            }
            WorkOutcome::Items(count) => Some(count as u64),
            WorkOutcome::CalledProduce => None,
        };

        // Consumption accounting.
        for port in 0..num_inputs {
            let items = match noutput_items {
                Some(count) if self.config.fixed_rate => {
                    round_rate(count as f64 / self.config.relative_rate)
                }
                Some(_) => self.consume_items[port],
                None => {
                    if !self.config.fixed_rate && !self.consume_written[port] {
                        self.fail(WorkFault::UnsetConsume { port }, ctx);
                        return;
                    }
                    self.consume_items[port]
                }
            };
            let bytes = items.saturating_mul(self.config.input_item_sizes[port] as u64);
            let available = avail_bytes[port] as u64;
            if bytes > available {
                self.fail(
                    WorkFault::Overconsumed {
                        port,
                        bytes,
                        available,
                    },
                    ctx,
                );
                return;
            }

            self.items_consumed[port] += items;
            self.input_queues.consume(port, bytes as usize);
            self.consume_items[port] = 0;
        }

        // Production accounting and downstream publication.
        for (port, mut buffer) in output_bufs.into_iter().enumerate() {
            let items = match noutput_items {
                Some(count) => count,
                None => self.produce_items[port],
            };
            let capacity = output_caps[port] as u64;
            if items > capacity {
                self.fail(
                    WorkFault::Overproduced {
                        port,
                        items,
                        capacity,
                    },
                    ctx,
                );
                return;
            }

            buffer.length = items as usize * self.config.output_item_sizes[port];
            self.items_produced[port] += items;
            ctx.post_downstream(port, PortMessage::Buffer(buffer));
            self.produce_items[port] = 0;
        }

        // Trim input tags consumption has passed, forwarding them first.
        for port in 0..num_inputs {
            let consumed = self.items_consumed[port];
            let tags = &mut self.input_tags[port];
            let trimmed = tags.iter().take_while(|tag| tag.offset < consumed).count();

            match self.config.tag_policy {
                TagPropagationPolicy::Dont => {}
                TagPropagationPolicy::AllToAll => {
                    for out_port in 0..num_outputs {
                        for tag in &tags[..trimmed] {
                            let mut scaled = tag.clone();
                            scaled.offset = scale_offset(tag.offset, self.config.relative_rate);
                            ctx.post_downstream(out_port, PortMessage::Tag(scaled));
                        }
                    }
                }
                TagPropagationPolicy::OneToOne => {
                    if port < num_outputs {
                        for tag in &tags[..trimmed] {
                            let mut scaled = tag.clone();
                            scaled.offset = scale_offset(tag.offset, self.config.relative_rate);
                            ctx.post_downstream(port, PortMessage::Tag(scaled));
                        }
                    }
                }
            }

            tags.drain(..trimmed);
        }

        // Flush tags queued by work, after the buffers they describe.
        for port in 0..num_outputs {
            for tag in self.output_tags[port].drain(..) {
                ctx.post_downstream(port, PortMessage::Tag(tag));
            }
        }
    }

    /// Idempotent termination: release every token and buffer, then tell
    /// each neighbor to re-check interest. The second call does nothing.
    pub fn mark_done(&mut self, ctx: &mut dyn TaskContext) {
        if self.done {
            return;
        }
        self.active = false;
        self.done = true;

        self.token_pool.clear();
        self.output_buffer_tokens.clear();
        self.input_queues.flush_all();
        self.output_queues.flush_all();

        for port in 0..ctx.num_inputs() {
            ctx.post_upstream(port, PortMessage::CheckTokens);
        }
        for port in 0..ctx.num_outputs() {
            ctx.post_downstream(port, PortMessage::CheckTokens);
        }

        info!(block = self.block.name(), "block done");
    }

    fn fail(&mut self, fault: WorkFault, ctx: &mut dyn TaskContext) {
        warn!(block = self.block.name(), %fault, "work contract violated");
        self.mark_done(ctx);
    }
}
