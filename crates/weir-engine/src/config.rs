use weir_core::rate::round_rate;

/// Where trimmed input tags go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagPropagationPolicy {
    /// Drop them.
    Dont,
    /// Every input port's tags fan out to every output port.
    #[default]
    AllToAll,
    /// Input `i` feeds output `i`; inputs past the last output drop.
    OneToOne,
}

/// Sizing for the per-port staging buffers used to restore the reserve
/// invariant when upstream buffers arrive fragmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub aux_buffer_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            aux_buffer_bytes: 128 * 1024,
        }
    }
}

/// Per-block knobs read by the task handler.
///
/// Port counts are implied by the item-size vectors. `relative_rate` is
/// output items per input item and must stay positive.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockConfig {
    pub fixed_rate: bool,
    pub relative_rate: f64,
    pub tag_policy: TagPropagationPolicy,
    pub input_item_sizes: Vec<usize>,
    pub output_item_sizes: Vec<usize>,
    pub input_history_items: Vec<usize>,
    pub input_multiple_items: Vec<usize>,
}

impl BlockConfig {
    pub fn new(input_item_sizes: Vec<usize>, output_item_sizes: Vec<usize>) -> Self {
        let num_inputs = input_item_sizes.len();
        Self {
            fixed_rate: false,
            relative_rate: 1.0,
            tag_policy: TagPropagationPolicy::default(),
            input_item_sizes,
            output_item_sizes,
            input_history_items: vec![0; num_inputs],
            input_multiple_items: vec![1; num_inputs],
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.input_item_sizes.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output_item_sizes.len()
    }

    pub fn set_fixed_rate(&mut self, fixed_rate: bool) {
        self.fixed_rate = fixed_rate;
    }

    pub fn set_relative_rate(&mut self, relative_rate: f64) {
        debug_assert!(relative_rate > 0.0, "relative rate must be positive");
        self.relative_rate = relative_rate;
    }

    pub fn set_tag_propagation_policy(&mut self, policy: TagPropagationPolicy) {
        self.tag_policy = policy;
    }

    /// Output items per input item, rounded: how many items an interpolator
    /// emits per item read.
    pub fn interpolation(&self) -> u64 {
        round_rate(self.relative_rate)
    }

    pub fn set_interpolation(&mut self, interpolation: u64) {
        self.set_relative_rate(interpolation as f64);
    }

    /// Input items per output item, rounded: how many items a decimator
    /// reads per item emitted.
    pub fn decimation(&self) -> u64 {
        round_rate(self.relative_rate.recip())
    }

    pub fn set_decimation(&mut self, decimation: u64) {
        debug_assert!(decimation > 0, "decimation must be positive");
        self.set_relative_rate((decimation as f64).recip());
    }

    /// For fixed-rate blocks: input items needed on port 0 to emit
    /// `noutput_items`.
    pub fn fixed_rate_noutput_to_ninput(&self, noutput_items: u64) -> u64 {
        let history = self.input_history_items.first().copied().unwrap_or(0) as u64;
        history + round_rate(noutput_items as f64 / self.relative_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::BlockConfig;

    #[test]
    fn interpolation_and_decimation_view_the_rate() {
        let mut config = BlockConfig::new(vec![4], vec![4]);
        config.set_interpolation(4);
        assert_eq!(config.relative_rate, 4.0);
        assert_eq!(config.interpolation(), 4);

        config.set_decimation(8);
        assert_eq!(config.decimation(), 8);
        assert_eq!(config.interpolation(), 0); // 0.125 rounds down
    }

    #[test]
    fn noutput_to_ninput_adds_history() {
        let mut config = BlockConfig::new(vec![4], vec![4]);
        config.input_history_items = vec![3];
        config.set_relative_rate(0.5);
        // 10 outputs need 20 inputs plus the 3-item history span.
        assert_eq!(config.fixed_rate_noutput_to_ninput(10), 23);
    }
}
