use crate::buffer::SBuffer;
use crate::tag::Tag;

/// What one block posts to a neighbor's port.
#[derive(Debug, Clone)]
pub enum PortMessage {
    /// Downstream: filled data. Upstream: an emptied buffer coming back.
    Buffer(SBuffer),
    /// A stream annotation crossing the edge.
    Tag(Tag),
    /// A request to re-check token counts, which is how termination
    /// propagates.
    CheckTokens,
}

/// The dispatcher-provided view of a block's place in the graph.
///
/// The engine never owns topology; it asks the dispatcher for port counts
/// and hands it messages to route. Implementations route `post_upstream`
/// along input edges and `post_downstream` along output edges.
pub trait TaskContext {
    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    fn post_upstream(&mut self, port: usize, message: PortMessage);

    fn post_downstream(&mut self, port: usize, message: PortMessage);
}
