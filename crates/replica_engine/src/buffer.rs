//! Local, per-replica buffer of operations that have been produced but not
//! yet durably acknowledged by the authority (spec.md §4.5.1). Grounded on
//! `sync::state::SyncState`'s pending-mutation queue — a list of optimistic
//! local state the client holds until the server round-trips it.

use std::collections::VecDeque;

use sync_types::Operation;

/// Buffers outgoing operations, collapsing ones that a later op in the
/// same buffer supersedes (spec.md P2: in-order delivery of survivors;
/// P3: delete beats set on the same field).
#[derive(Default)]
pub struct OperationBuffer {
    pending: VecDeque<Operation>,
}

impl OperationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a freshly produced operation, dropping any buffered operation
    /// it supersedes. Supersession only prunes operations already in the
    /// buffer; it never reaches into operations already sent and awaiting
    /// ack, since by then they're the authority's problem to order.
    pub fn push(&mut self, op: Operation) {
        self.pending.retain(|existing| !existing.is_superseded_by(&op));
        self.pending.push_back(op);
    }

    pub fn push_all(&mut self, ops: impl IntoIterator<Item = Operation>) {
        for op in ops {
            self.push(op);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Drain the buffer for transmission. The caller is responsible for
    /// re-queuing (via `push_all`) if the send fails before the authority
    /// acknowledges it.
    pub fn drain(&mut self) -> Vec<Operation> {
        self.pending.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.pending.iter()
    }
}
