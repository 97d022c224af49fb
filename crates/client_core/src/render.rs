//! Render sink: the UI layer is told about every committed store mutation.

use shared::domain::MessageId;

use crate::message::Message;

pub trait RenderSink {
    fn on_insert(&mut self, position: usize, message: &Message);
    fn on_update(&mut self, position: usize, message: &Message);
    fn on_remove(&mut self, message: &Message);
    fn on_condense_changed(&mut self, position: usize, message: &Message);
}

pub struct NullSink;

impl RenderSink for NullSink {
    fn on_insert(&mut self, _position: usize, _message: &Message) {}
    fn on_update(&mut self, _position: usize, _message: &Message) {}
    fn on_remove(&mut self, _message: &Message) {}
    fn on_condense_changed(&mut self, _position: usize, _message: &Message) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Id(MessageId),
    Nonce(String),
    Unkeyed,
}

impl RowKey {
    pub fn of(message: &Message) -> Self {
        match (message.id, &message.nonce) {
            (Some(id), _) => Self::Id(id),
            (None, Some(nonce)) => Self::Nonce(nonce.clone()),
            (None, None) => Self::Unkeyed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOp {
    Insert { position: usize, key: RowKey },
    Update { position: usize, key: RowKey },
    Remove { key: RowKey },
    CondenseChanged {
        position: usize,
        key: RowKey,
        condensed: bool,
    },
}

/// Keeps every notification it receives, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    ops: Vec<RenderOp>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    pub fn take(&mut self) -> Vec<RenderOp> {
        std::mem::take(&mut self.ops)
    }
}

impl RenderSink for RecordingSink {
    fn on_insert(&mut self, position: usize, message: &Message) {
        self.ops.push(RenderOp::Insert {
            position,
            key: RowKey::of(message),
        });
    }

    fn on_update(&mut self, position: usize, message: &Message) {
        self.ops.push(RenderOp::Update {
            position,
            key: RowKey::of(message),
        });
    }

    fn on_remove(&mut self, message: &Message) {
        self.ops.push(RenderOp::Remove {
            key: RowKey::of(message),
        });
    }

    fn on_condense_changed(&mut self, position: usize, message: &Message) {
        self.ops.push(RenderOp::CondenseChanged {
            position,
            key: RowKey::of(message),
            condensed: message.condensed,
        });
    }
}
