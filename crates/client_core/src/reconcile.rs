//! Matches an incoming message against rows already in the store.

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    ById(usize),
    /// An optimistic row created at send time; its id is still unknown.
    ByNonce(usize),
    New,
}

/// First match wins: server id, then nonce against unconfirmed rows only.
pub fn find_match(entries: &[Message], incoming: &Message) -> Reconciliation {
    if let Some(id) = incoming.id {
        if let Some(index) = entries.iter().rposition(|entry| entry.id == Some(id)) {
            return Reconciliation::ById(index);
        }
    }

    if let Some(nonce) = incoming.nonce.as_deref().filter(|nonce| !nonce.is_empty()) {
        if let Some(index) = entries
            .iter()
            .rposition(|entry| entry.id.is_none() && entry.nonce.as_deref() == Some(nonce))
        {
            return Reconciliation::ByNonce(index);
        }
    }

    Reconciliation::New
}
