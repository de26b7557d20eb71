//! The scope holding the currently active transaction.

use std::sync::Mutex;

use crate::idle::IdleTransaction;
use crate::lock;

/// Tracks which transaction new spans attach to.
#[derive(Debug, Default)]
pub struct Scope {
    active: Mutex<Option<IdleTransaction>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a transaction active, replacing any previous one.
    pub fn set_active(&self, transaction: IdleTransaction) {
        *lock(&self.active) = Some(transaction);
    }

    /// The active transaction. Finished transactions are cleared on access.
    pub fn active(&self) -> Option<IdleTransaction> {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(IdleTransaction::is_finished) {
            *active = None;
        }
        active.clone()
    }

    /// Clear the active transaction if it is the given one.
    pub fn clear_if(&self, transaction: &IdleTransaction) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|t| t.same_as(transaction)) {
            *active = None;
        }
    }
}
