//! The lifecycle of a single document.

use crate::prelude::*;

/// Where a document is in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentState {
    Discovered,
    Rasterizing,
    Ocring,
    Aggregating,
    Written,
    Failed,
}

impl DocumentState {
    /// Is this a final state?
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentState::Written | DocumentState::Failed)
    }

    /// Move to `next`, if that is a legal transition.
    pub fn advance(&mut self, next: DocumentState) -> Result<()> {
        use DocumentState::*;
        let legal = match (*self, next) {
            (Discovered, Rasterizing)
            | (Rasterizing, Ocring)
            | (Ocring, Aggregating)
            | (Aggregating, Written) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        };
        if legal {
            trace!(from = ?*self, to = ?next, "Document state change");
            *self = next;
            Ok(())
        } else {
            Err(anyhow!("illegal document state change from {:?} to {:?}", self, next))
        }
    }
}
