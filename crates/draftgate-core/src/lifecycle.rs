use crate::error::StoreError;
use crate::types::DraftStatus;

/// Validates a stored-status transition.
///
/// `Expired` is derived from time and never stored, so nothing transitions
/// into or out of it.
pub fn validate_transition(from: DraftStatus, to: DraftStatus) -> Result<(), StoreError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(from: DraftStatus) -> Vec<DraftStatus> {
    use DraftStatus::*;
    match from {
        Generating => vec![Ready, Partial, Cancelled],
        Cancelled => vec![Generating],
        Ready | Partial => vec![Applied],
        Applied | Expired => vec![],
    }
}

fn allowed(from: DraftStatus, to: DraftStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

/// Status a finished generation run settles in
#[must_use]
pub fn settled_status(failed_items: usize) -> DraftStatus {
    if failed_items == 0 {
        DraftStatus::Ready
    } else {
        DraftStatus::Partial
    }
}
