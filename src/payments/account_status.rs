//! Account Status Machine.
//!
//! Verification payouts drive the linked account forward. The mapping is a
//! pure function so every writer (payout processor, webhook, reconciler)
//! derives the same next state.

use crate::payments::types::{AccountStatus, TransactionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEvent {
    /// The gateway accepted the verification payout.
    PayoutCreated,
    /// The verification payout reported a new status.
    PayoutStatus(TransactionStatus),
}

/// Next account status for `event`, or `None` when the account stays put.
/// Never moves backward and never leaves a terminal state.
pub fn next_account_status(current: AccountStatus, event: AccountEvent) -> Option<AccountStatus> {
    if current.is_terminal() {
        return None;
    }

    let target = match event {
        AccountEvent::PayoutCreated => AccountStatus::TransactionCreated,
        AccountEvent::PayoutStatus(TransactionStatus::Processed) => AccountStatus::Verified,
        AccountEvent::PayoutStatus(status) if status.is_failure() => {
            AccountStatus::ConfirmationFailed
        }
        AccountEvent::PayoutStatus(TransactionStatus::Created) => return None,
        AccountEvent::PayoutStatus(_) => AccountStatus::Verification,
    };

    current.can_transition_to(&target).then_some(target)
}

/// Fold several events, returning the last state reached if it differs from
/// `current`.
pub fn advance(current: AccountStatus, events: &[AccountEvent]) -> Option<AccountStatus> {
    let reached = events.iter().fold(current, |status, event| {
        next_account_status(status, *event).unwrap_or(status)
    });
    (reached != current).then_some(reached)
}
