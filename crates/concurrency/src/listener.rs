//! System completion callbacks

use crate::transaction::Transaction;

/// Subscriber notified once a transaction has reached its terminal state.
///
/// Listeners run after every `Synchronization::after_completion`. The
/// transaction manager uses one to clear the current-transaction slot;
/// resource adapters use them to release cached handles.
pub trait CompletionListener: Send + Sync {
    /// Called exactly once per transaction.
    fn on_transaction_completed(&self, transaction: &Transaction);
}
