//! Error classification helpers the mongodb crate leaves to the caller.

use mongodb::error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR};

/// Return true if the server asked for the whole transaction to be retried,
/// e.g. because a concurrent transaction touched the same document.
pub fn is_transient_transaction_error(err: &DbError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}
