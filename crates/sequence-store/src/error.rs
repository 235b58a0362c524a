//! Error types for the store layer.

/// Errors returned by a [`StateStore`](crate::StateStore) or a
/// [`TopicSubscription`](crate::TopicSubscription).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has been shut down; no further operations succeed.
    #[error("store is closed")]
    Closed,

    /// The subscription was dropped by the store, either because the
    /// store shut down or because the subscriber fell too far behind.
    #[error("subscription closed")]
    SubscriptionClosed,
}
