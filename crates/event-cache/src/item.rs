//! The unit stored by the cache and shipped by the pool.

/// A pending event.
///
/// `id` is the correlation key used for acknowledgement and removal and must
/// be unique within a cache. `payload` is already serialized and is never
/// inspected by the cache or the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub id: String,
    pub payload: Vec<u8>,
}

impl QueuedItem {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}
