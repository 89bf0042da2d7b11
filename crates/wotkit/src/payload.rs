use serde::{Deserialize, Serialize};

/// The envelope wrapping every value exchanged with a device.
///
/// Property reads, property writes, action inputs and outputs, and event
/// occurrences all travel as `{"value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEnvelope<T> {
    /// The wrapped value.
    pub value: T,
}

impl<T> ValueEnvelope<T> {
    /// Wraps a value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Returns the wrapped value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}
