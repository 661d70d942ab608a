//! Marker wrapper distinguishing a point-in-time snapshot value from a live one.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
pub struct Snapshot<T>(pub T);

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Snapshot<U> {
        Snapshot(f(self.0))
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}
