//! Traits at the seam between panel builders and their consumers.

use crate::Result;
use crate::frame::Frame;

/// A panel that can be flattened into a [`Frame`] for persistence or estimation.
pub trait IntoFrame {
    /// Flatten into columns. Column order is stable for a given panel shape.
    fn to_frame(&self) -> Result<Frame>;
}
