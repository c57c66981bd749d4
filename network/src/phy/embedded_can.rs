//! Conversions between this stack's [`CanFrame`] and the frame type of
//! an `embedded-can` controller driver.

use crate::wire::CanFrame;
use embedded_can::{ExtendedId, Frame, Id};

/// Build a controller frame from a stack frame.
///
/// Returns `None` if the identifier does not fit the 29-bit extended
/// range accepted by the controller.
pub fn to_controller_frame<F: Frame>(frame: &CanFrame) -> Option<F> {
    let id = ExtendedId::new(frame.identifier())?;
    F::new(id, frame.payload())
}

/// Build a stack frame from a received controller frame.
///
/// Standard-ID and remote frames are not part of the protocol and
/// yield `None`.
pub fn from_controller_frame<F: Frame>(frame: &F) -> Option<CanFrame> {
    if frame.is_remote_frame() {
        return None;
    }
    match frame.id() {
        Id::Extended(id) => CanFrame::new_checked(id.as_raw(), frame.data()).ok(),
        Id::Standard(_) => None,
    }
}
