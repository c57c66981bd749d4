use crate::wire::CanFrame;

#[cfg(feature = "phy-embedded_can")]
pub mod embedded_can;

pub mod loopback;

/// Interface to the platform CAN controller.
///
/// The stack never blocks on the driver: a transmit attempt that the
/// hardware cannot accept right now returns [`nb::Error::WouldBlock`]
/// and the caller retries on a later poll. Reception is push-style;
/// the driver (usually from its receive interrupt) feeds each frame to
/// [`Interface::on_can_frame`].
///
/// [`Interface::on_can_frame`]: crate::iface::Interface::on_can_frame
pub trait Driver {
    type Error;

    /// Hand one frame to the hardware.
    ///
    /// `WouldBlock` means "try later" and is not an error; the frame
    /// was not consumed.
    fn transmit(&mut self, frame: &CanFrame) -> nb::Result<(), Self::Error>;

    /// Whether the hardware transmit buffer has fully drained.
    ///
    /// Multi-frame transmissions only start on an empty buffer so that
    /// a sequence is never interleaved with a previously queued frame.
    fn is_transmit_empty(&self) -> bool;
}

/// The platform's critical-section pair guarding the structures shared
/// between the main loop and the receive/timer contexts.
///
/// On bare metal the implementation typically masks the CAN receive
/// interrupt and the 100 ms timer; under an RTOS it takes a mutex. The
/// lock is not required to nest.
pub trait SharedLock {
    fn lock(&mut self);
    fn unlock(&mut self);

    /// Run `f` inside the critical section.
    fn locked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.lock();
        let result = f();
        self.unlock();
        result
    }
}

/// Lock for single-context targets and tests.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoopLock;

impl SharedLock for NoopLock {
    fn lock(&mut self) {}
    fn unlock(&mut self) {}
}
