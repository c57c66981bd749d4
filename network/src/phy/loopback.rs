use super::Driver;
use crate::wire::CanFrame;
use core::convert::Infallible;
use heapless::Deque;

/// A driver that records every transmitted frame in a queue.
///
/// Useful for tests and for host-side tools that tunnel CAN frames
/// over another transport.
#[derive(Debug, Default)]
pub struct Loopback<const N: usize> {
    queue: Deque<CanFrame, N>,
    /// When set, `transmit` reports `WouldBlock` and the buffer reads
    /// as busy; lets tests exercise the retry paths.
    pub jammed: bool,
}

impl<const N: usize> Loopback<N> {
    pub fn new() -> Self {
        Loopback {
            queue: Deque::new(),
            jammed: false,
        }
    }

    /// Take the oldest transmitted frame.
    pub fn dequeue(&mut self) -> Option<CanFrame> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<const N: usize> Driver for Loopback<N> {
    type Error = Infallible;

    fn transmit(&mut self, frame: &CanFrame) -> nb::Result<(), Self::Error> {
        if self.jammed {
            return Err(nb::Error::WouldBlock);
        }
        self.queue.push_back(*frame).map_err(|_| nb::Error::WouldBlock)
    }

    fn is_transmit_empty(&self) -> bool {
        !self.jammed
    }
}
