#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

#[macro_use]
mod macros;

pub mod config {
    // TODO: make the event list capacities configurable per node
    #![allow(unused)]

    /// Events one node can produce.
    pub const MAX_PRODUCER_EVENTS: usize = 64;
    /// Events one node can consume.
    pub const MAX_CONSUMER_EVENTS: usize = 32;
    /// Event ID ranges one node can produce.
    pub const MAX_PRODUCER_EVENT_RANGES: usize = 5;
    /// Event ID ranges one node can consume.
    pub const MAX_CONSUMER_EVENT_RANGES: usize = 5;

    /// Login hold-off between the last CID frame and the RID frame, in
    /// 100 ms ticks. The standard requires at least 200 ms.
    pub const LOGIN_WAIT_TICKS: u16 = 2;

    /// How long a held datagram waits for its reply before it is
    /// dropped, in 100 ms ticks.
    pub const DATAGRAM_REPLY_WAIT_TICKS: u8 = 10;
}

pub mod phy;
pub mod wire;

pub mod storage;

pub mod iface;
