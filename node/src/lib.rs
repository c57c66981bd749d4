#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate alloc;

pub mod application;
pub mod config_mem;
pub mod protocol;

pub use self::config_mem::{ConfigMemory, NullConfigMemory};
pub use self::protocol::StandardHandler;
