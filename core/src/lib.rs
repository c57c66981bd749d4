#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate alloc;

pub mod node_id;
pub mod alias;
pub mod event;
pub mod mti;
pub mod error;
pub mod payload;
pub mod parameters;
