use cfg_if::cfg_if;
use core::fmt;

cfg_if! {
    if #[cfg(feature = "medium-can")] {
        pub mod can;

        pub use self::can::{
            CanFrame,
            ControlFrame,
            FrameType,
            FramingBits,
            LEN_CAN_PAYLOAD,
        };
    }
}

/// Parsing of a frame failed.
///
/// Either it's malformed, or not supported by this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
