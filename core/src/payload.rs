use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Payload length of a Basic buffer; most messages fit in one or two
/// CAN frames.
pub const LEN_PAYLOAD_BASIC: usize = 16;

/// Payload length of a Datagram buffer.
pub const LEN_PAYLOAD_DATAGRAM: usize = 72;

/// Payload length of a Snip buffer; also covers Event Reports with
/// payload.
pub const LEN_PAYLOAD_SNIP: usize = 256;

/// Payload length of a Stream buffer.
pub const LEN_PAYLOAD_STREAM: usize = 512;

/// Size category of a message payload buffer.
///
/// The buffer store keeps a separate pool for each category so that a
/// flood of small messages cannot starve the large buffers and vice
/// versa.
#[derive(Debug, PartialEq, Eq, Copy, Clone, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadKind {
    Basic = 0,
    Datagram = 1,
    Snip = 2,
    Stream = 3,
}

impl PayloadKind {
    /// Number of distinct payload categories.
    pub const COUNT: usize = 4;

    /// Maximum number of valid payload bytes for this category.
    pub const fn max_len(self) -> usize {
        match self {
            PayloadKind::Basic => LEN_PAYLOAD_BASIC,
            PayloadKind::Datagram => LEN_PAYLOAD_DATAGRAM,
            PayloadKind::Snip => LEN_PAYLOAD_SNIP,
            PayloadKind::Stream => LEN_PAYLOAD_STREAM,
        }
    }
}
