use crate::node_id::NodeId;
use byteorder::{BigEndian, ByteOrder};
use core::fmt;

/// Size of an Event ID in octets.
pub const EVENT_ID_SIZE: usize = 8;

/// A 64-bit Producer/Consumer Event ID.
///
/// By convention the upper six octets are derived from the Node ID of
/// the defining node and the lower two octets select the event within
/// the node. The value zero is reserved and means "no event".
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventId(u64);

impl EventId {
    /// The reserved "no event" value.
    pub const NONE: EventId = EventId(0);

    /// Well-known event broadcast once when a duplicate Node ID is
    /// detected on the network.
    pub const DUPLICATE_NODE_DETECTED: EventId = EventId(0x0101_0000_0000_0201);

    pub const fn new(raw: u64) -> EventId {
        EventId(raw)
    }

    /// Auto-created event `index` under `node_id`, per the Event
    /// Identifiers convention (`node_id` in the upper six octets).
    pub const fn from_node(node_id: NodeId, index: u16) -> EventId {
        EventId((node_id.raw() << 16) | index as u64)
    }

    /// Construct an Event ID from a sequence of eight octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is shorter than eight octets.
    pub fn from_bytes(data: &[u8]) -> EventId {
        EventId(BigEndian::read_u64(data))
    }

    /// Return the Event ID as a sequence of eight octets, in big-endian.
    pub fn to_bytes(self) -> [u8; EVENT_ID_SIZE] {
        let mut bytes = [0u8; EVENT_ID_SIZE];
        BigEndian::write_u64(&mut bytes, self.0);
        bytes
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        EventId(value)
    }
}

impl From<EventId> for u64 {
    fn from(value: EventId) -> Self {
        value.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = self.to_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i != 0 {
                write!(f, ".")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Current state of an event from its producer's or consumer's
/// perspective, reported in the Identified reply family.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventStatus {
    #[default]
    Unknown,
    Set,
    Clear,
}
