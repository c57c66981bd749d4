use byteorder::{BigEndian, ByteOrder};
use core::fmt;

/// Size of an OpenLCB Node ID in octets.
pub const NODE_ID_SIZE: usize = 6;

/// Mask selecting the 48 valid bits of a Node ID.
pub const NODE_ID_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// A 48-bit globally unique OpenLCB Node ID.
///
/// Transmitted most significant byte first. The value zero is reserved
/// and means "no node".
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u64);

impl NodeId {
    /// The reserved "no node" value.
    pub const NONE: NodeId = NodeId(0);

    /// Construct a Node ID from a raw value, truncated to 48 bits.
    pub const fn new(raw: u64) -> NodeId {
        NodeId(raw & NODE_ID_MASK)
    }

    /// Construct a Node ID from a sequence of six octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is shorter than six octets.
    pub fn from_bytes(data: &[u8]) -> NodeId {
        NodeId(BigEndian::read_u48(data))
    }

    /// Return the Node ID as a sequence of six octets, in big-endian.
    pub fn to_bytes(self) -> [u8; NODE_ID_SIZE] {
        let mut bytes = [0u8; NODE_ID_SIZE];
        BigEndian::write_u48(&mut bytes, self.0);
        bytes
    }

    /// Return the raw 48-bit value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// A Node ID is usable on the network when it is non-zero.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The 12-bit Node ID slice carried by the CID`n` login frame.
    ///
    /// `n` is the CID sequence number `4..=7`; CID7 carries bits 47..36
    /// and CID4 carries bits 11..0.
    pub const fn cid_slice(self, n: u8) -> u16 {
        ((self.0 >> (12 * (n - 4) as u64)) & 0xFFF) as u16
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId::new(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
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

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_round_trip() {
        let id = NodeId::from_bytes(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(id.raw(), 0x0102_0304_0506);
        assert_eq!(id.to_bytes(), [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(id.to_string(), "01.02.03.04.05.06");
    }

    #[test]
    fn test_truncates_to_48_bits() {
        assert_eq!(NodeId::new(0xFFFF_0102_0304_0506).raw(), 0x0102_0304_0506);
    }

    #[test]
    fn test_validity() {
        assert!(!NodeId::NONE.is_valid());
        assert!(NodeId::new(1).is_valid());
    }

    #[test]
    fn test_cid_slices() {
        let id = NodeId::new(0x0102_0304_0506);
        assert_eq!(id.cid_slice(7), 0x010);
        assert_eq!(id.cid_slice(6), 0x203);
        assert_eq!(id.cid_slice(5), 0x040);
        assert_eq!(id.cid_slice(4), 0x506);
    }
}
