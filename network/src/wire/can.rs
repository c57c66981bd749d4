use super::{Error, Result};
use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use openlcb_core::alias::Alias;
use openlcb_core::mti::Mti;
use openlcb_core::node_id::{NodeId, NODE_ID_SIZE};

/// The number of data octets in a CAN frame.
pub const LEN_CAN_PAYLOAD: usize = 8;

/// Offset of the message data for frames that carry no destination
/// alias in the payload.
pub const OFFSET_WITHOUT_DEST_ADDRESS: usize = 0;

/// Offset of the message data for frames whose first two payload
/// octets carry the destination alias.
pub const OFFSET_WITH_DEST_ADDRESS: usize = 2;

mod field {
    /// Bit 28 of the 29-bit identifier, always set.
    pub const RESERVED_TOP_BIT: u32 = 0x1000_0000;
    /// Bit 27: clear for CAN control frames, set for OpenLCB messages.
    pub const OPENLCB_MSG: u32 = 0x0800_0000;
    /// Bits 26..24: the frame type of an OpenLCB message.
    pub const FRAME_TYPE_MASK: u32 = 0x0700_0000;
    pub const FRAME_TYPE_SHIFT: u32 = 24;
    /// Bits 26..12: the variable field of a CAN control frame.
    pub const VARIABLE_FIELD_MASK: u32 = 0x07FF_F000;
    pub const VARIABLE_FIELD_SHIFT: u32 = 12;
    /// Bits 23..12: the 12-bit MTI of a standard message frame, or the
    /// destination alias of a datagram frame.
    pub const CAN_MTI_MASK: u32 = 0x00FF_F000;
    pub const CAN_MTI_SHIFT: u32 = 12;
    /// Bits 11..0: the source alias.
    pub const SOURCE_ALIAS_MASK: u32 = 0x0000_0FFF;
    /// MTI bit 3 within the identifier: a destination address follows.
    pub const DEST_ADDRESS_PRESENT: u32 = 0x0000_8000;

    /// Variable-field values of the non-CID control frames.
    pub const CONTROL_RID: u16 = 0x0700;
    pub const CONTROL_AMD: u16 = 0x0701;
    pub const CONTROL_AME: u16 = 0x0702;
    pub const CONTROL_AMR: u16 = 0x0703;
    pub const CONTROL_ERROR_INFO_REPORT_0: u16 = 0x0710;
    pub const CONTROL_ERROR_INFO_REPORT_3: u16 = 0x0713;
}

/// Frame type of an OpenLCB message frame, identifier bits 26..24.
#[derive(Debug, Eq, PartialEq, Copy, Clone, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameType {
    GlobalAddressed = 1,
    DatagramOnly = 2,
    DatagramFirst = 3,
    DatagramMiddle = 4,
    DatagramFinal = 5,
    Reserved = 6,
    Stream = 7,
}

impl FrameType {
    pub const fn is_datagram(self) -> bool {
        matches!(
            self,
            FrameType::DatagramOnly
                | FrameType::DatagramFirst
                | FrameType::DatagramMiddle
                | FrameType::DatagramFinal
        )
    }
}

/// A decoded CAN control frame, identifier bit 27 clear.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlFrame {
    /// Check ID, sequence number 7 down to 1.
    Cid(u8),
    /// Reserve ID.
    Rid,
    /// Alias Map Definition.
    Amd,
    /// Alias Map Enquiry.
    Ame,
    /// Alias Map Reset.
    Amr,
    /// Error Information Report 0..3.
    ErrorInfoReport(u8),
    /// Anything else; ignored on reception.
    Unknown,
}

/// Multi-frame framing bits, payload byte 0 bits 5..4 of addressed
/// message frames. Bits 7..6 are reserved and must not affect dispatch.
#[derive(Debug, Eq, PartialEq, Copy, Clone, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FramingBits {
    Only = 0x00,
    First = 0x10,
    Final = 0x20,
    Middle = 0x30,
}

/// Mask selecting the framing bits in payload byte 0.
pub const MASK_FRAMING_BITS: u8 = 0x30;

/// A CAN frame: 29-bit extended identifier plus up to eight payload
/// octets and a valid-byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    identifier: u32,
    payload_count: u8,
    payload: [u8; LEN_CAN_PAYLOAD],
}

impl CanFrame {
    /// Construct a frame from an identifier and payload octets.
    ///
    /// # Panics
    /// The function panics if `payload` is longer than eight octets.
    pub fn new(identifier: u32, payload: &[u8]) -> CanFrame {
        let mut frame = CanFrame {
            identifier,
            payload_count: payload.len() as u8,
            payload: [0; LEN_CAN_PAYLOAD],
        };
        frame.payload[..payload.len()].copy_from_slice(payload);
        frame
    }

    /// Shorthand for a combination of [new] and a length check on the
    /// raw payload slice.
    ///
    /// [new]: #method.new
    pub fn new_checked(identifier: u32, payload: &[u8]) -> Result<CanFrame> {
        if payload.len() > LEN_CAN_PAYLOAD {
            return Err(Error);
        }
        Ok(CanFrame::new(identifier, payload))
    }

    /// Return the 29-bit identifier.
    #[inline]
    pub const fn identifier(&self) -> u32 {
        self.identifier
    }

    #[inline]
    pub fn set_identifier(&mut self, identifier: u32) {
        self.identifier = identifier;
    }

    /// Return the valid payload octets.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_count as usize]
    }

    /// Number of valid payload octets.
    #[inline]
    pub const fn payload_count(&self) -> usize {
        self.payload_count as usize
    }

    /// Replace the payload with the given octets.
    ///
    /// # Panics
    /// The function panics if `data` is longer than eight octets.
    pub fn set_payload(&mut self, data: &[u8]) {
        self.payload[..data.len()].copy_from_slice(data);
        self.payload_count = data.len() as u8;
    }

    /// Append octets to the payload, returning how many fit.
    pub fn append_payload(&mut self, data: &[u8]) -> usize {
        let space = LEN_CAN_PAYLOAD - self.payload_count as usize;
        let count = space.min(data.len());
        let start = self.payload_count as usize;
        self.payload[start..start + count].copy_from_slice(&data[..count]);
        self.payload_count += count as u8;
        count
    }

    /// Return the source alias field, identifier bits 11..0.
    #[inline]
    pub fn source_alias(&self) -> Alias {
        Alias::new((self.identifier & field::SOURCE_ALIAS_MASK) as u16)
    }

    /// Whether bit 27 marks this frame as an OpenLCB message rather
    /// than a CAN control frame.
    #[inline]
    pub const fn is_openlcb_message(&self) -> bool {
        self.identifier & field::OPENLCB_MSG != 0
    }

    /// Frame type of an OpenLCB message frame.
    pub fn frame_type(&self) -> Result<FrameType> {
        if !self.is_openlcb_message() {
            return Err(Error);
        }
        let raw = ((self.identifier & field::FRAME_TYPE_MASK) >> field::FRAME_TYPE_SHIFT) as u8;
        FrameType::try_from(raw).map_err(|_| Error)
    }

    /// Decode the control-frame opcode of a frame with bit 27 clear.
    pub fn control_frame(&self) -> Result<ControlFrame> {
        if self.is_openlcb_message() {
            return Err(Error);
        }

        let variable_field =
            ((self.identifier & field::VARIABLE_FIELD_MASK) >> field::VARIABLE_FIELD_SHIFT) as u16;

        let sequence = (variable_field >> 12) as u8;
        if sequence != 0 {
            return Ok(ControlFrame::Cid(sequence));
        }

        Ok(match variable_field {
            field::CONTROL_RID => ControlFrame::Rid,
            field::CONTROL_AMD => ControlFrame::Amd,
            field::CONTROL_AME => ControlFrame::Ame,
            field::CONTROL_AMR => ControlFrame::Amr,
            field::CONTROL_ERROR_INFO_REPORT_0..=field::CONTROL_ERROR_INFO_REPORT_3 => {
                ControlFrame::ErrorInfoReport((variable_field & 0x000F) as u8)
            }
            _ => ControlFrame::Unknown,
        })
    }

    /// The raw 12-bit MTI field of a standard message frame,
    /// identifier bits 23..12.
    #[inline]
    pub const fn can_mti_field(&self) -> u16 {
        ((self.identifier & field::CAN_MTI_MASK) >> field::CAN_MTI_SHIFT) as u16
    }

    /// Whether the MTI field carries the destination-address-present
    /// flag (MTI bit 3).
    #[inline]
    pub const fn has_dest_address(&self) -> bool {
        self.identifier & field::DEST_ADDRESS_PRESENT != 0
    }

    /// Convert the frame's CAN-level MTI into the normalized 16-bit
    /// OpenLCB MTI.
    ///
    /// Datagram frames of every type map to [`Mti::DATAGRAM`]; the
    /// three PCER-with-payload variants map to
    /// [`Mti::PC_EVENT_REPORT`]. Control and stream frames carry no
    /// MTI and yield [`Mti::NONE`].
    pub fn openlcb_mti(&self) -> Mti {
        let frame_type = match self.frame_type() {
            Ok(t) => t,
            Err(_) => return Mti::NONE,
        };

        match frame_type {
            FrameType::GlobalAddressed => {
                let raw = Mti::new(self.can_mti_field());
                match raw {
                    Mti::PCER_WITH_PAYLOAD_FIRST
                    | Mti::PCER_WITH_PAYLOAD_MIDDLE
                    | Mti::PCER_WITH_PAYLOAD_LAST => Mti::PC_EVENT_REPORT,
                    _ => raw,
                }
            }
            FrameType::DatagramOnly
            | FrameType::DatagramFirst
            | FrameType::DatagramMiddle
            | FrameType::DatagramFinal => Mti::DATAGRAM,
            FrameType::Reserved | FrameType::Stream => Mti::NONE,
        }
    }

    /// Extract the destination alias of the frame.
    ///
    /// Standard-addressed and stream frames carry it in payload bytes
    /// 0..1; datagram frames carry it in identifier bits 23..12.
    /// Returns the unassigned alias when the frame has no destination.
    pub fn dest_alias(&self) -> Alias {
        match self.frame_type() {
            Ok(FrameType::GlobalAddressed) => {
                if self.has_dest_address() && self.payload_count >= 2 {
                    // High nibble of byte 0 plus byte 1; the framing
                    // bits above them drop out with the mask.
                    Alias::new(NetworkEndian::read_u16(&self.payload[..2]))
                } else {
                    Alias::UNASSIGNED
                }
            }
            Ok(FrameType::Stream) => {
                if self.payload_count >= 2 {
                    Alias::new(NetworkEndian::read_u16(&self.payload[..2]))
                } else {
                    Alias::UNASSIGNED
                }
            }
            Ok(t) if t.is_datagram() => Alias::new(self.can_mti_field()),
            _ => Alias::UNASSIGNED,
        }
    }

    /// Framing bits of an addressed message frame.
    pub fn framing_bits(&self) -> FramingBits {
        if self.payload_count == 0 {
            return FramingBits::Only;
        }
        // Only bits 5..4 take part; reserved bits 7..6 are dropped.
        match FramingBits::try_from(self.payload[0] & MASK_FRAMING_BITS) {
            Ok(bits) => bits,
            Err(_) => FramingBits::Only,
        }
    }

    /// Read the first six payload octets as a Node ID.
    pub fn payload_as_node_id(&self) -> Result<NodeId> {
        if (self.payload_count as usize) < NODE_ID_SIZE {
            return Err(Error);
        }
        Ok(NodeId::from_bytes(&self.payload[..NODE_ID_SIZE]))
    }

    /// Write a Node ID into the payload at `offset`, growing the valid
    /// count to cover it. `offset` must be 0..=2 so the ID fits.
    pub fn set_payload_node_id(&mut self, node_id: NodeId, offset: usize) {
        debug_assert!(offset <= LEN_CAN_PAYLOAD - NODE_ID_SIZE);
        self.payload[offset..offset + NODE_ID_SIZE].copy_from_slice(&node_id.to_bytes());
        self.payload_count = (offset + NODE_ID_SIZE) as u8;
    }
}

/// Builders for the identifiers this stack transmits.
pub mod identifier {
    use super::{field, FrameType};
    use openlcb_core::alias::Alias;
    use openlcb_core::mti::Mti;
    use openlcb_core::node_id::NodeId;

    /// Identifier of a standard message frame carrying `mti` from
    /// `source_alias`, the inverse of frame decoding.
    pub const fn openlcb_message(mti: Mti, source_alias: Alias) -> u32 {
        field::RESERVED_TOP_BIT
            | field::OPENLCB_MSG
            | (FrameType::GlobalAddressed as u32) << field::FRAME_TYPE_SHIFT
            | (mti.can_field() as u32) << field::CAN_MTI_SHIFT
            | source_alias.raw() as u32
    }

    /// Identifier of a datagram frame; the destination alias rides in
    /// bits 23..12.
    pub const fn datagram(frame_type: FrameType, dest: Alias, source: Alias) -> u32 {
        field::RESERVED_TOP_BIT
            | field::OPENLCB_MSG
            | (frame_type as u32) << field::FRAME_TYPE_SHIFT
            | (dest.raw() as u32) << field::CAN_MTI_SHIFT
            | source.raw() as u32
    }

    /// Identifier of a stream data frame.
    pub const fn stream(source: Alias) -> u32 {
        field::RESERVED_TOP_BIT
            | field::OPENLCB_MSG
            | (FrameType::Stream as u32) << field::FRAME_TYPE_SHIFT
            | source.raw() as u32
    }

    /// Identifier of the CID`sequence` login frame carrying the
    /// matching 12-bit slice of `node_id`. The login sequence uses
    /// CID7 down to CID4; CID3..CID1 are reserved by the standard.
    pub const fn cid(sequence: u8, node_id: NodeId, alias: Alias) -> u32 {
        debug_assert!(sequence >= 4 && sequence <= 7);
        field::RESERVED_TOP_BIT
            | (sequence as u32) << 24
            | (node_id.cid_slice(sequence) as u32) << field::VARIABLE_FIELD_SHIFT
            | alias.raw() as u32
    }

    pub const fn rid(alias: Alias) -> u32 {
        control(field::CONTROL_RID, alias)
    }

    pub const fn amd(alias: Alias) -> u32 {
        control(field::CONTROL_AMD, alias)
    }

    pub const fn ame(alias: Alias) -> u32 {
        control(field::CONTROL_AME, alias)
    }

    pub const fn amr(alias: Alias) -> u32 {
        control(field::CONTROL_AMR, alias)
    }

    const fn control(variable_field: u16, alias: Alias) -> u32 {
        field::RESERVED_TOP_BIT
            | (variable_field as u32) << field::VARIABLE_FIELD_SHIFT
            | alias.raw() as u32
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CAN id={:08X} src={} len={}",
            self.identifier,
            self.source_alias(),
            self.payload_count,
        )
    }
}
