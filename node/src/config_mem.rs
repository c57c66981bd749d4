use openlcb_core::error::ErrorCode;
use openlcb_network::iface::Node;

/// Application-owned configuration memory.
///
/// The datagram handler calls these synchronously from inside the
/// dispatcher; implementations must not block and must not call back
/// into the stack.
pub trait ConfigMemory {
    /// Fill `buffer` from `space` starting at `address`; returns the
    /// number of bytes produced, which may be short at the end of the
    /// space.
    fn read(
        &mut self,
        node: &Node,
        space: u8,
        address: u32,
        buffer: &mut [u8],
    ) -> Result<usize, ErrorCode>;

    /// Store `data` into `space` starting at `address`.
    fn write(
        &mut self,
        node: &mut Node,
        space: u8,
        address: u32,
        data: &[u8],
    ) -> Result<(), ErrorCode>;
}

/// Rejects every access; for nodes without writable memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConfigMemory;

impl ConfigMemory for NullConfigMemory {
    fn read(
        &mut self,
        _node: &Node,
        _space: u8,
        _address: u32,
        _buffer: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        Err(ErrorCode::PERMANENT_NOT_IMPLEMENTED)
    }

    fn write(
        &mut self,
        _node: &mut Node,
        _space: u8,
        _address: u32,
        _data: &[u8],
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::PERMANENT_NOT_IMPLEMENTED)
    }
}
