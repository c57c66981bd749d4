use crate::config_mem::ConfigMemory;
use byteorder::{BigEndian, ByteOrder};
use openlcb_core::error::ErrorCode;
use openlcb_core::mti::Mti;
use openlcb_core::parameters::{space, AddressSpaceInfo};
use openlcb_network::iface::{MessageView, Node, NodeFlags, Reply};

/// Datagram protocol identifier of the Memory Configuration Protocol.
const PROTOCOL_CONFIG_MEM: u8 = 0x20;

/// Memory Configuration command bytes.
mod cmd {
    pub const WRITE: u8 = 0x00;
    pub const WRITE_UNDER_MASK: u8 = 0x08;
    pub const WRITE_REPLY_OK: u8 = 0x10;
    pub const WRITE_REPLY_FAIL: u8 = 0x18;
    pub const READ: u8 = 0x40;
    pub const READ_REPLY_OK: u8 = 0x50;
    pub const READ_REPLY_FAIL: u8 = 0x58;
    pub const OPTIONS: u8 = 0x80;
    pub const OPTIONS_REPLY: u8 = 0x82;
    pub const GET_ADDRESS_SPACE_INFO: u8 = 0x84;
    pub const ADDRESS_SPACE_INFO_NOT_PRESENT: u8 = 0x86;
    pub const ADDRESS_SPACE_INFO_PRESENT: u8 = 0x87;
}

/// Largest data block a read or write datagram can carry.
const MAX_TRANSFER: usize = 64;

/// Reply-pending flag of the Datagram Received OK payload.
const ACK_REPLY_PENDING: u8 = 0x80;

pub(crate) fn handle<M: ConfigMemory>(
    config_mem: &mut M,
    node: &mut Node,
    msg: &MessageView,
    reply: &mut Reply,
) {
    match msg.mti {
        Mti::DATAGRAM => handle_incoming(config_mem, node, msg, reply),
        Mti::DATAGRAM_OK_REPLY => {
            // The peer took our datagram; nothing left to retry.
            node.flags.remove(NodeFlags::RESEND_DATAGRAM);
        }
        Mti::DATAGRAM_REJECTED_REPLY => {
            if rejection_error(msg.payload).is_temporary() {
                node.flags.insert(NodeFlags::RESEND_DATAGRAM);
            } else {
                node.flags.remove(NodeFlags::RESEND_DATAGRAM);
            }
        }
        _ => {}
    }
}

fn handle_incoming<M: ConfigMemory>(
    config_mem: &mut M,
    node: &mut Node,
    msg: &MessageView,
    reply: &mut Reply,
) {
    if msg.payload.first() != Some(&PROTOCOL_CONFIG_MEM) || msg.payload.len() < 2 {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_NOT_IMPLEMENTED);
        return;
    }

    // First pass acknowledges with reply-pending; the dispatcher calls
    // again for the actual reply datagram.
    if !node.flags.contains(NodeFlags::DATAGRAM_ACK_SENT) {
        node.flags.insert(NodeFlags::DATAGRAM_ACK_SENT);
        reply.load(
            Mti::DATAGRAM_OK_REPLY,
            node.alias,
            node.id,
            msg.source_alias,
            msg.source_id,
        );
        reply.push_bytes(&[ACK_REPLY_PENDING]);
        reply.enumerate = true;
        return;
    }
    node.flags.remove(NodeFlags::DATAGRAM_ACK_SENT);

    let command = msg.payload[1];
    match command {
        _ if command & 0xFC == cmd::READ => read_command(config_mem, node, msg, reply),
        _ if command & 0xFC == cmd::WRITE => write_command(config_mem, node, msg, reply),
        _ if command & 0xFC == cmd::WRITE_UNDER_MASK => {
            write_under_mask_command(config_mem, node, msg, reply)
        }
        cmd::OPTIONS => options_command(node, msg, reply),
        cmd::GET_ADDRESS_SPACE_INFO => address_space_info_command(node, msg, reply),
        _ => {
            load_datagram_rejected(
                node,
                msg,
                reply,
                ErrorCode::PERMANENT_NOT_IMPLEMENTED_SUBCOMMAND_UNKNOWN,
            );
        }
    }
}

/// Parse the space number and the offset where data or count begins.
///
/// Commands with low bits 1..=3 name a well-known space; low bits 0
/// carry the space number in byte 6.
fn parse_space(msg: &MessageView) -> Option<(u8, usize)> {
    let command = msg.payload[1];
    match command & 0x03 {
        0x01 => Some((space::CONFIGURATION_MEMORY, 6)),
        0x02 => Some((space::ALL, 6)),
        0x03 => Some((space::CONFIGURATION_DEFINITION_INFO, 6)),
        _ => {
            if msg.payload.len() < 7 {
                return None;
            }
            Some((msg.payload[6], 7))
        }
    }
}

fn read_command<M: ConfigMemory>(
    config_mem: &mut M,
    node: &mut Node,
    msg: &MessageView,
    reply: &mut Reply,
) {
    let Some((space_id, count_offset)) = parse_space(msg) else {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    };
    if msg.payload.len() < count_offset + 1 {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }

    let address = BigEndian::read_u32(&msg.payload[2..6]);
    let count = (msg.payload[count_offset] & 0x7F) as usize;

    let Some(info) = space_info(node, space_id) else {
        load_read_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_ADDRESS_SPACE_UNKNOWN);
        return;
    };
    if !info.present {
        load_read_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_ADDRESS_SPACE_UNKNOWN);
        return;
    }
    if count == 0 || count > MAX_TRANSFER {
        load_read_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }
    if address > info.highest_address {
        load_read_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_OUT_OF_BOUNDS_INVALID_ADDRESS);
        return;
    }

    // Clip the block at the end of the space.
    let available = (info.highest_address - address).min((MAX_TRANSFER - 1) as u32) as usize + 1;
    let count = count.min(available);

    let mut buffer = [0u8; MAX_TRANSFER];
    let read = match space_id {
        space::CONFIGURATION_DEFINITION_INFO => read_cdi(node, address, &mut buffer[..count]),
        space::ACDI_MANUFACTURER => read_acdi_manufacturer(node, address, &mut buffer[..count]),
        _ => config_mem.read(node, space_id, address, &mut buffer[..count]),
    };

    match read {
        Ok(produced) => {
            load_reply_header(node, msg, reply);
            reply.push_bytes(&[PROTOCOL_CONFIG_MEM, cmd::READ_REPLY_OK | (msg.payload[1] & 0x03)]);
            push_address_and_space(reply, msg, address, space_id);
            reply.push_bytes(&buffer[..produced]);
        }
        Err(code) => load_read_fail(node, msg, reply, address, space_id, code),
    }
}

fn write_command<M: ConfigMemory>(
    config_mem: &mut M,
    node: &mut Node,
    msg: &MessageView,
    reply: &mut Reply,
) {
    let Some((space_id, data_offset)) = parse_space(msg) else {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    };
    if msg.payload.len() < data_offset {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }

    let address = BigEndian::read_u32(&msg.payload[2..6]);
    let data = &msg.payload[data_offset..];

    let Some(info) = space_info(node, space_id) else {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_ADDRESS_SPACE_UNKNOWN);
        return;
    };
    if !info.present {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_ADDRESS_SPACE_UNKNOWN);
        return;
    }
    if info.read_only || data.is_empty() || data.len() > MAX_TRANSFER {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }
    if address > info.highest_address
        || ((info.highest_address - address) as u64) < data.len() as u64 - 1
    {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_OUT_OF_BOUNDS_INVALID_ADDRESS);
        return;
    }

    match config_mem.write(node, space_id, address, data) {
        Ok(()) => {
            load_reply_header(node, msg, reply);
            reply.push_bytes(&[PROTOCOL_CONFIG_MEM, cmd::WRITE_REPLY_OK | (msg.payload[1] & 0x03)]);
            push_address_and_space(reply, msg, address, space_id);
        }
        Err(code) => load_write_fail(node, msg, reply, address, space_id, code),
    }
}

/// Write Under Mask: the data block is (mask, value) pairs; only the
/// bits selected by each mask change.
fn write_under_mask_command<M: ConfigMemory>(
    config_mem: &mut M,
    node: &mut Node,
    msg: &MessageView,
    reply: &mut Reply,
) {
    let Some((space_id, data_offset)) = parse_space(msg) else {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    };
    if msg.payload.len() < data_offset {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }

    let address = BigEndian::read_u32(&msg.payload[2..6]);
    let pairs = &msg.payload[data_offset..];

    if !node.parameters.configuration_options.write_under_mask_supported {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_NOT_IMPLEMENTED_SUBCOMMAND_UNKNOWN);
        return;
    }
    if pairs.is_empty() || pairs.len() % 2 != 0 || pairs.len() / 2 > MAX_TRANSFER {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }
    let Some(info) = space_info(node, space_id) else {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_ADDRESS_SPACE_UNKNOWN);
        return;
    };
    if !info.present || info.read_only {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }
    let count = pairs.len() / 2;
    if address > info.highest_address
        || ((info.highest_address - address) as u64) < count as u64 - 1
    {
        load_write_fail(node, msg, reply, address, space_id, ErrorCode::PERMANENT_CONFIG_MEM_OUT_OF_BOUNDS_INVALID_ADDRESS);
        return;
    }

    let mut current = [0u8; MAX_TRANSFER];
    let merged = match config_mem.read(node, space_id, address, &mut current[..count]) {
        Ok(read) if read >= count => {
            for (byte, pair) in current[..count].iter_mut().zip(pairs.chunks_exact(2)) {
                *byte = (*byte & !pair[0]) | (pair[1] & pair[0]);
            }
            config_mem.write(node, space_id, address, &current[..count])
        }
        Ok(_) => Err(ErrorCode::TEMPORARY_TRANSFER_ERROR),
        Err(code) => Err(code),
    };

    match merged {
        Ok(()) => {
            load_reply_header(node, msg, reply);
            reply.push_bytes(&[PROTOCOL_CONFIG_MEM, cmd::WRITE_REPLY_OK | (msg.payload[1] & 0x03)]);
            push_address_and_space(reply, msg, address, space_id);
        }
        Err(code) => load_write_fail(node, msg, reply, address, space_id, code),
    }
}

fn options_command(node: &Node, msg: &MessageView, reply: &mut Reply) {
    let options = &node.parameters.configuration_options;

    let mut available = 0u8;
    if options.write_under_mask_supported {
        available |= 0x80;
    }
    if options.unaligned_reads_supported {
        available |= 0x40;
    }
    if options.unaligned_writes_supported {
        available |= 0x20;
    }
    if options.read_from_manufacturer_space_supported {
        available |= 0x10;
    }
    if options.read_from_user_space_supported {
        available |= 0x08;
    }
    if options.write_to_user_space_supported {
        available |= 0x04;
    }
    let stream = if options.stream_read_write_supported { 0x01 } else { 0x00 };

    load_reply_header(node, msg, reply);
    reply.push_bytes(&[
        PROTOCOL_CONFIG_MEM,
        cmd::OPTIONS_REPLY,
        available,
        stream,
        // Write lengths: 1, 2, 4 byte and arbitrary writes.
        0xF2,
        options.high_address_space,
        options.low_address_space,
    ]);
    reply.push_bytes(options.description.as_bytes());
}

fn address_space_info_command(node: &Node, msg: &MessageView, reply: &mut Reply) {
    if msg.payload.len() < 3 {
        load_datagram_rejected(node, msg, reply, ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        return;
    }
    let space_id = msg.payload[2];

    load_reply_header(node, msg, reply);
    match space_info(node, space_id).filter(|info| info.present) {
        Some(info) => {
            let mut highest = [0u8; 4];
            BigEndian::write_u32(&mut highest, info.highest_address);

            reply.push_bytes(&[PROTOCOL_CONFIG_MEM, cmd::ADDRESS_SPACE_INFO_PRESENT, space_id]);
            reply.push_bytes(&highest);

            let mut flags = 0u8;
            if info.read_only {
                flags |= 0x01;
            }
            if info.low_address_valid {
                flags |= 0x02;
            }
            reply.push_bytes(&[flags]);

            if info.low_address_valid {
                let mut low = [0u8; 4];
                BigEndian::write_u32(&mut low, info.low_address);
                reply.push_bytes(&low);
            }
            reply.push_bytes(info.description.as_bytes());
        }
        None => {
            reply.push_bytes(&[PROTOCOL_CONFIG_MEM, cmd::ADDRESS_SPACE_INFO_NOT_PRESENT, space_id]);
        }
    }
}

fn space_info<'n>(node: &'n Node, space_id: u8) -> Option<&'n AddressSpaceInfo> {
    let parameters = node.parameters;
    match space_id {
        space::CONFIGURATION_DEFINITION_INFO => {
            Some(&parameters.address_space_configuration_definition)
        }
        space::ALL => Some(&parameters.address_space_all),
        space::CONFIGURATION_MEMORY => Some(&parameters.address_space_config_memory),
        space::ACDI_MANUFACTURER => Some(&parameters.address_space_acdi_manufacturer),
        space::ACDI_USER => Some(&parameters.address_space_acdi_user),
        space::FIRMWARE => Some(&parameters.address_space_firmware),
        _ => None,
    }
}

/// The CDI space serves the XML blob straight from the parameters.
fn read_cdi(node: &Node, address: u32, buffer: &mut [u8]) -> Result<usize, ErrorCode> {
    let cdi = node.parameters.cdi;
    let start = address as usize;
    if start >= cdi.len() {
        return Err(ErrorCode::PERMANENT_CONFIG_MEM_OUT_OF_BOUNDS_INVALID_ADDRESS);
    }
    let count = buffer.len().min(cdi.len() - start);
    buffer[..count].copy_from_slice(&cdi[start..start + count]);
    Ok(count)
}

/// The ACDI manufacturer space has a fixed layout: version octet, then
/// the four zero-padded string fields.
fn read_acdi_manufacturer(node: &Node, address: u32, buffer: &mut [u8]) -> Result<usize, ErrorCode> {
    const LEN_NAME: usize = 41;
    const LEN_MODEL: usize = 41;
    const LEN_VERSION_FIELD: usize = 21;
    const TOTAL: usize = 1 + LEN_NAME + LEN_MODEL + 2 * LEN_VERSION_FIELD;

    let snip = &node.parameters.snip;
    let mut image = [0u8; TOTAL];
    image[0] = snip.mfg_version;
    copy_string(&mut image[1..1 + LEN_NAME], snip.name);
    copy_string(&mut image[1 + LEN_NAME..1 + LEN_NAME + LEN_MODEL], snip.model);
    copy_string(
        &mut image[1 + LEN_NAME + LEN_MODEL..1 + LEN_NAME + LEN_MODEL + LEN_VERSION_FIELD],
        snip.hardware_version,
    );
    copy_string(
        &mut image[1 + LEN_NAME + LEN_MODEL + LEN_VERSION_FIELD..],
        snip.software_version,
    );

    let start = address as usize;
    if start >= TOTAL {
        return Err(ErrorCode::PERMANENT_CONFIG_MEM_OUT_OF_BOUNDS_INVALID_ADDRESS);
    }
    let count = buffer.len().min(TOTAL - start);
    buffer[..count].copy_from_slice(&image[start..start + count]);
    Ok(count)
}

fn copy_string(field: &mut [u8], value: &str) {
    let count = value.len().min(field.len() - 1);
    field[..count].copy_from_slice(&value.as_bytes()[..count]);
}

fn load_reply_header(node: &Node, msg: &MessageView, reply: &mut Reply) {
    reply.load(
        Mti::DATAGRAM,
        node.alias,
        node.id,
        msg.source_alias,
        msg.source_id,
    );
}

fn push_address_and_space(reply: &mut Reply, msg: &MessageView, address: u32, space_id: u8) {
    let mut bytes = [0u8; 4];
    BigEndian::write_u32(&mut bytes, address);
    reply.push_bytes(&bytes);
    if msg.payload[1] & 0x03 == 0 {
        reply.push_bytes(&[space_id]);
    }
}

fn load_read_fail(
    node: &Node,
    msg: &MessageView,
    reply: &mut Reply,
    address: u32,
    space_id: u8,
    code: ErrorCode,
) {
    load_reply_header(node, msg, reply);
    reply.push_bytes(&[PROTOCOL_CONFIG_MEM, cmd::READ_REPLY_FAIL | (msg.payload[1] & 0x03)]);
    push_address_and_space(reply, msg, address, space_id);
    reply.push_bytes(&code.to_bytes());
}

fn load_write_fail(
    node: &Node,
    msg: &MessageView,
    reply: &mut Reply,
    address: u32,
    space_id: u8,
    code: ErrorCode,
) {
    load_reply_header(node, msg, reply);
    reply.push_bytes(&[PROTOCOL_CONFIG_MEM, cmd::WRITE_REPLY_FAIL | (msg.payload[1] & 0x03)]);
    push_address_and_space(reply, msg, address, space_id);
    reply.push_bytes(&code.to_bytes());
}

fn load_datagram_rejected(node: &Node, msg: &MessageView, reply: &mut Reply, code: ErrorCode) {
    reply.load(
        Mti::DATAGRAM_REJECTED_REPLY,
        node.alias,
        node.id,
        msg.source_alias,
        msg.source_id,
    );
    reply.push_bytes(&code.to_bytes());
}

/// Pull the error code out of a Datagram Rejected payload; the code is
/// the first word that looks like one.
fn rejection_error(payload: &[u8]) -> ErrorCode {
    for chunk in payload.chunks_exact(2) {
        let code = ErrorCode::new(BigEndian::read_u16(chunk));
        if code.is_permanent() || code.is_temporary() {
            return code;
        }
    }
    ErrorCode::PERMANENT
}
