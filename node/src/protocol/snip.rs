use crate::config_mem::ConfigMemory;
use openlcb_core::mti::Mti;
use openlcb_core::parameters::space;
use openlcb_network::iface::{MessageView, Node, Reply};

/// Maximum user name length, terminator included.
const LEN_USER_NAME: usize = 63;

/// Maximum user description length, terminator included.
const LEN_USER_DESCRIPTION: usize = 64;

/// Build the Simple Node Information reply.
///
/// The manufacturer block comes from the node parameters; the user
/// name and description are fetched from configuration memory at the
/// configured base addresses.
pub(crate) fn handle<M: ConfigMemory>(
    config_mem: &mut M,
    node: &mut Node,
    msg: &MessageView,
    reply: &mut Reply,
) {
    reply.load(
        Mti::SIMPLE_NODE_INFO_REPLY,
        node.alias,
        node.id,
        msg.source_alias,
        msg.source_id,
    );

    let snip = &node.parameters.snip;
    reply.push_bytes(&[snip.mfg_version]);
    push_string(reply, snip.name);
    push_string(reply, snip.model);
    push_string(reply, snip.hardware_version);
    push_string(reply, snip.software_version);
    reply.push_bytes(&[snip.user_version]);

    push_config_mem_string(
        config_mem,
        node,
        node.parameters.config_mem_user_name_address,
        LEN_USER_NAME,
        reply,
    );
    push_config_mem_string(
        config_mem,
        node,
        node.parameters.config_mem_user_description_address,
        LEN_USER_DESCRIPTION,
        reply,
    );
}

fn push_string(reply: &mut Reply, value: &str) {
    reply.push_bytes(value.as_bytes());
    reply.push_bytes(&[0]);
}

fn push_config_mem_string<M: ConfigMemory>(
    config_mem: &mut M,
    node: &Node,
    address: u32,
    max_len: usize,
    reply: &mut Reply,
) {
    let mut buffer = [0u8; LEN_USER_DESCRIPTION];
    let buffer = &mut buffer[..max_len];

    match config_mem.read(node, space::CONFIGURATION_MEMORY, address, buffer) {
        Ok(count) => {
            let text = &buffer[..count];
            let text = match text.iter().position(|b| *b == 0) {
                Some(terminator) => &text[..terminator],
                None => text,
            };
            reply.push_bytes(text);
            reply.push_bytes(&[0]);
        }
        Err(_) => {
            // No user data to offer; an empty string keeps the reply
            // well formed.
            reply.push_bytes(&[0]);
        }
    }
}
