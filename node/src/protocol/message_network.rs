use openlcb_core::alias::Alias;
use openlcb_core::event::EventId;
use openlcb_core::mti::Mti;
use openlcb_core::node_id::{NodeId, NODE_ID_SIZE};
use openlcb_core::parameters::ProtocolSupport;
use openlcb_network::iface::{MessageView, Node, NodeFlags, Reply, RunState};

/// First step of the OpenLCB-level login: announce the node and start
/// the event inventory.
pub(crate) fn load_initialization_complete(node: &mut Node, reply: &mut Reply) {
    reply.load(
        initialization_complete_mti(node),
        node.alias,
        node.id,
        Alias::UNASSIGNED,
        NodeId::NONE,
    );
    reply.push_bytes(&node.id.to_bytes());

    node.flags.insert(NodeFlags::INITIALIZED);
    node.producers.enumerator.running = true;
    node.producers.enumerator.index = 0;
    node.consumers.enumerator = Default::default();
    node.run_state = RunState::LoadProducerEvents;
}

pub(crate) fn handle(node: &mut Node, msg: &MessageView, reply: &mut Reply) {
    match msg.mti {
        Mti::VERIFY_NODE_ID_GLOBAL => {
            // A payload narrows the question to one Node ID.
            if msg.payload.len() >= NODE_ID_SIZE
                && NodeId::from_bytes(&msg.payload[..NODE_ID_SIZE]) != node.id
            {
                return;
            }
            load_verified_node_id(node, reply);
        }
        Mti::VERIFY_NODE_ID_ADDRESSED => {
            load_verified_node_id(node, reply);
        }
        Mti::PROTOCOL_SUPPORT_INQUIRY => {
            reply.load(
                Mti::PROTOCOL_SUPPORT_REPLY,
                node.alias,
                node.id,
                msg.source_alias,
                msg.source_id,
            );
            let firmware_active = node.flags.contains(NodeFlags::FIRMWARE_UPGRADE_ACTIVE);
            reply.push_bytes(
                &node
                    .parameters
                    .protocol_support
                    .to_reply_bytes(firmware_active),
            );
        }
        Mti::VERIFIED_NODE_ID
        | Mti::VERIFIED_NODE_ID_SIMPLE
        | Mti::INITIALIZATION_COMPLETE
        | Mti::INITIALIZATION_COMPLETE_SIMPLE => {
            check_for_duplicate_node_id(node, msg, reply);
        }
        // Nothing to do beyond noting the peer's complaint.
        Mti::OPTIONAL_INTERACTION_REJECTED | Mti::TERMINATE_DUE_TO_ERROR => {}
        _ => {}
    }
}

fn load_verified_node_id(node: &Node, reply: &mut Reply) {
    let mti = if node
        .parameters
        .protocol_support
        .contains(ProtocolSupport::SIMPLE)
    {
        Mti::VERIFIED_NODE_ID_SIMPLE
    } else {
        Mti::VERIFIED_NODE_ID
    };
    reply.load(mti, node.alias, node.id, Alias::UNASSIGNED, NodeId::NONE);
    reply.push_bytes(&node.id.to_bytes());
}

fn initialization_complete_mti(node: &Node) -> Mti {
    if node
        .parameters
        .protocol_support
        .contains(ProtocolSupport::SIMPLE)
    {
        Mti::INITIALIZATION_COMPLETE_SIMPLE
    } else {
        Mti::INITIALIZATION_COMPLETE
    }
}

/// Another node announcing our Node ID means a duplicate on the
/// network; broadcast the well-known event once.
fn check_for_duplicate_node_id(node: &mut Node, msg: &MessageView, reply: &mut Reply) {
    if msg.payload.len() < NODE_ID_SIZE
        || NodeId::from_bytes(&msg.payload[..NODE_ID_SIZE]) != node.id
        || msg.source_alias == node.alias
    {
        return;
    }

    if node.flags.contains(NodeFlags::DUPLICATE_ID_DETECTED) {
        return;
    }
    node.flags.insert(NodeFlags::DUPLICATE_ID_DETECTED);

    reply.load(
        Mti::PC_EVENT_REPORT,
        node.alias,
        node.id,
        Alias::UNASSIGNED,
        NodeId::NONE,
    );
    reply.push_bytes(&EventId::DUPLICATE_NODE_DETECTED.to_bytes());
}
