pub mod datagram;
pub mod event_transport;
pub mod message_network;
pub mod snip;

use crate::config_mem::ConfigMemory;
use openlcb_core::error::ErrorCode;
use openlcb_core::event::EventId;
use openlcb_core::mti::Mti;
use openlcb_network::iface::{MessageHandler, MessageView, Node, Reply, RunState};

/// Application callback invoked when a consumed event arrives.
pub type EventConsumedCallback = fn(node: &Node, event: EventId);

/// Application callback invoked for an Event Learn message.
pub type EventLearnedCallback = fn(node: &mut Node, event: EventId);

/// The standard protocol handler set: message network, SNIP, event
/// transport and datagram/configuration-memory, multiplexed by MTI.
///
/// Plugs into the dispatcher as its [`MessageHandler`]; anything the
/// node does not implement draws an Optional Interaction Rejected.
pub struct StandardHandler<M: ConfigMemory> {
    pub config_mem: M,
    pub on_event_consumed: Option<EventConsumedCallback>,
    pub on_event_learned: Option<EventLearnedCallback>,
}

impl<M: ConfigMemory> StandardHandler<M> {
    pub fn new(config_mem: M) -> StandardHandler<M> {
        StandardHandler {
            config_mem,
            on_event_consumed: None,
            on_event_learned: None,
        }
    }
}

impl<M: ConfigMemory> MessageHandler for StandardHandler<M> {
    fn poll_login(&mut self, node: &mut Node, reply: &mut Reply) {
        match node.run_state {
            RunState::LoadInitializationComplete => {
                message_network::load_initialization_complete(node, reply);
            }
            RunState::LoadProducerEvents => {
                event_transport::load_producer_event(node, reply);
            }
            RunState::LoadConsumerEvents => {
                event_transport::load_consumer_event(node, reply);
            }
            _ => node.run_state = RunState::Run,
        }
    }

    fn handle_message(&mut self, node: &mut Node, msg: &MessageView, reply: &mut Reply) {
        match msg.mti {
            Mti::VERIFY_NODE_ID_GLOBAL
            | Mti::VERIFY_NODE_ID_ADDRESSED
            | Mti::VERIFIED_NODE_ID
            | Mti::VERIFIED_NODE_ID_SIMPLE
            | Mti::INITIALIZATION_COMPLETE
            | Mti::INITIALIZATION_COMPLETE_SIMPLE
            | Mti::PROTOCOL_SUPPORT_INQUIRY
            | Mti::OPTIONAL_INTERACTION_REJECTED
            | Mti::TERMINATE_DUE_TO_ERROR => message_network::handle(node, msg, reply),

            Mti::SIMPLE_NODE_INFO_REQUEST => snip::handle(&mut self.config_mem, node, msg, reply),

            Mti::EVENTS_IDENTIFY
            | Mti::EVENTS_IDENTIFY_DEST
            | Mti::CONSUMER_IDENTIFY
            | Mti::PRODUCER_IDENTIFY
            | Mti::PC_EVENT_REPORT
            | Mti::EVENT_LEARN => event_transport::handle(
                node,
                msg,
                reply,
                self.on_event_consumed,
                self.on_event_learned,
            ),

            Mti::DATAGRAM | Mti::DATAGRAM_OK_REPLY | Mti::DATAGRAM_REJECTED_REPLY => {
                datagram::handle(&mut self.config_mem, node, msg, reply)
            }

            other if other.is_addressed() => {
                // Addressed to us but nothing we speak.
                load_rejection(node, msg, reply, ErrorCode::PERMANENT_NOT_IMPLEMENTED);
            }

            _ => {}
        }
    }
}

/// Build an Optional Interaction Rejected reply for `msg`.
pub(crate) fn load_rejection(node: &Node, msg: &MessageView, reply: &mut Reply, code: ErrorCode) {
    reply.load(
        Mti::OPTIONAL_INTERACTION_REJECTED,
        node.alias,
        node.id,
        msg.source_alias,
        msg.source_id,
    );
    reply.push_bytes(&code.to_bytes());
    reply.push_bytes(&msg.mti.raw().to_be_bytes());
}
