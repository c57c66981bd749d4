//! Application-facing operations on a running interface: event
//! registration and transmission.
//!
//! Everything here queues through the interface's dispatch FIFO, so
//! calls are safe from the main loop at any time; messages go out on
//! subsequent polls.

use openlcb_core::alias::Alias;
use openlcb_core::event::EventId;
use openlcb_core::mti::Mti;
use openlcb_core::node_id::NodeId;
use openlcb_core::payload::PayloadKind;
use openlcb_network::iface::{Interface, SendError};
use openlcb_network::phy::SharedLock;

/// Error returned by the application operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApplicationError {
    /// No node at that index.
    UnknownNode,
    /// The node has not finished logging in.
    NotPermitted,
    /// The event list is full.
    EventListFull,
    /// Queueing the message failed; retry later.
    Send(SendError),
}

impl core::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ApplicationError::UnknownNode => write!(f, "unknown node"),
            ApplicationError::NotPermitted => write!(f, "not permitted"),
            ApplicationError::EventListFull => write!(f, "event list full"),
            ApplicationError::Send(e) => write!(f, "send: {e}"),
        }
    }
}

/// Register an event this node consumes.
pub fn register_consumer<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    event: EventId,
) -> Result<(), ApplicationError> {
    let node = iface
        .node_mut(node_index)
        .ok_or(ApplicationError::UnknownNode)?;
    if node.consumers.add(event) {
        Ok(())
    } else {
        Err(ApplicationError::EventListFull)
    }
}

/// Register an event this node produces.
pub fn register_producer<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    event: EventId,
) -> Result<(), ApplicationError> {
    let node = iface
        .node_mut(node_index)
        .ok_or(ApplicationError::UnknownNode)?;
    if node.producers.add(event) {
        Ok(())
    } else {
        Err(ApplicationError::EventListFull)
    }
}

pub fn unregister_consumer<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    event: EventId,
) -> Result<(), ApplicationError> {
    let node = iface
        .node_mut(node_index)
        .ok_or(ApplicationError::UnknownNode)?;
    node.consumers.remove(event);
    Ok(())
}

pub fn unregister_producer<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    event: EventId,
) -> Result<(), ApplicationError> {
    let node = iface
        .node_mut(node_index)
        .ok_or(ApplicationError::UnknownNode)?;
    node.producers.remove(event);
    Ok(())
}

/// Register a consecutive block of consumed events.
pub fn register_consumer_range<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    start: EventId,
    count: u16,
) -> Result<(), ApplicationError> {
    let node = iface
        .node_mut(node_index)
        .ok_or(ApplicationError::UnknownNode)?;
    if node.consumers.add_range(start, count) {
        Ok(())
    } else {
        Err(ApplicationError::EventListFull)
    }
}

/// Register a consecutive block of produced events.
pub fn register_producer_range<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    start: EventId,
    count: u16,
) -> Result<(), ApplicationError> {
    let node = iface
        .node_mut(node_index)
        .ok_or(ApplicationError::UnknownNode)?;
    if node.producers.add_range(start, count) {
        Ok(())
    } else {
        Err(ApplicationError::EventListFull)
    }
}

/// Broadcast a Producer/Consumer Event Report.
pub fn send_event_report<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    event: EventId,
) -> Result<(), ApplicationError> {
    send_event_message(iface, node_index, Mti::PC_EVENT_REPORT, event)
}

/// Teach an event to the listening configuration tools.
pub fn send_teach_event<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    event: EventId,
) -> Result<(), ApplicationError> {
    send_event_message(iface, node_index, Mti::EVENT_LEARN, event)
}

fn send_event_message<L: SharedLock>(
    iface: &mut Interface<'_, '_, L>,
    node_index: u8,
    mti: Mti,
    event: EventId,
) -> Result<(), ApplicationError> {
    let (alias, id, permitted) = {
        let node = iface
            .node(node_index)
            .ok_or(ApplicationError::UnknownNode)?;
        (node.alias, node.id, node.is_permitted())
    };
    if !permitted {
        return Err(ApplicationError::NotPermitted);
    }

    iface
        .send_message(
            PayloadKind::Basic,
            mti,
            alias,
            id,
            Alias::UNASSIGNED,
            NodeId::NONE,
            &event.to_bytes(),
        )
        .map_err(ApplicationError::Send)
}
