use super::{EventConsumedCallback, EventLearnedCallback};
use openlcb_core::alias::Alias;
use openlcb_core::event::{EventId, EventStatus, EVENT_ID_SIZE};
use openlcb_core::mti::Mti;
use openlcb_core::node_id::NodeId;
use openlcb_network::iface::{MessageView, Node, Reply, RunState};

pub(crate) fn handle(
    node: &mut Node,
    msg: &MessageView,
    reply: &mut Reply,
    on_event_consumed: Option<EventConsumedCallback>,
    on_event_learned: Option<EventLearnedCallback>,
) {
    match msg.mti {
        Mti::EVENTS_IDENTIFY | Mti::EVENTS_IDENTIFY_DEST => {
            if !node.producers.enumerator.running && !node.consumers.enumerator.running {
                node.producers.enumerator.running = true;
                node.producers.enumerator.index = 0;
                node.producers.enumerator.range_index = 0;
            }
            let more = identify_step(node, reply);
            reply.enumerate = more;
        }
        Mti::CONSUMER_IDENTIFY => {
            let Some(event) = event_from_payload(msg.payload) else {
                return;
            };
            if node.consumers.contains(event) {
                let status = node.consumers.status_of(event).unwrap_or(EventStatus::Unknown);
                load_identified(reply, consumer_identified_mti(status), node, event);
            }
        }
        Mti::PRODUCER_IDENTIFY => {
            let Some(event) = event_from_payload(msg.payload) else {
                return;
            };
            if node.producers.contains(event) {
                let status = node.producers.status_of(event).unwrap_or(EventStatus::Unknown);
                load_identified(reply, producer_identified_mti(status), node, event);
            }
        }
        Mti::PC_EVENT_REPORT => {
            let Some(event) = event_from_payload(msg.payload) else {
                return;
            };
            if node.consumers.contains(event) {
                if let Some(callback) = on_event_consumed {
                    callback(node, event);
                }
            }
        }
        Mti::EVENT_LEARN => {
            let Some(event) = event_from_payload(msg.payload) else {
                return;
            };
            if let Some(callback) = on_event_learned {
                callback(node, event);
            }
        }
        _ => {}
    }
}

/// One Producer Identified per auto-created producer, one message per
/// dispatcher pass.
pub(crate) fn load_producer_event(node: &mut Node, reply: &mut Reply) {
    let index = node.producers.enumerator.index as usize;
    if index >= node.producers.list.len() {
        node.producers.enumerator = Default::default();
        node.consumers.enumerator.running = true;
        node.consumers.enumerator.index = 0;
        node.run_state = RunState::LoadConsumerEvents;
        return;
    }

    let entry = node.producers.list[index];
    node.producers.enumerator.index += 1;
    load_identified(reply, producer_identified_mti(entry.status), node, entry.event);

    if node.producers.enumerator.index as usize >= node.producers.list.len() {
        node.producers.enumerator = Default::default();
        node.consumers.enumerator.running = true;
        node.consumers.enumerator.index = 0;
        node.run_state = RunState::LoadConsumerEvents;
    }
}

/// One Consumer Identified per auto-created consumer; the node reaches
/// the running state when the inventory is finished.
pub(crate) fn load_consumer_event(node: &mut Node, reply: &mut Reply) {
    let index = node.consumers.enumerator.index as usize;
    if index >= node.consumers.list.len() {
        node.consumers.enumerator = Default::default();
        node.run_state = RunState::Run;
        return;
    }

    let entry = node.consumers.list[index];
    node.consumers.enumerator.index += 1;
    load_identified(reply, consumer_identified_mti(entry.status), node, entry.event);

    if node.consumers.enumerator.index as usize >= node.consumers.list.len() {
        node.consumers.enumerator = Default::default();
        node.run_state = RunState::Run;
    }
}

/// Emit the next Identify Events answer; returns whether more remain.
fn identify_step(node: &mut Node, reply: &mut Reply) -> bool {
    let alias = node.alias;
    let id = node.id;

    if node.producers.enumerator.running {
        let index = node.producers.enumerator.index as usize;
        if index < node.producers.list.len() {
            let entry = node.producers.list[index];
            node.producers.enumerator.index += 1;
            load_identified_raw(reply, producer_identified_mti(entry.status), alias, id, entry.event);
            return true;
        }
        let range_index = node.producers.enumerator.range_index as usize;
        if range_index < node.producers.ranges.len() {
            let range = node.producers.ranges[range_index];
            node.producers.enumerator.range_index += 1;
            load_identified_raw(
                reply,
                Mti::PRODUCER_RANGE_IDENTIFIED,
                alias,
                id,
                range_event_id(range.start, range.count),
            );
            return true;
        }
        node.producers.enumerator = Default::default();
        node.consumers.enumerator.running = true;
        node.consumers.enumerator.index = 0;
        node.consumers.enumerator.range_index = 0;
    }

    if node.consumers.enumerator.running {
        let index = node.consumers.enumerator.index as usize;
        if index < node.consumers.list.len() {
            let entry = node.consumers.list[index];
            node.consumers.enumerator.index += 1;
            load_identified_raw(reply, consumer_identified_mti(entry.status), alias, id, entry.event);
            return true;
        }
        let range_index = node.consumers.enumerator.range_index as usize;
        if range_index < node.consumers.ranges.len() {
            let range = node.consumers.ranges[range_index];
            node.consumers.enumerator.range_index += 1;
            load_identified_raw(
                reply,
                Mti::CONSUMER_RANGE_IDENTIFIED,
                alias,
                id,
                range_event_id(range.start, range.count),
            );
            return true;
        }
        node.consumers.enumerator = Default::default();
    }

    false
}

fn event_from_payload(payload: &[u8]) -> Option<EventId> {
    if payload.len() < EVENT_ID_SIZE {
        return None;
    }
    Some(EventId::from_bytes(&payload[..EVENT_ID_SIZE]))
}

/// A range is encoded as the base Event ID with the count mask in the
/// low bits.
fn range_event_id(start: EventId, count: u16) -> EventId {
    EventId::new(start.raw() | (count.saturating_sub(1)) as u64)
}

fn consumer_identified_mti(status: EventStatus) -> Mti {
    match status {
        EventStatus::Unknown => Mti::CONSUMER_IDENTIFIED_UNKNOWN,
        EventStatus::Set => Mti::CONSUMER_IDENTIFIED_SET,
        EventStatus::Clear => Mti::CONSUMER_IDENTIFIED_CLEAR,
    }
}

fn producer_identified_mti(status: EventStatus) -> Mti {
    match status {
        EventStatus::Unknown => Mti::PRODUCER_IDENTIFIED_UNKNOWN,
        EventStatus::Set => Mti::PRODUCER_IDENTIFIED_SET,
        EventStatus::Clear => Mti::PRODUCER_IDENTIFIED_CLEAR,
    }
}

fn load_identified(reply: &mut Reply, mti: Mti, node: &Node, event: EventId) {
    load_identified_raw(reply, mti, node.alias, node.id, event);
}

fn load_identified_raw(reply: &mut Reply, mti: Mti, alias: Alias, id: NodeId, event: EventId) {
    reply.load(mti, alias, id, Alias::UNASSIGNED, NodeId::NONE);
    reply.push_bytes(&event.to_bytes());
}

#[cfg(test)]
mod test {
    use super::*;
    use openlcb_core::parameters::NodeParameters;
    use openlcb_network::iface::NodeFlags;

    static PARAMS: NodeParameters = NodeParameters::new();

    fn node() -> Node<'static> {
        Node {
            id: NodeId::new(0x0605_0403_0201),
            alias: Alias::new(0xBBB),
            seed: 0,
            flags: NodeFlags::PERMITTED | NodeFlags::INITIALIZED,
            run_state: RunState::Run,
            timer_ticks: 0,
            producers: Default::default(),
            consumers: Default::default(),
            parameters: &PARAMS,
            last_received_datagram: None,
            index: 0,
        }
    }

    fn view<'m>(mti: Mti, payload: &'m [u8]) -> MessageView<'m> {
        MessageView {
            mti,
            source_alias: Alias::new(0xAAA),
            dest_alias: Alias::UNASSIGNED,
            source_id: NodeId::NONE,
            dest_id: NodeId::NONE,
            payload,
        }
    }

    #[test]
    fn test_identify_events_enumerates_everything() {
        let mut node = node();
        node.producers.add(EventId::new(0x10));
        node.producers.add(EventId::new(0x11));
        node.consumers.add(EventId::new(0x20));

        let msg_bytes = [];
        let msg = view(Mti::EVENTS_IDENTIFY, &msg_bytes);
        let mut seen = alloc::vec::Vec::new();

        // The dispatcher keeps calling while `enumerate` stays set.
        loop {
            let mut reply = Reply::new();
            handle(&mut node, &msg, &mut reply, None, None);
            if reply.is_valid() {
                seen.push((reply.mti(), EventId::from_bytes(reply.payload())));
            }
            if !reply.enumerate {
                break;
            }
        }

        assert_eq!(
            seen,
            alloc::vec![
                (Mti::PRODUCER_IDENTIFIED_UNKNOWN, EventId::new(0x10)),
                (Mti::PRODUCER_IDENTIFIED_UNKNOWN, EventId::new(0x11)),
                (Mti::CONSUMER_IDENTIFIED_UNKNOWN, EventId::new(0x20)),
            ],
        );
        assert!(!node.producers.enumerator.running);
        assert!(!node.consumers.enumerator.running);
    }

    #[test]
    fn test_identify_events_includes_ranges() {
        let mut node = node();
        node.producers.add_range(EventId::new(0x0605_0403_0201_0000), 16);

        let msg = view(Mti::EVENTS_IDENTIFY, &[]);
        let mut reply = Reply::new();
        handle(&mut node, &msg, &mut reply, None, None);

        assert_eq!(reply.mti(), Mti::PRODUCER_RANGE_IDENTIFIED);
        assert_eq!(
            EventId::from_bytes(reply.payload()),
            EventId::new(0x0605_0403_0201_000F),
        );
    }

    #[test]
    fn test_consumer_identify_answers_for_known_event() {
        let mut node = node();
        node.consumers.add(EventId::new(0x20));

        let payload = EventId::new(0x20).to_bytes();
        let mut reply = Reply::new();
        handle(&mut node, &view(Mti::CONSUMER_IDENTIFY, &payload), &mut reply, None, None);
        assert_eq!(reply.mti(), Mti::CONSUMER_IDENTIFIED_UNKNOWN);

        let payload = EventId::new(0x21).to_bytes();
        let mut reply = Reply::new();
        handle(&mut node, &view(Mti::CONSUMER_IDENTIFY, &payload), &mut reply, None, None);
        assert!(!reply.is_valid());
    }

    #[test]
    fn test_pcer_reaches_consumer_callback() {
        use core::sync::atomic::{AtomicU64, Ordering};

        static CONSUMED: AtomicU64 = AtomicU64::new(0);
        fn record(_node: &Node, event: EventId) {
            CONSUMED.store(event.raw(), Ordering::Relaxed);
        }

        let mut node = node();
        node.consumers.add(EventId::new(0x20));

        let payload = EventId::new(0x20).to_bytes();
        let mut reply = Reply::new();
        handle(
            &mut node,
            &view(Mti::PC_EVENT_REPORT, &payload),
            &mut reply,
            Some(record),
            None,
        );

        assert_eq!(CONSUMED.load(Ordering::Relaxed), 0x20);
        assert!(!reply.is_valid());
    }

    #[test]
    fn test_login_event_inventory_walks_to_run() {
        let mut node = node();
        node.producers.add(EventId::from_node(node.id, 0));
        node.producers.add(EventId::from_node(node.id, 1));
        node.consumers.add(EventId::from_node(node.id, 0));
        node.run_state = RunState::LoadProducerEvents;
        node.producers.enumerator.running = true;

        let mut reply = Reply::new();
        load_producer_event(&mut node, &mut reply);
        assert_eq!(reply.mti(), Mti::PRODUCER_IDENTIFIED_UNKNOWN);
        assert_eq!(
            EventId::from_bytes(reply.payload()),
            EventId::from_node(node.id, 0),
        );
        assert_eq!(node.run_state, RunState::LoadProducerEvents);

        let mut reply = Reply::new();
        load_producer_event(&mut node, &mut reply);
        assert_eq!(
            EventId::from_bytes(reply.payload()),
            EventId::from_node(node.id, 1),
        );
        assert_eq!(node.run_state, RunState::LoadConsumerEvents);

        let mut reply = Reply::new();
        load_consumer_event(&mut node, &mut reply);
        assert_eq!(reply.mti(), Mti::CONSUMER_IDENTIFIED_UNKNOWN);
        assert_eq!(node.run_state, RunState::Run);
    }

    #[test]
    fn test_login_event_inventory_with_no_events() {
        let mut node = node();
        node.run_state = RunState::LoadProducerEvents;

        let mut reply = Reply::new();
        load_producer_event(&mut node, &mut reply);
        assert!(!reply.is_valid());
        assert_eq!(node.run_state, RunState::LoadConsumerEvents);

        let mut reply = Reply::new();
        load_consumer_event(&mut node, &mut reply);
        assert!(!reply.is_valid());
        assert_eq!(node.run_state, RunState::Run);
    }
}
