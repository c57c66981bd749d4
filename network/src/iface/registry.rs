use crate::config;
use crate::storage::MessageHandle;
use bitflags::bitflags;
use heapless::Vec;
use managed::ManagedSlice;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use openlcb_core::alias::Alias;
use openlcb_core::event::{EventId, EventStatus};
use openlcb_core::node_id::NodeId;
use openlcb_core::parameters::NodeParameters;

bitflags! {
    /// State flags of a virtual node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct NodeFlags: u8 {
        /// Login acquired a CAN alias; the node may transmit.
        const PERMITTED = 0x01;
        /// Initialization Complete was sent; fully operational.
        const INITIALIZED = 0x02;
        /// Another node on the network claims our Node ID.
        const DUPLICATE_ID_DETECTED = 0x04;
        /// The receive context saw our alias used by another node.
        const DUPLICATE_ALIAS_DETECTED = 0x08;
        /// A datagram ACK went out; the actual reply is still owed.
        const DATAGRAM_ACK_SENT = 0x10;
        /// Retry the held datagram instead of building a new reply.
        const RESEND_DATAGRAM = 0x20;
        /// Firmware upgrade in progress.
        const FIRMWARE_UPGRADE_ACTIVE = 0x40;
    }
}

/// Position in the login sequence.
///
/// `Init` through `LoadAmd` belong to the CAN alias acquisition state
/// machine; the three `Load*` states after it are the OpenLCB-level
/// continuation; `Run` is normal operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunState {
    #[default]
    Init = 0,
    GenerateSeed,
    GenerateAlias,
    LoadCid7,
    LoadCid6,
    LoadCid5,
    LoadCid4,
    Wait200ms,
    LoadRid,
    LoadAmd,
    LoadInitializationComplete,
    LoadProducerEvents,
    LoadConsumerEvents,
    Run,
}

/// One produced or consumed Event ID with its reported status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventEntry {
    pub event: EventId,
    pub status: EventStatus,
}

/// A consecutive block of Event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventRange {
    pub start: EventId,
    /// Number of consecutive IDs; a power of two per the standard.
    pub count: u16,
}

/// Walk state for multi-reply enumeration over an event list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventEnumerator {
    pub running: bool,
    pub index: u16,
    pub range_index: u16,
}

/// The produced or consumed events of one node.
#[derive(Debug, Default)]
pub struct EventList<const N: usize, const R: usize> {
    pub list: Vec<EventEntry, N>,
    pub ranges: Vec<EventRange, R>,
    pub enumerator: EventEnumerator,
}

impl<const N: usize, const R: usize> EventList<N, R> {
    /// Register an event, ignoring duplicates. `false` when the list
    /// is full.
    pub fn add(&mut self, event: EventId) -> bool {
        if self.list.iter().any(|e| e.event == event) {
            return true;
        }
        self.list
            .push(EventEntry {
                event,
                status: EventStatus::Unknown,
            })
            .is_ok()
    }

    pub fn remove(&mut self, event: EventId) {
        if let Some(position) = self.list.iter().position(|e| e.event == event) {
            self.list.swap_remove(position);
        }
    }

    pub fn add_range(&mut self, start: EventId, count: u16) -> bool {
        self.ranges.push(EventRange { start, count }).is_ok()
    }

    pub fn contains(&self, event: EventId) -> bool {
        self.list.iter().any(|e| e.event == event)
            || self
                .ranges
                .iter()
                .any(|r| (r.start.raw()..r.start.raw() + r.count as u64).contains(&event.raw()))
    }

    pub fn status_of(&self, event: EventId) -> Option<EventStatus> {
        self.list.iter().find(|e| e.event == event).map(|e| e.status)
    }
}

pub type ProducerList =
    EventList<{ config::MAX_PRODUCER_EVENTS }, { config::MAX_PRODUCER_EVENT_RANGES }>;
pub type ConsumerList =
    EventList<{ config::MAX_CONSUMER_EVENTS }, { config::MAX_CONSUMER_EVENT_RANGES }>;

/// One virtual node.
///
/// Allocated from the registry's fixed table and never deallocated.
#[derive(Debug)]
pub struct Node<'p> {
    pub id: NodeId,
    pub alias: Alias,
    /// Working seed of the alias generator.
    pub seed: u64,
    pub flags: NodeFlags,
    pub run_state: RunState,
    /// Incremented by the 100 ms tick; the login wait state reads it.
    pub timer_ticks: u16,
    pub producers: ProducerList,
    pub consumers: ConsumerList,
    pub parameters: &'p NodeParameters,
    /// Datagram retained while its reply is produced.
    pub last_received_datagram: Option<MessageHandle>,
    pub index: u8,
}

impl<'p> Node<'p> {
    fn new(id: NodeId, parameters: &'p NodeParameters, index: u8) -> Node<'p> {
        Node {
            id,
            alias: Alias::UNASSIGNED,
            seed: 0,
            flags: NodeFlags::empty(),
            run_state: RunState::Init,
            timer_ticks: 0,
            producers: ProducerList::default(),
            consumers: ConsumerList::default(),
            parameters,
            last_received_datagram: None,
            index,
        }
    }

    pub fn is_permitted(&self) -> bool {
        self.flags.contains(NodeFlags::PERMITTED)
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.contains(NodeFlags::INITIALIZED)
    }
}

/// Subsystems that keep an independent enumeration cursor over the
/// node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnumeratorKey {
    Dispatcher = 0,
    Timer = 1,
    Application = 2,
}

const ENUMERATOR_COUNT: usize = 3;

/// Fixed table of virtual nodes with per-subsystem enumeration.
pub struct NodeRegistry<'a, 'p> {
    nodes: ManagedSlice<'a, Option<Node<'p>>>,
    count: u16,
    cursors: [usize; ENUMERATOR_COUNT],
}

impl<'a, 'p> NodeRegistry<'a, 'p> {
    pub fn new<S>(nodes: S) -> NodeRegistry<'a, 'p>
    where
        S: Into<ManagedSlice<'a, Option<Node<'p>>>>,
    {
        let mut registry = NodeRegistry {
            nodes: nodes.into(),
            count: 0,
            cursors: [0; ENUMERATOR_COUNT],
        };
        for slot in registry.nodes.iter_mut() {
            *slot = None;
        }
        registry
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Claim the first free slot for a new virtual node.
    ///
    /// Nodes never free; `None` means the table is full.
    pub fn allocate(
        &mut self,
        id: NodeId,
        parameters: &'p NodeParameters,
    ) -> Option<&mut Node<'p>> {
        if !id.is_valid() || self.find_by_node_id(id).is_some() {
            return None;
        }
        let slot = self.nodes.iter().position(|n| n.is_none())?;
        self.nodes[slot] = Some(Node::new(id, parameters, slot as u8));
        self.count += 1;
        self.nodes[slot].as_mut()
    }

    pub fn get(&self, index: u8) -> Option<&Node<'p>> {
        self.nodes.get(index as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, index: u8) -> Option<&mut Node<'p>> {
        self.nodes.get_mut(index as usize)?.as_mut()
    }

    pub fn find_by_alias(&mut self, alias: Alias) -> Option<&mut Node<'p>> {
        if !alias.is_assigned() {
            return None;
        }
        self.nodes
            .iter_mut()
            .flatten()
            .find(|node| node.alias == alias)
    }

    pub fn find_by_node_id(&mut self, id: NodeId) -> Option<&mut Node<'p>> {
        self.nodes.iter_mut().flatten().find(|node| node.id == id)
    }

    /// Restart `key`'s cursor and return the first node.
    pub fn get_first(&mut self, key: EnumeratorKey) -> Option<&mut Node<'p>> {
        self.cursors[key as usize] = 0;
        self.get_next(key)
    }

    /// Return the node under `key`'s cursor and advance it.
    pub fn get_next(&mut self, key: EnumeratorKey) -> Option<&mut Node<'p>> {
        let start = self.cursors[key as usize];
        for index in start..self.nodes.len() {
            if self.nodes[index].is_some() {
                self.cursors[key as usize] = index + 1;
                return self.nodes[index].as_mut();
            }
        }
        self.cursors[key as usize] = self.nodes.len();
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static PARAMS: NodeParameters = NodeParameters::new();

    fn registry() -> NodeRegistry<'static, 'static> {
        NodeRegistry::new(alloc::vec::Vec::from_iter((0..3).map(|_| None)))
    }

    #[test]
    fn test_allocate_assigns_indices() {
        let mut registry = registry();

        let first = registry.allocate(NodeId::new(1), &PARAMS).unwrap().index;
        let second = registry.allocate(NodeId::new(2), &PARAMS).unwrap().index;
        assert_eq!((first, second), (0, 1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_allocate_rejects_duplicates_and_overflow() {
        let mut registry = registry();

        assert!(registry.allocate(NodeId::new(1), &PARAMS).is_some());
        assert!(registry.allocate(NodeId::new(1), &PARAMS).is_none());
        assert!(registry.allocate(NodeId::NONE, &PARAMS).is_none());
        assert!(registry.allocate(NodeId::new(2), &PARAMS).is_some());
        assert!(registry.allocate(NodeId::new(3), &PARAMS).is_some());
        assert!(registry.allocate(NodeId::new(4), &PARAMS).is_none());
    }

    #[test]
    fn test_find_by_alias() {
        let mut registry = registry();

        registry.allocate(NodeId::new(1), &PARAMS).unwrap().alias = Alias::new(0xBBB);
        registry.allocate(NodeId::new(2), &PARAMS).unwrap().alias = Alias::new(0xCCC);

        assert_eq!(registry.find_by_alias(Alias::new(0xCCC)).unwrap().id, NodeId::new(2));
        assert!(registry.find_by_alias(Alias::new(0xDDD)).is_none());
        assert!(registry.find_by_alias(Alias::UNASSIGNED).is_none());
    }

    #[test]
    fn test_independent_cursors() {
        let mut registry = registry();
        registry.allocate(NodeId::new(1), &PARAMS).unwrap();
        registry.allocate(NodeId::new(2), &PARAMS).unwrap();

        assert_eq!(registry.get_first(EnumeratorKey::Dispatcher).unwrap().id, NodeId::new(1));
        assert_eq!(registry.get_first(EnumeratorKey::Timer).unwrap().id, NodeId::new(1));
        assert_eq!(registry.get_next(EnumeratorKey::Dispatcher).unwrap().id, NodeId::new(2));
        // The timer cursor did not move with the dispatcher cursor.
        assert_eq!(registry.get_next(EnumeratorKey::Timer).unwrap().id, NodeId::new(2));
        assert!(registry.get_next(EnumeratorKey::Dispatcher).is_none());
    }

    #[test]
    fn test_event_list_add_remove() {
        let mut node_events: ProducerList = ProducerList::default();

        assert!(node_events.add(EventId::new(0x10)));
        assert!(node_events.add(EventId::new(0x10)));
        assert_eq!(node_events.list.len(), 1);
        assert!(node_events.contains(EventId::new(0x10)));

        node_events.remove(EventId::new(0x10));
        assert!(!node_events.contains(EventId::new(0x10)));

        node_events.add_range(EventId::new(0x100), 16);
        assert!(node_events.contains(EventId::new(0x10F)));
        assert!(!node_events.contains(EventId::new(0x110)));
    }
}
