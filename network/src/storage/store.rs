use bitflags::bitflags;
use core::fmt;
use managed::ManagedSlice;
use openlcb_core::alias::Alias;
use openlcb_core::mti::Mti;
use openlcb_core::node_id::NodeId;
use openlcb_core::payload::{
    PayloadKind, LEN_PAYLOAD_BASIC, LEN_PAYLOAD_DATAGRAM, LEN_PAYLOAD_SNIP, LEN_PAYLOAD_STREAM,
};

bitflags! {
    /// Lifecycle flags of a message record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct MessageState: u8 {
        /// The record is linked to a payload slot and in use.
        const ALLOCATED = 0x01;
        /// Multi-frame assembly has started but not completed.
        const INPROCESS = 0x02;
    }
}

/// Stable index of a message record in the buffer store.
///
/// Handles stay valid while the record's reference count is non-zero;
/// queues and nodes hold handles, never references, so the pool can be
/// shared between the receive context and the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageHandle(u16);

impl MessageHandle {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "msg#{}", self.0)
    }
}

/// The universal message record of the stack.
///
/// One record describes one OpenLCB message in flight, from frame
/// assembly through dispatch and transmission. The payload lives in a
/// separate slot owned by the store and selected by the record's kind.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    pub state: MessageState,
    pub mti: Mti,
    pub source_alias: Alias,
    pub dest_alias: Alias,
    pub source_id: NodeId,
    pub dest_id: NodeId,
    pub payload_kind: PayloadKind,
    /// Valid bytes currently in the payload slot.
    pub payload_count: u16,
    /// Countdown used by the datagram layer while a reply is pending.
    pub timer_ticks: u8,
    reference_count: u8,
}

impl Message {
    const fn empty(kind: PayloadKind) -> Message {
        Message {
            state: MessageState::empty(),
            mti: Mti::NONE,
            source_alias: Alias::UNASSIGNED,
            dest_alias: Alias::UNASSIGNED,
            source_id: NodeId::NONE,
            dest_id: NodeId::NONE,
            payload_kind: kind,
            payload_count: 0,
            timer_ticks: 0,
            reference_count: 0,
        }
    }

    /// Fill in the routing header in one call.
    pub fn load_header(
        &mut self,
        mti: Mti,
        source_alias: Alias,
        source_id: NodeId,
        dest_alias: Alias,
        dest_id: NodeId,
    ) {
        self.mti = mti;
        self.source_alias = source_alias;
        self.source_id = source_id;
        self.dest_alias = dest_alias;
        self.dest_id = dest_id;
    }

    pub const fn is_allocated(&self) -> bool {
        self.state.contains(MessageState::ALLOCATED)
    }

    pub const fn is_inprocess(&self) -> bool {
        self.state.contains(MessageState::INPROCESS)
    }

    pub const fn reference_count(&self) -> u8 {
        self.reference_count
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::empty(PayloadKind::Basic)
    }
}

/// Allocation counters of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolMetrics {
    pub currently_allocated: u16,
    pub max_ever_allocated: u16,
}

/// Segregated pools of reference-counted message records.
///
/// Records are partitioned by payload category in pool order (Basic,
/// Datagram, Snip, Stream) so that a record's index also selects its
/// payload slot. The records slice must therefore be exactly as long
/// as the four payload pools together.
///
/// The receive interrupt and the main loop share the store; every
/// access from either side runs inside the platform's shared-resource
/// lock.
pub struct BufferStore<'a> {
    records: ManagedSlice<'a, Message>,
    basic: ManagedSlice<'a, [u8; LEN_PAYLOAD_BASIC]>,
    datagram: ManagedSlice<'a, [u8; LEN_PAYLOAD_DATAGRAM]>,
    snip: ManagedSlice<'a, [u8; LEN_PAYLOAD_SNIP]>,
    stream: ManagedSlice<'a, [u8; LEN_PAYLOAD_STREAM]>,
    metrics: [PoolMetrics; PayloadKind::COUNT],
}

impl<'a> BufferStore<'a> {
    /// Create a buffer store over caller-provided storage.
    ///
    /// # Panics
    /// Panics unless `records` is exactly as long as the four payload
    /// pools combined.
    pub fn new<R, B, D, S, T>(records: R, basic: B, datagram: D, snip: S, stream: T) -> BufferStore<'a>
    where
        R: Into<ManagedSlice<'a, Message>>,
        B: Into<ManagedSlice<'a, [u8; LEN_PAYLOAD_BASIC]>>,
        D: Into<ManagedSlice<'a, [u8; LEN_PAYLOAD_DATAGRAM]>>,
        S: Into<ManagedSlice<'a, [u8; LEN_PAYLOAD_SNIP]>>,
        T: Into<ManagedSlice<'a, [u8; LEN_PAYLOAD_STREAM]>>,
    {
        let mut store = BufferStore {
            records: records.into(),
            basic: basic.into(),
            datagram: datagram.into(),
            snip: snip.into(),
            stream: stream.into(),
            metrics: [PoolMetrics::default(); PayloadKind::COUNT],
        };

        assert_eq!(
            store.records.len(),
            store.basic.len() + store.datagram.len() + store.snip.len() + store.stream.len(),
            "record storage must match the payload pools",
        );

        for index in 0..store.records.len() {
            let kind = store.kind_of_index(index);
            store.records[index] = Message::empty(kind);
        }

        store
    }

    /// Total number of records across all pools.
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of payload slots in one pool.
    pub fn pool_depth(&self, kind: PayloadKind) -> usize {
        match kind {
            PayloadKind::Basic => self.basic.len(),
            PayloadKind::Datagram => self.datagram.len(),
            PayloadKind::Snip => self.snip.len(),
            PayloadKind::Stream => self.stream.len(),
        }
    }

    /// Allocation counters for one pool.
    pub fn metrics(&self, kind: PayloadKind) -> PoolMetrics {
        self.metrics[kind as usize]
    }

    /// Reset the high-water marks, keeping current allocation counts.
    pub fn clear_max_allocated(&mut self) {
        for metric in self.metrics.iter_mut() {
            metric.max_ever_allocated = metric.currently_allocated;
        }
    }

    /// Allocate a zeroed record linked to a free payload slot of the
    /// requested kind, with a reference count of one.
    ///
    /// `None` means the pool is exhausted. That is expected under load
    /// and not an error; the caller reports it upward, typically as
    /// `ERROR_TEMPORARY_BUFFER_UNAVAILABLE`.
    pub fn allocate(&mut self, kind: PayloadKind) -> Option<MessageHandle> {
        let range = self.kind_range(kind);

        for index in range {
            if !self.records[index].is_allocated() {
                self.records[index] = Message::empty(kind);
                self.records[index].state = MessageState::ALLOCATED;
                self.records[index].reference_count = 1;
                self.payload_slot_mut(index).fill(0);

                let metric = &mut self.metrics[kind as usize];
                metric.currently_allocated += 1;
                metric.max_ever_allocated = metric.max_ever_allocated.max(metric.currently_allocated);

                return Some(MessageHandle(index as u16));
            }
        }

        net_trace!("store: pool {} exhausted", kind as u8);
        None
    }

    /// Add a reference to an allocated record.
    pub fn inc_ref(&mut self, handle: MessageHandle) {
        let msg = &mut self.records[handle.index()];
        debug_assert!(msg.is_allocated(), "inc_ref of a free record");
        msg.reference_count += 1;
    }

    /// Drop a reference; the record returns to its pool when the count
    /// reaches zero.
    pub fn free(&mut self, handle: MessageHandle) {
        let index = handle.index();
        let kind = self.records[index].payload_kind;

        {
            let msg = &mut self.records[index];
            debug_assert!(msg.is_allocated(), "free of an unallocated record");
            debug_assert!(msg.reference_count > 0, "free of an unreferenced record");
            if !msg.is_allocated() || msg.reference_count == 0 {
                return;
            }
            msg.reference_count -= 1;
            if msg.reference_count > 0 {
                return;
            }
            *msg = Message::empty(kind);
        }

        self.metrics[kind as usize].currently_allocated -= 1;
    }

    pub fn msg(&self, handle: MessageHandle) -> &Message {
        &self.records[handle.index()]
    }

    pub fn msg_mut(&mut self, handle: MessageHandle) -> &mut Message {
        &mut self.records[handle.index()]
    }

    /// The valid payload bytes of a record.
    pub fn payload(&self, handle: MessageHandle) -> &[u8] {
        let count = self.records[handle.index()].payload_count as usize;
        &self.payload_slot(handle.index())[..count]
    }

    /// The full payload slot of a record; the caller maintains
    /// `payload_count`.
    pub fn payload_mut(&mut self, handle: MessageHandle) -> &mut [u8] {
        self.payload_slot_mut(handle.index())
    }

    /// Replace the payload with `data`.
    ///
    /// # Panics
    /// Panics if `data` exceeds the slot capacity.
    pub fn set_payload(&mut self, handle: MessageHandle, data: &[u8]) {
        let index = handle.index();
        self.payload_slot_mut(index)[..data.len()].copy_from_slice(data);
        self.records[index].payload_count = data.len() as u16;
    }

    /// Append `data` to the payload, returning how many bytes fit.
    pub fn append_payload(&mut self, handle: MessageHandle, data: &[u8]) -> usize {
        let index = handle.index();
        let start = self.records[index].payload_count as usize;
        let slot = self.payload_slot_mut(index);
        let count = (slot.len() - start).min(data.len());
        slot[start..start + count].copy_from_slice(&data[..count]);
        self.records[index].payload_count = (start + count) as u16;
        count
    }

    /// Remaining free space in the payload slot.
    pub fn payload_space(&self, handle: MessageHandle) -> usize {
        let index = handle.index();
        self.payload_slot(index).len() - self.records[index].payload_count as usize
    }

    fn kind_range(&self, kind: PayloadKind) -> core::ops::Range<usize> {
        let basic = self.basic.len();
        let datagram = self.datagram.len();
        let snip = self.snip.len();
        let stream = self.stream.len();
        match kind {
            PayloadKind::Basic => 0..basic,
            PayloadKind::Datagram => basic..basic + datagram,
            PayloadKind::Snip => basic + datagram..basic + datagram + snip,
            PayloadKind::Stream => {
                basic + datagram + snip..basic + datagram + snip + stream
            }
        }
    }

    fn kind_of_index(&self, index: usize) -> PayloadKind {
        for kind in [
            PayloadKind::Basic,
            PayloadKind::Datagram,
            PayloadKind::Snip,
            PayloadKind::Stream,
        ] {
            if self.kind_range(kind).contains(&index) {
                return kind;
            }
        }
        unreachable!("record index outside every pool")
    }

    fn payload_slot(&self, index: usize) -> &[u8] {
        let kind = self.records[index].payload_kind;
        let slot = index - self.kind_range(kind).start;
        match kind {
            PayloadKind::Basic => &self.basic[slot][..],
            PayloadKind::Datagram => &self.datagram[slot][..],
            PayloadKind::Snip => &self.snip[slot][..],
            PayloadKind::Stream => &self.stream[slot][..],
        }
    }

    fn payload_slot_mut(&mut self, index: usize) -> &mut [u8] {
        let kind = self.records[index].payload_kind;
        let slot = index - self.kind_range(kind).start;
        match kind {
            PayloadKind::Basic => &mut self.basic[slot][..],
            PayloadKind::Datagram => &mut self.datagram[slot][..],
            PayloadKind::Snip => &mut self.snip[slot][..],
            PayloadKind::Stream => &mut self.stream[slot][..],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> BufferStore<'static> {
        BufferStore::new(
            alloc::vec![Message::default(); 7],
            alloc::vec![[0u8; LEN_PAYLOAD_BASIC]; 3],
            alloc::vec![[0u8; LEN_PAYLOAD_DATAGRAM]; 2],
            alloc::vec![[0u8; LEN_PAYLOAD_SNIP]; 1],
            alloc::vec![[0u8; LEN_PAYLOAD_STREAM]; 1],
        )
    }

    #[test]
    fn test_allocate_until_exhausted() {
        let mut store = store();

        let first = store.allocate(PayloadKind::Basic).unwrap();
        let second = store.allocate(PayloadKind::Basic).unwrap();
        let third = store.allocate(PayloadKind::Basic).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(store.allocate(PayloadKind::Basic), None);

        assert_eq!(store.metrics(PayloadKind::Basic).currently_allocated, 3);
        assert_eq!(store.metrics(PayloadKind::Basic).max_ever_allocated, 3);

        // Exhaustion of one pool leaves the others untouched.
        assert!(store.allocate(PayloadKind::Datagram).is_some());
    }

    #[test]
    fn test_free_returns_record_to_pool() {
        let mut store = store();

        let handle = store.allocate(PayloadKind::Datagram).unwrap();
        assert_eq!(store.msg(handle).reference_count(), 1);
        store.free(handle);

        assert_eq!(store.metrics(PayloadKind::Datagram).currently_allocated, 0);
        assert_eq!(store.metrics(PayloadKind::Datagram).max_ever_allocated, 1);
        assert!(!store.msg(handle).is_allocated());

        // Matched allocate/free leaves the count unchanged.
        let again = store.allocate(PayloadKind::Datagram).unwrap();
        store.free(again);
        assert_eq!(store.metrics(PayloadKind::Datagram).currently_allocated, 0);
    }

    #[test]
    fn test_reference_counting_defers_release() {
        let mut store = store();

        let handle = store.allocate(PayloadKind::Basic).unwrap();
        store.inc_ref(handle);
        store.free(handle);
        assert!(store.msg(handle).is_allocated());
        assert_eq!(store.msg(handle).reference_count(), 1);

        store.free(handle);
        assert!(!store.msg(handle).is_allocated());
        assert_eq!(store.metrics(PayloadKind::Basic).currently_allocated, 0);
    }

    #[test]
    #[should_panic(expected = "free of an un")]
    fn test_double_free_is_detected() {
        let mut store = store();
        let handle = store.allocate(PayloadKind::Basic).unwrap();
        store.free(handle);
        store.free(handle);
    }

    #[test]
    fn test_allocate_clears_previous_contents() {
        let mut store = store();

        let handle = store.allocate(PayloadKind::Basic).unwrap();
        store.set_payload(handle, &[0xAB; LEN_PAYLOAD_BASIC]);
        store.msg_mut(handle).mti = Mti::DATAGRAM;
        store.free(handle);

        let handle = store.allocate(PayloadKind::Basic).unwrap();
        assert_eq!(store.msg(handle).mti, Mti::NONE);
        assert_eq!(store.msg(handle).payload_count, 0);
        assert!(store.payload_mut(handle).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_append_caps_at_capacity() {
        let mut store = store();

        let handle = store.allocate(PayloadKind::Basic).unwrap();
        assert_eq!(store.append_payload(handle, &[1; 10]), 10);
        assert_eq!(store.append_payload(handle, &[2; 10]), 6);
        assert_eq!(store.msg(handle).payload_count, 16);
        assert_eq!(store.payload_space(handle), 0);
    }

    #[test]
    fn test_payload_slots_are_distinct() {
        let mut store = store();

        let first = store.allocate(PayloadKind::Basic).unwrap();
        let second = store.allocate(PayloadKind::Basic).unwrap();
        store.set_payload(first, &[0x11, 0x22]);
        store.set_payload(second, &[0x33]);

        assert_eq!(store.payload(first), &[0x11, 0x22]);
        assert_eq!(store.payload(second), &[0x33]);
    }
}
