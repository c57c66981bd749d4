pub mod alias_map;
pub mod login;
pub mod registry;
mod rx;
mod tx;

pub use self::alias_map::{AliasMap, AliasMapping};
pub use self::registry::{
    EnumeratorKey, EventEnumerator, EventEntry, EventList, EventRange, Node, NodeFlags,
    NodeRegistry, RunState,
};
pub use self::tx::{OutgoingView, TxObserver};

use self::rx::RxContext;
use crate::config;
use crate::phy::{Driver, SharedLock};
use crate::storage::{BufferList, BufferStore, CanFrameFifo, MessageFifo, MessageHandle};
use crate::wire::CanFrame;
use core::fmt;
use openlcb_core::alias::Alias;
use openlcb_core::mti::Mti;
use openlcb_core::node_id::NodeId;
use openlcb_core::parameters::NodeParameters;
use openlcb_core::payload::{PayloadKind, LEN_PAYLOAD_STREAM};

/// Optional hook invoked for every received frame before dispatch.
pub type RxObserver = fn(&CanFrame);

/// Error returned by [`Interface::send_message`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// The pool for the requested payload kind is empty; retry later.
    BufferExhausted,
    /// The dispatch queue is full; retry later.
    QueueFull,
    /// The payload does not fit the requested kind.
    PayloadTooLarge,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SendError::BufferExhausted => write!(f, "buffer exhausted"),
            SendError::QueueFull => write!(f, "queue full"),
            SendError::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}

/// Error returned by [`Interface::create_node`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CreateNodeError {
    InvalidNodeId,
    DuplicateNodeId,
    TableFull,
}

impl fmt::Display for CreateNodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CreateNodeError::InvalidNodeId => write!(f, "invalid node id"),
            CreateNodeError::DuplicateNodeId => write!(f, "duplicate node id"),
            CreateNodeError::TableFull => write!(f, "node table full"),
        }
    }
}

/// A borrowed view of one completed incoming message, as handed to
/// the protocol handlers.
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'m> {
    pub mti: Mti,
    pub source_alias: Alias,
    pub dest_alias: Alias,
    pub source_id: NodeId,
    pub dest_id: NodeId,
    pub payload: &'m [u8],
}

/// The dispatcher's working buffer for one outgoing reply.
///
/// A handler builds at most one reply per pass; the `enumerate` flag
/// asks the dispatcher to call again with the same incoming message
/// for multi-reply operations such as Identify Events.
pub struct Reply {
    valid: bool,
    /// More replies follow for the same incoming message.
    pub enumerate: bool,
    mti: Mti,
    source_alias: Alias,
    dest_alias: Alias,
    source_id: NodeId,
    dest_id: NodeId,
    payload_count: usize,
    payload: [u8; LEN_PAYLOAD_STREAM],
}

impl Reply {
    /// An empty, invalid reply. The dispatcher owns the one that
    /// matters; standalone construction is for handler tests.
    pub fn new() -> Reply {
        Reply {
            valid: false,
            enumerate: false,
            mti: Mti::NONE,
            source_alias: Alias::UNASSIGNED,
            dest_alias: Alias::UNASSIGNED,
            source_id: NodeId::NONE,
            dest_id: NodeId::NONE,
            payload_count: 0,
            payload: [0; LEN_PAYLOAD_STREAM],
        }
    }

    /// Start a reply with the given header; the payload starts empty.
    pub fn load(
        &mut self,
        mti: Mti,
        source_alias: Alias,
        source_id: NodeId,
        dest_alias: Alias,
        dest_id: NodeId,
    ) {
        self.valid = true;
        self.mti = mti;
        self.source_alias = source_alias;
        self.source_id = source_id;
        self.dest_alias = dest_alias;
        self.dest_id = dest_id;
        self.payload_count = 0;
    }

    /// Append bytes, returning how many fit.
    pub fn push_bytes(&mut self, data: &[u8]) -> usize {
        let count = (self.payload.len() - self.payload_count).min(data.len());
        self.payload[self.payload_count..self.payload_count + count]
            .copy_from_slice(&data[..count]);
        self.payload_count += count;
        count
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn mti(&self) -> Mti {
        self.mti
    }

    pub fn source_alias(&self) -> Alias {
        self.source_alias
    }

    pub fn dest_alias(&self) -> Alias {
        self.dest_alias
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_count]
    }

    fn clear(&mut self) {
        self.valid = false;
        self.enumerate = false;
        self.payload_count = 0;
    }
}

impl Default for Reply {
    fn default() -> Self {
        Reply::new()
    }
}

/// The layer above the dispatcher: protocol handlers supplied by the
/// application crate.
///
/// Handlers run inside the shared-resource lock and must not call back
/// into the interface.
pub trait MessageHandler {
    /// Advance the post-alias login sequence (Initialization Complete
    /// and the initial event inventory). The default skips straight to
    /// the running state.
    fn poll_login(&mut self, node: &mut Node, reply: &mut Reply) {
        let _ = reply;
        node.run_state = RunState::Run;
    }

    /// Process one completed incoming message against one node,
    /// producing at most one reply per call.
    fn handle_message(&mut self, node: &mut Node, msg: &MessageView, reply: &mut Reply);
}

/// A handler that ignores every message; the stack still logs in and
/// answers the CAN control protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl MessageHandler for NullHandler {
    fn handle_message(&mut self, _node: &mut Node, _msg: &MessageView, _reply: &mut Reply) {}
}

#[derive(Debug, Clone, Copy)]
struct ActiveMessage {
    handle: MessageHandle,
    /// Locally sourced: forward to the wire instead of the handlers.
    outbound: bool,
    /// Next node slot the message is dispatched to.
    node_index: usize,
}

/// The CAN-layer interface: buffer store, alias map, node registry,
/// frame assembly and the dispatcher wired together under the
/// single-threaded-with-interrupts concurrency model.
///
/// [`Interface::on_can_frame`] feeds received frames in (interrupt
/// context); [`Interface::poll`] runs the cooperative main loop;
/// [`Interface::tick_100ms`] drives the timers.
pub struct Interface<'a, 'p, L: SharedLock> {
    store: BufferStore<'a>,
    alias_map: AliasMap<'a>,
    registry: NodeRegistry<'a, 'p>,
    in_progress: BufferList<'a>,
    completed: MessageFifo<'a>,
    can_tx: CanFrameFifo<'a>,
    lock: L,
    reply: Reply,
    active: Option<ActiveMessage>,
    pending_can_frame: Option<CanFrame>,
    pending_login_frame: Option<CanFrame>,
    rx_observer: Option<RxObserver>,
    tx_observer: Option<TxObserver>,
}

impl<'a, 'p, L: SharedLock> Interface<'a, 'p, L> {
    pub fn new(
        store: BufferStore<'a>,
        alias_map: AliasMap<'a>,
        registry: NodeRegistry<'a, 'p>,
        in_progress: BufferList<'a>,
        completed: MessageFifo<'a>,
        can_tx: CanFrameFifo<'a>,
        lock: L,
    ) -> Interface<'a, 'p, L> {
        debug_assert!(
            alias_map.capacity() == registry.capacity(),
            "alias map depth must equal node table depth",
        );
        Interface {
            store,
            alias_map,
            registry,
            in_progress,
            completed,
            can_tx,
            lock,
            reply: Reply::new(),
            active: None,
            pending_can_frame: None,
            pending_login_frame: None,
            rx_observer: None,
            tx_observer: None,
        }
    }

    /// Install a hook called for every received frame.
    pub fn set_rx_observer(&mut self, observer: Option<RxObserver>) {
        self.rx_observer = observer;
    }

    /// Install a hook called for every transmitted frame.
    pub fn set_tx_observer(&mut self, observer: Option<TxObserver>) {
        self.tx_observer = observer;
    }

    /// Allocate a virtual node; it starts logging in on the next poll.
    pub fn create_node(
        &mut self,
        id: NodeId,
        parameters: &'p NodeParameters,
    ) -> Result<u8, CreateNodeError> {
        if !id.is_valid() {
            return Err(CreateNodeError::InvalidNodeId);
        }

        self.lock.lock();
        let result = if self.registry.find_by_node_id(id).is_some() {
            Err(CreateNodeError::DuplicateNodeId)
        } else {
            match self.registry.allocate(id, parameters) {
                Some(node) => {
                    for index in 0..parameters.producer_count_autocreate {
                        node.producers.add(openlcb_core::event::EventId::from_node(id, index));
                    }
                    for index in 0..parameters.consumer_count_autocreate {
                        node.consumers.add(openlcb_core::event::EventId::from_node(id, index));
                    }
                    Ok(node.index)
                }
                None => Err(CreateNodeError::TableFull),
            }
        };
        self.lock.unlock();
        result
    }

    pub fn alias_map(&self) -> &AliasMap<'a> {
        &self.alias_map
    }

    pub fn store(&self) -> &BufferStore<'a> {
        &self.store
    }

    pub fn node(&self, index: u8) -> Option<&Node<'p>> {
        self.registry.get(index)
    }

    pub fn node_mut(&mut self, index: u8) -> Option<&mut Node<'p>> {
        self.registry.get_mut(index)
    }

    /// Entry point for the platform CAN driver, one call per received
    /// frame, typically from the receive interrupt or thread.
    pub fn on_can_frame(&mut self, frame: &CanFrame) {
        if let Some(callback) = self.rx_observer {
            callback(frame);
        }

        self.lock.lock();
        let mut ctx = RxContext {
            store: &mut self.store,
            alias_map: &mut self.alias_map,
            registry: &mut self.registry,
            in_progress: &mut self.in_progress,
            completed: &mut self.completed,
            can_tx: &mut self.can_tx,
        };
        ctx.dispatch(frame);
        self.lock.unlock();
    }

    /// The 100 ms timer entry point.
    ///
    /// Counts the per-node login timers up and the per-message
    /// datagram timers down; a held datagram whose countdown expires
    /// is freed and its retry flag cleared.
    pub fn tick_100ms(&mut self) {
        self.lock.lock();

        let Interface { registry, store, .. } = self;
        let mut cursor = registry.get_first(EnumeratorKey::Timer);
        while let Some(node) = cursor {
            node.timer_ticks = node.timer_ticks.saturating_add(1);

            if let Some(held) = node.last_received_datagram {
                let msg = store.msg_mut(held);
                if msg.timer_ticks > 0 {
                    msg.timer_ticks -= 1;
                    if msg.timer_ticks == 0 {
                        node.last_received_datagram = None;
                        node.flags.remove(NodeFlags::RESEND_DATAGRAM);
                        store.free(held);
                        net_debug!("iface: held datagram timed out");
                    }
                }
            }

            cursor = registry.get_next(EnumeratorKey::Timer);
        }

        self.lock.unlock();
    }

    /// One turn of the cooperative main loop. Returns whether any step
    /// found work to do.
    pub fn poll<D: Driver, H: MessageHandler>(&mut self, driver: &mut D, handler: &mut H) -> bool {
        let mut did_work = false;
        did_work |= self.handle_duplicate_aliases();
        did_work |= self.handle_outgoing_can_frame(driver);
        did_work |= self.handle_login_frame(driver);
        did_work |= self.handle_node_login(driver, handler);
        did_work |= self.handle_messages(driver, handler);
        did_work
    }

    /// Step 1: resolve every mapping flagged as duplicate by the
    /// receive path and push the owning node back into login.
    fn handle_duplicate_aliases(&mut self) -> bool {
        self.lock.lock();

        if !self.alias_map.has_duplicate_alias() {
            self.lock.unlock();
            return false;
        }

        for index in 0..self.alias_map.capacity() {
            let entry = *self.alias_map.entry_at(index);
            if entry.is_empty() || !entry.is_duplicate {
                continue;
            }

            self.alias_map.unregister(entry.alias);
            if let Some(node) = self.registry.find_by_node_id(entry.node_id) {
                login::restart_login(node, &mut self.alias_map, &mut self.store);
            }
        }
        self.alias_map.clear_duplicate_flag();

        self.lock.unlock();
        true
    }

    /// Step 2: move one frame from the outgoing FIFO to the hardware.
    fn handle_outgoing_can_frame<D: Driver>(&mut self, driver: &mut D) -> bool {
        if self.pending_can_frame.is_none() {
            self.lock.lock();
            self.pending_can_frame = self.can_tx.pop();
            self.lock.unlock();
        }

        let Some(frame) = self.pending_can_frame else {
            return false;
        };
        if tx::send_can_frame(driver, &frame, self.tx_observer) {
            self.pending_can_frame = None;
        }
        true
    }

    /// Step 3: transmit the frame the login state machine produced on
    /// an earlier pass.
    fn handle_login_frame<D: Driver>(&mut self, driver: &mut D) -> bool {
        let Some(frame) = self.pending_login_frame else {
            return false;
        };
        if tx::send_can_frame(driver, &frame, self.tx_observer) {
            self.pending_login_frame = None;
        }
        true
    }

    /// Steps 4 and 5, login half: advance every node that has not
    /// reached the running state.
    fn handle_node_login<D: Driver, H: MessageHandler>(
        &mut self,
        driver: &mut D,
        handler: &mut H,
    ) -> bool {
        let mut did_work = false;

        self.lock.lock();
        {
            let Interface {
                registry,
                alias_map,
                store,
                reply,
                pending_login_frame,
                ..
            } = self;

            let mut cursor = registry.get_first(EnumeratorKey::Dispatcher);
            while let Some(node) = cursor {
                if node.flags.contains(NodeFlags::DUPLICATE_ALIAS_DETECTED) {
                    login::restart_login(node, alias_map, store);
                    did_work = true;
                } else if node.run_state < RunState::LoadInitializationComplete {
                    // One pending login frame at a time; the state
                    // machine waits for the wire to catch up.
                    if pending_login_frame.is_none() {
                        if let Some(frame) = login::run(node, alias_map, store) {
                            *pending_login_frame = Some(frame);
                        }
                        did_work = true;
                    }
                } else if node.run_state < RunState::Run && !reply.valid {
                    handler.poll_login(node, reply);
                    did_work |= reply.valid;
                }

                cursor = registry.get_next(EnumeratorKey::Dispatcher);
            }
        }
        self.lock.unlock();

        if self.reply.valid {
            self.flush_reply(driver);
        }

        did_work
    }

    /// Steps 4 and 5, dispatch half: move one completed message
    /// through the handler layer or out to the wire.
    fn handle_messages<D: Driver, H: MessageHandler>(
        &mut self,
        driver: &mut D,
        handler: &mut H,
    ) -> bool {
        // A reply that could not be transmitted blocks the worker.
        if self.reply.valid && !self.flush_reply(driver) {
            return true;
        }

        if self.active.is_none() {
            self.lock.lock();
            let popped = self.completed.pop();
            self.lock.unlock();

            let Some(handle) = popped else {
                return false;
            };
            let outbound = {
                let source = self.store.msg(handle).source_alias;
                self.alias_map.find_by_alias(source).is_some()
            };
            self.active = Some(ActiveMessage {
                handle,
                outbound,
                node_index: 0,
            });
        }

        let ActiveMessage {
            handle,
            outbound,
            mut node_index,
        } = self.active.unwrap();

        if outbound {
            let sent = {
                let msg = self.store.msg(handle);
                let view = OutgoingView {
                    mti: msg.mti,
                    source_alias: msg.source_alias,
                    dest_alias: msg.dest_alias,
                    payload: self.store.payload(handle),
                };
                tx::send_openlcb_message(driver, view, self.tx_observer)
            };
            if sent {
                self.lock.lock();
                self.store.free(handle);
                self.lock.unlock();
                self.active = None;
            }
            return true;
        }

        self.lock.lock();
        loop {
            if node_index >= self.registry.capacity() {
                self.store.free(handle);
                self.active = None;
                break;
            }

            let header = *self.store.msg(handle);
            let Some(node) = self.registry.get_mut(node_index as u8) else {
                node_index += 1;
                continue;
            };
            if node.run_state != RunState::Run
                || (header.dest_alias.is_assigned() && node.alias != header.dest_alias)
            {
                node_index += 1;
                continue;
            }

            // Retain an addressed datagram while the node produces its
            // reply; the tick frees it if the reply never happens.
            if header.mti == Mti::DATAGRAM && node.last_received_datagram != Some(handle) {
                self.registry.get_mut(node_index as u8).unwrap().last_received_datagram =
                    Some(handle);
                self.store.inc_ref(handle);
                self.store.msg_mut(handle).timer_ticks = config::DATAGRAM_REPLY_WAIT_TICKS;
            }

            let view = MessageView {
                mti: header.mti,
                source_alias: header.source_alias,
                dest_alias: header.dest_alias,
                source_id: header.source_id,
                dest_id: header.dest_id,
                payload: self.store.payload(handle),
            };
            let node = self.registry.get_mut(node_index as u8).unwrap();
            handler.handle_message(node, &view, &mut self.reply);
            let enumerate = self.reply.enumerate;

            if !enumerate {
                if node.last_received_datagram == Some(handle) {
                    node.last_received_datagram = None;
                    node.flags.remove(NodeFlags::RESEND_DATAGRAM);
                    self.store.free(handle);
                }
                node_index += 1;
            }
            if let Some(active) = self.active.as_mut() {
                active.node_index = node_index;
            }

            if self.reply.valid {
                self.lock.unlock();
                let flushed = self.flush_reply(driver);
                self.lock.lock();
                if !flushed || enumerate {
                    break;
                }
                continue;
            }

            if enumerate {
                break;
            }
        }
        self.lock.unlock();
        true
    }

    fn flush_reply<D: Driver>(&mut self, driver: &mut D) -> bool {
        let view = OutgoingView {
            mti: self.reply.mti,
            source_alias: self.reply.source_alias,
            dest_alias: self.reply.dest_alias,
            payload: self.reply.payload(),
        };
        if tx::send_openlcb_message(driver, view, self.tx_observer) {
            self.reply.clear();
            true
        } else {
            false
        }
    }

    /// Queue an application-built message for transmission.
    ///
    /// The message takes the same path as handler replies: through the
    /// completed FIFO, forwarded to the wire by a later poll.
    #[allow(clippy::too_many_arguments)]
    pub fn send_message(
        &mut self,
        kind: PayloadKind,
        mti: Mti,
        source_alias: Alias,
        source_id: NodeId,
        dest_alias: Alias,
        dest_id: NodeId,
        payload: &[u8],
    ) -> Result<(), SendError> {
        if payload.len() > kind.max_len() {
            return Err(SendError::PayloadTooLarge);
        }

        self.lock.lock();

        let Some(handle) = self.store.allocate(kind) else {
            self.lock.unlock();
            return Err(SendError::BufferExhausted);
        };
        self.store
            .msg_mut(handle)
            .load_header(mti, source_alias, source_id, dest_alias, dest_id);
        self.store.set_payload(handle, payload);

        let result = if self.completed.push(handle).is_err() {
            self.store.free(handle);
            Err(SendError::QueueFull)
        } else {
            Ok(())
        };

        self.lock.unlock();
        result
    }
}
