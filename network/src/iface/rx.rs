use super::alias_map::AliasMap;
use super::registry::{NodeFlags, NodeRegistry};
use crate::storage::{BufferList, BufferStore, CanFrameFifo, MessageFifo, MessageState};
use crate::wire::can::{identifier, OFFSET_WITHOUT_DEST_ADDRESS, OFFSET_WITH_DEST_ADDRESS};
use crate::wire::{CanFrame, ControlFrame, FrameType, FramingBits};
use openlcb_core::alias::Alias;
use openlcb_core::error::ErrorCode;
use openlcb_core::mti::Mti;
use openlcb_core::node_id::NodeId;
use openlcb_core::payload::PayloadKind;

/// Null octets a legacy SNIP reply accumulates before it is complete.
const LEGACY_SNIP_NULL_COUNT: usize = 6;

/// The receive-side frame assembler.
///
/// Borrows the shared structures for the duration of one frame; the
/// caller holds the platform lock around the whole dispatch.
pub(crate) struct RxContext<'s, 'a, 'p> {
    pub store: &'s mut BufferStore<'a>,
    pub alias_map: &'s mut AliasMap<'a>,
    pub registry: &'s mut NodeRegistry<'a, 'p>,
    pub in_progress: &'s mut BufferList<'a>,
    pub completed: &'s mut MessageFifo<'a>,
    pub can_tx: &'s mut CanFrameFifo<'a>,
}

impl<'s, 'a, 'p> RxContext<'s, 'a, 'p> {
    /// Top-level dispatch of one received frame.
    pub fn dispatch(&mut self, frame: &CanFrame) {
        if !frame.is_openlcb_message() {
            match frame.control_frame() {
                Ok(ControlFrame::Cid(_)) => self.cid_frame(frame),
                Ok(ControlFrame::Rid)
                | Ok(ControlFrame::Amd)
                | Ok(ControlFrame::Amr)
                | Ok(ControlFrame::ErrorInfoReport(_)) => {
                    self.check_for_duplicate_alias(frame);
                }
                Ok(ControlFrame::Ame) => self.ame_frame(frame),
                Ok(ControlFrame::Unknown) | Err(_) => {}
            }
            return;
        }

        let frame_type = match frame.frame_type() {
            Ok(frame_type) => frame_type,
            Err(_) => return,
        };

        // Addressed traffic for aliases we do not own is dropped here.
        let dest_registered = self.alias_map.find_by_alias(frame.dest_alias()).is_some();

        match frame_type {
            FrameType::DatagramOnly if dest_registered => {
                self.single_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS, PayloadKind::Datagram);
            }
            FrameType::DatagramFirst if dest_registered => {
                self.first_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS, PayloadKind::Datagram);
            }
            FrameType::DatagramMiddle if dest_registered => {
                self.middle_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS);
            }
            FrameType::DatagramFinal if dest_registered => {
                self.last_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS);
            }
            FrameType::Stream if dest_registered => {
                self.stream_frame(frame, OFFSET_WITH_DEST_ADDRESS, PayloadKind::Stream);
            }
            FrameType::GlobalAddressed => self.standard_frame(frame, dest_registered),
            _ => {}
        }
    }

    fn standard_frame(&mut self, frame: &CanFrame, dest_registered: bool) {
        let raw_mti = Mti::new(frame.can_mti_field());

        if frame.has_dest_address() {
            if !dest_registered {
                return;
            }
            match frame.framing_bits() {
                FramingBits::Only => {
                    if raw_mti == Mti::SIMPLE_NODE_INFO_REPLY {
                        // Early SNIP senders predate the framing bits.
                        self.legacy_snip_frame(frame, OFFSET_WITH_DEST_ADDRESS, PayloadKind::Snip);
                    } else {
                        self.single_frame(frame, OFFSET_WITH_DEST_ADDRESS, PayloadKind::Basic);
                    }
                }
                FramingBits::First => {
                    let kind = if raw_mti == Mti::SIMPLE_NODE_INFO_REPLY {
                        PayloadKind::Snip
                    } else {
                        PayloadKind::Basic
                    };
                    self.first_frame(frame, OFFSET_WITH_DEST_ADDRESS, kind);
                }
                FramingBits::Middle => self.middle_frame(frame, OFFSET_WITH_DEST_ADDRESS),
                FramingBits::Final => self.last_frame(frame, OFFSET_WITH_DEST_ADDRESS),
            }
        } else {
            match raw_mti {
                Mti::PCER_WITH_PAYLOAD_FIRST => {
                    self.first_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS, PayloadKind::Snip);
                }
                Mti::PCER_WITH_PAYLOAD_MIDDLE => {
                    self.middle_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS);
                }
                Mti::PCER_WITH_PAYLOAD_LAST => {
                    self.last_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS);
                }
                _ => self.single_frame(frame, OFFSET_WITHOUT_DEST_ADDRESS, PayloadKind::Basic),
            }
        }
    }

    /// Build a Datagram Rejected or Optional Interaction Rejected
    /// reply and queue it for dispatch.
    ///
    /// Allocation failure drops the reply; the protocol tolerates a
    /// lost optional response.
    fn load_reject_message(&mut self, peer: Alias, ours: Alias, mti: Mti, code: ErrorCode) {
        let Some(handle) = self.store.allocate(PayloadKind::Basic) else {
            net_trace!("rx: reject reply dropped, no buffer");
            return;
        };

        let reply_mti = if mti == Mti::DATAGRAM {
            Mti::DATAGRAM_REJECTED_REPLY
        } else {
            Mti::OPTIONAL_INTERACTION_REJECTED
        };

        let msg = self.store.msg_mut(handle);
        msg.load_header(reply_mti, ours, NodeId::NONE, peer, NodeId::NONE);

        let ours_bytes = ours.to_bytes();
        let code_bytes = code.to_bytes();
        self.store.set_payload(
            handle,
            &[ours_bytes[0], ours_bytes[1], code_bytes[0], code_bytes[1]],
        );

        if self.completed.push(handle).is_err() {
            self.store.free(handle);
        }
    }

    /// First frame of a multi-frame sequence: start an assembly.
    fn first_frame(&mut self, frame: &CanFrame, offset: usize, kind: PayloadKind) {
        let source = frame.source_alias();
        let dest = frame.dest_alias();
        let mti = frame.openlcb_mti();

        if self.in_progress.find(self.store, source, dest, mti).is_some() {
            self.load_reject_message(
                source,
                dest,
                mti,
                ErrorCode::TEMPORARY_OUT_OF_ORDER_START_BEFORE_LAST_END,
            );
            return;
        }

        let Some(handle) = self.store.allocate(kind) else {
            self.load_reject_message(source, dest, mti, ErrorCode::TEMPORARY_BUFFER_UNAVAILABLE);
            return;
        };

        self.store
            .msg_mut(handle)
            .load_header(mti, source, NodeId::NONE, dest, NodeId::NONE);
        self.store.msg_mut(handle).state.insert(MessageState::INPROCESS);
        self.store.append_payload(handle, &frame.payload()[offset..]);

        if self.in_progress.add(handle).is_err() {
            // Index sized to the pool; only reachable on a sizing bug.
            net_debug!("rx: in-progress index full");
            self.store.free(handle);
        }
    }

    /// Continuation frame: append to the matching assembly.
    fn middle_frame(&mut self, frame: &CanFrame, offset: usize) {
        let source = frame.source_alias();
        let dest = frame.dest_alias();
        let mti = frame.openlcb_mti();

        let Some(handle) = self.in_progress.find(self.store, source, dest, mti) else {
            self.load_reject_message(
                source,
                dest,
                mti,
                ErrorCode::TEMPORARY_OUT_OF_ORDER_MIDDLE_END_WITH_NO_START,
            );
            return;
        };

        self.store.append_payload(handle, &frame.payload()[offset..]);
    }

    /// Final frame: complete the assembly and queue the message.
    fn last_frame(&mut self, frame: &CanFrame, offset: usize) {
        let source = frame.source_alias();
        let dest = frame.dest_alias();
        let mti = frame.openlcb_mti();

        let Some(handle) = self.in_progress.find(self.store, source, dest, mti) else {
            self.load_reject_message(
                source,
                dest,
                mti,
                ErrorCode::TEMPORARY_OUT_OF_ORDER_MIDDLE_END_WITH_NO_START,
            );
            return;
        };

        self.store.append_payload(handle, &frame.payload()[offset..]);
        self.store.msg_mut(handle).state.remove(MessageState::INPROCESS);
        self.in_progress.release(handle);

        if self.completed.push(handle).is_err() {
            self.store.free(handle);
        }
    }

    /// A message complete in one frame.
    fn single_frame(&mut self, frame: &CanFrame, offset: usize, kind: PayloadKind) {
        let Some(handle) = self.store.allocate(kind) else {
            net_trace!("rx: single frame dropped, no buffer");
            return;
        };

        self.store.msg_mut(handle).load_header(
            frame.openlcb_mti(),
            frame.source_alias(),
            NodeId::NONE,
            frame.dest_alias(),
            NodeId::NONE,
        );
        self.store.append_payload(handle, &frame.payload()[offset..]);

        if self.completed.push(handle).is_err() {
            self.store.free(handle);
        }
    }

    /// SNIP replies from nodes that predate the framing bits carry no
    /// first/middle/final marking; completion is six accumulated null
    /// terminators.
    fn legacy_snip_frame(&mut self, frame: &CanFrame, offset: usize, kind: PayloadKind) {
        let source = frame.source_alias();
        let dest = frame.dest_alias();
        let mti = frame.openlcb_mti();

        let Some(handle) = self.in_progress.find(self.store, source, dest, mti) else {
            self.first_frame(frame, offset, kind);
            return;
        };

        // A malformed reply never reaches six nulls; drop it rather
        // than let it sit in the index forever.
        if frame.payload().len() - offset > self.store.payload_space(handle) {
            net_debug!("rx: oversized legacy snip reply dropped");
            self.in_progress.release(handle);
            self.store.free(handle);
            return;
        }

        let nulls = count_nulls(self.store.payload(handle))
            + count_nulls(&frame.payload()[offset..]);
        if nulls < LEGACY_SNIP_NULL_COUNT {
            self.middle_frame(frame, offset);
        } else {
            self.last_frame(frame, offset);
        }
    }

    /// Stream data reception is not supported; the frame is accepted
    /// by the dispatch table and dropped.
    fn stream_frame(&mut self, frame: &CanFrame, _offset: usize, _kind: PayloadKind) {
        net_trace!("rx: stream frame from {} dropped", frame.source_alias().raw());
    }

    /// CID: another node is checking an alias. If it is one of ours,
    /// defend it with an RID.
    fn cid_frame(&mut self, frame: &CanFrame) {
        let source = frame.source_alias();
        if self.alias_map.find_by_alias(source).is_some() {
            let reply = CanFrame::new(identifier::rid(source), &[]);
            if self.can_tx.push(reply).is_err() {
                net_trace!("rx: rid defense dropped, fifo full");
            }
        }
    }

    /// Shared duplicate check for RID, AMD, AMR and error report
    /// frames: a source alias matching one of ours means a conflict.
    fn check_for_duplicate_alias(&mut self, frame: &CanFrame) -> bool {
        let source = frame.source_alias();

        // A node still mid-login holds its tentative alias outside the
        // map; flag it directly so the wait state can restart.
        if let Some(node) = self.registry.find_by_alias(source) {
            node.flags.insert(NodeFlags::DUPLICATE_ALIAS_DETECTED);
        }

        let Some(mapping) = self.alias_map.find_by_alias_mut(source) else {
            return false;
        };

        mapping.is_duplicate = true;
        let was_permitted = mapping.is_permitted;
        let node_id = mapping.node_id;
        self.alias_map.set_duplicate_flag();

        if was_permitted {
            let mut reply = CanFrame::new(identifier::amr(source), &[]);
            reply.set_payload_node_id(node_id, 0);
            if self.can_tx.push(reply).is_err() {
                net_trace!("rx: amr dropped, fifo full");
            }
        }

        true
    }

    /// AME: reply with the mapping for the requested Node ID, or with
    /// every mapping when the enquiry is global.
    fn ame_frame(&mut self, frame: &CanFrame) {
        if self.check_for_duplicate_alias(frame) {
            return;
        }

        if frame.payload_count() > 0 {
            let Ok(node_id) = frame.payload_as_node_id() else {
                return;
            };
            if let Some(mapping) = self.alias_map.find_by_node_id(node_id) {
                let mut reply = CanFrame::new(identifier::amd(mapping.alias), &[]);
                reply.set_payload_node_id(mapping.node_id, 0);
                let _ = self.can_tx.push(reply);
            }
            return;
        }

        for index in 0..self.alias_map.capacity() {
            let entry = *self.alias_map.entry_at(index);
            if entry.is_empty() {
                continue;
            }
            let mut reply = CanFrame::new(identifier::amd(entry.alias), &[]);
            reply.set_payload_node_id(entry.node_id, 0);
            let _ = self.can_tx.push(reply);
        }
    }
}

fn count_nulls(data: &[u8]) -> usize {
    data.iter().filter(|b| **b == 0).count()
}
