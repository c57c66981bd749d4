use super::alias_map::AliasMap;
use super::registry::{Node, NodeFlags, RunState};
use crate::config;
use crate::storage::BufferStore;
use crate::wire::can::identifier;
use crate::wire::CanFrame;
use openlcb_core::alias::Alias;
use openlcb_core::node_id::NODE_ID_MASK;

/// Fallback seed for the degenerate case where the update maps a seed
/// to zero; built from the increment constants of the original CBUS
/// generator.
const SEED_RESCUE: u64 = 0x1B0C_A37A_4BA9;

/// Advance the 48-bit alias-generator seed.
///
/// The update is `s' = (s << 9) ^ (s << 1) ^ s`, with the bits pushed
/// out above bit 47 folded back into the low end so the width stays at
/// 48 bits.
pub fn advance_seed(seed: u64) -> u64 {
    let mixed = (seed << 9) ^ (seed << 1) ^ seed;
    let folded = (mixed ^ (mixed >> 48)) & NODE_ID_MASK;
    if folded == 0 {
        SEED_RESCUE
    } else {
        folded
    }
}

/// Fold a 48-bit seed into a 12-bit alias by XOR of its four slices.
pub fn alias_from_seed(seed: u64) -> Alias {
    Alias::new((seed ^ (seed >> 12) ^ (seed >> 24) ^ (seed >> 36)) as u16)
}

/// Run one step of the per-node alias-acquisition state machine.
///
/// Each call advances at most one state and produces at most one CAN
/// frame, which the caller owes to the wire before running this node
/// again. The sequence is CID7..CID4, a 200 ms hold-off, then RID and
/// AMD; a duplicate-alias detection during the hold-off abandons the
/// tentative alias and restarts from seed generation.
pub fn run(node: &mut Node, map: &mut AliasMap, store: &mut BufferStore) -> Option<CanFrame> {
    match node.run_state {
        RunState::Init => state_init(node),
        RunState::GenerateSeed => state_generate_seed(node),
        RunState::GenerateAlias => state_generate_alias(node, map),
        RunState::LoadCid7 => state_load_cid(node, 7),
        RunState::LoadCid6 => state_load_cid(node, 6),
        RunState::LoadCid5 => state_load_cid(node, 5),
        RunState::LoadCid4 => state_load_cid(node, 4),
        RunState::Wait200ms => state_wait_200ms(node, map, store),
        RunState::LoadRid => state_load_rid(node, map),
        RunState::LoadAmd => state_load_amd(node, map),
        _ => None,
    }
}

fn state_init(node: &mut Node) -> Option<CanFrame> {
    node.flags = NodeFlags::empty();
    node.alias = Alias::UNASSIGNED;
    node.timer_ticks = 0;
    node.run_state = RunState::GenerateSeed;
    None
}

fn state_generate_seed(node: &mut Node) -> Option<CanFrame> {
    // First login seeds from the Node ID; a relogin after a conflict
    // advances the sequence so the node does not fight for the same
    // alias again.
    node.seed = if node.seed == 0 {
        node.id.raw()
    } else {
        advance_seed(node.seed)
    };
    node.run_state = RunState::GenerateAlias;
    None
}

fn state_generate_alias(node: &mut Node, map: &AliasMap) -> Option<CanFrame> {
    let mut alias = alias_from_seed(node.seed);
    while !alias.is_assigned() || map.find_by_alias(alias).is_some() {
        node.seed = advance_seed(node.seed);
        alias = alias_from_seed(node.seed);
    }
    node.alias = alias;
    net_trace!("login: node {} trying alias {}", node.index, node.alias.raw());
    node.run_state = RunState::LoadCid7;
    None
}

fn state_load_cid(node: &mut Node, sequence: u8) -> Option<CanFrame> {
    let frame = CanFrame::new(identifier::cid(sequence, node.id, node.alias), &[]);
    node.run_state = match sequence {
        7 => RunState::LoadCid6,
        6 => RunState::LoadCid5,
        5 => RunState::LoadCid4,
        _ => {
            // The 200 ms hold-off starts when CID4 goes out.
            node.timer_ticks = 0;
            RunState::Wait200ms
        }
    };
    Some(frame)
}

fn state_wait_200ms(node: &mut Node, map: &mut AliasMap, store: &mut BufferStore) -> Option<CanFrame> {
    if node.flags.contains(NodeFlags::DUPLICATE_ALIAS_DETECTED) {
        restart_login(node, map, store);
        return None;
    }
    if node.timer_ticks >= config::LOGIN_WAIT_TICKS {
        node.run_state = RunState::LoadRid;
    }
    None
}

fn state_load_rid(node: &mut Node, map: &mut AliasMap) -> Option<CanFrame> {
    if map.register(node.alias, node.id).is_none() {
        // Table full; park here and retry next pass.
        net_debug!("login: node {} alias table full", node.index);
        return None;
    }
    node.run_state = RunState::LoadAmd;
    Some(CanFrame::new(identifier::rid(node.alias), &[]))
}

fn state_load_amd(node: &mut Node, map: &mut AliasMap) -> Option<CanFrame> {
    let mut frame = CanFrame::new(identifier::amd(node.alias), &[]);
    frame.set_payload_node_id(node.id, 0);

    node.flags.insert(NodeFlags::PERMITTED);
    if let Some(mapping) = map.find_by_alias_mut(node.alias) {
        mapping.is_permitted = true;
    }

    node.run_state = RunState::LoadInitializationComplete;
    Some(frame)
}

/// Abandon the current alias and relogin from seed generation.
///
/// Used both by the 200 ms wait state and by the main loop when a
/// registered mapping turns out to be a duplicate.
pub(crate) fn restart_login(node: &mut Node, map: &mut AliasMap, store: &mut BufferStore) {
    map.unregister(node.alias);
    node.flags.remove(
        NodeFlags::PERMITTED
            | NodeFlags::INITIALIZED
            | NodeFlags::DUPLICATE_ID_DETECTED
            | NodeFlags::DUPLICATE_ALIAS_DETECTED
            | NodeFlags::DATAGRAM_ACK_SENT
            | NodeFlags::RESEND_DATAGRAM
            | NodeFlags::FIRMWARE_UPGRADE_ACTIVE,
    );
    if let Some(held) = node.last_received_datagram.take() {
        store.free(held);
    }
    node.alias = Alias::UNASSIGNED;
    node.run_state = RunState::GenerateSeed;
    net_debug!("login: node {} restarting alias acquisition", node.index);
}
