//! Full-stack scenarios with the standard protocol handlers attached:
//! the OpenLCB-level login continuation, Verify Node ID, SNIP and the
//! event inventory, all observed on the wire.

use openlcb_core::alias::Alias;
use openlcb_core::error::ErrorCode;
use openlcb_core::mti::Mti;
use openlcb_core::node_id::NodeId;
use openlcb_core::parameters::{NodeParameters, ProtocolSupport, SnipData};
use openlcb_core::payload::{
    LEN_PAYLOAD_BASIC, LEN_PAYLOAD_DATAGRAM, LEN_PAYLOAD_SNIP, LEN_PAYLOAD_STREAM,
};
use openlcb_network::iface::{
    AliasMap, AliasMapping, Interface, Node, NodeRegistry, RunState,
};
use openlcb_network::phy::loopback::Loopback;
use openlcb_network::phy::NoopLock;
use openlcb_network::storage::{BufferList, BufferStore, CanFrameFifo, Message, MessageFifo};
use openlcb_network::wire::can::identifier;
use openlcb_network::wire::CanFrame;
use openlcb_node::application;
use openlcb_node::{ConfigMemory, StandardHandler};

const NODE_ID: u64 = 0x0102_0304_0506;

static PARAMS: NodeParameters = {
    let mut parameters = NodeParameters::new();
    parameters.snip = SnipData {
        mfg_version: 4,
        name: "Test",
        model: "Test Model J",
        hardware_version: "0.001",
        software_version: "0.002",
        user_version: 2,
    };
    parameters.protocol_support = ProtocolSupport::DATAGRAM
        .union(ProtocolSupport::MEMORY_CONFIGURATION)
        .union(ProtocolSupport::EVENT_EXCHANGE)
        .union(ProtocolSupport::SIMPLE_NODE_INFORMATION)
        .union(ProtocolSupport::CONFIGURATION_DESCRIPTION_INFO);
    parameters.producer_count_autocreate = 2;
    parameters.consumer_count_autocreate = 1;
    parameters
};

type TestInterface = Interface<'static, 'static, NoopLock>;
type TestDriver = Loopback<64>;

/// Backs the user name and description with fixed strings.
struct TestMemory;

impl ConfigMemory for TestMemory {
    fn read(
        &mut self,
        _node: &Node,
        _space: u8,
        address: u32,
        buffer: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        let text: &[u8] = if address == 0 { b"Yard\0" } else { b"West throat\0" };
        let count = text.len().min(buffer.len());
        buffer[..count].copy_from_slice(&text[..count]);
        Ok(count)
    }

    fn write(
        &mut self,
        _node: &mut Node,
        _space: u8,
        _address: u32,
        _data: &[u8],
    ) -> Result<(), ErrorCode> {
        Ok(())
    }
}

fn interface() -> TestInterface {
    Interface::new(
        BufferStore::new(
            vec![Message::default(); 8],
            vec![[0u8; LEN_PAYLOAD_BASIC]; 4],
            vec![[0u8; LEN_PAYLOAD_DATAGRAM]; 2],
            vec![[0u8; LEN_PAYLOAD_SNIP]; 1],
            vec![[0u8; LEN_PAYLOAD_STREAM]; 1],
        ),
        AliasMap::new(vec![AliasMapping::default(); 2]),
        NodeRegistry::new(Vec::from_iter([None, None])),
        BufferList::new(vec![None; 8]),
        MessageFifo::new(vec![None; 9]),
        CanFrameFifo::new(vec![CanFrame::default(); 9]),
        NoopLock,
    )
}

fn handler() -> StandardHandler<TestMemory> {
    StandardHandler::new(TestMemory)
}

fn login(
    iface: &mut TestInterface,
    driver: &mut TestDriver,
    handler: &mut StandardHandler<TestMemory>,
) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    for _ in 0..64 {
        iface.poll(driver, handler);
        while let Some(frame) = driver.dequeue() {
            frames.push(frame);
        }
        iface.tick_100ms();
        if iface.node(0).map(|node| node.run_state) == Some(RunState::Run) && driver.is_empty() {
            break;
        }
    }
    for _ in 0..8 {
        iface.poll(driver, handler);
        while let Some(frame) = driver.dequeue() {
            frames.push(frame);
        }
    }
    frames
}

fn drain(
    iface: &mut TestInterface,
    driver: &mut TestDriver,
    handler: &mut StandardHandler<TestMemory>,
    turns: usize,
) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    for _ in 0..turns {
        iface.poll(driver, handler);
        while let Some(frame) = driver.dequeue() {
            frames.push(frame);
        }
    }
    frames
}

#[test]
fn login_announces_node_and_event_inventory() {
    let mut iface = interface();
    let mut driver = TestDriver::new();
    let mut handler = handler();
    iface.create_node(NodeId::new(NODE_ID), &PARAMS).unwrap();

    let frames = login(&mut iface, &mut driver, &mut handler);
    let alias = iface.node(0).unwrap().alias;

    // CAN login first: CID x4, RID, AMD.
    assert!(frames.len() >= 6);

    let messages: Vec<&CanFrame> = frames.iter().filter(|f| f.is_openlcb_message()).collect();
    assert_eq!(messages[0].openlcb_mti(), Mti::INITIALIZATION_COMPLETE);
    assert_eq!(messages[0].source_alias(), alias);
    assert_eq!(messages[0].payload(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

    // Two producers and one consumer, announced in order.
    assert_eq!(messages[1].openlcb_mti(), Mti::PRODUCER_IDENTIFIED_UNKNOWN);
    assert_eq!(messages[2].openlcb_mti(), Mti::PRODUCER_IDENTIFIED_UNKNOWN);
    assert_eq!(messages[3].openlcb_mti(), Mti::CONSUMER_IDENTIFIED_UNKNOWN);
    assert_eq!(messages.len(), 4);

    // Auto-created event IDs are node_id << 16 | n.
    assert_eq!(messages[1].payload(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00, 0x00]);
    assert_eq!(messages[2].payload(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00, 0x01]);
    assert_eq!(messages[3].payload(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00, 0x00]);

    assert!(iface.node(0).unwrap().is_initialized());
}

#[test]
fn verify_node_id_global_round_trip() {
    // S2: 0x19490AAA in, Verified Node ID out.
    let mut iface = interface();
    let mut driver = TestDriver::new();
    let mut handler = handler();
    iface.create_node(NodeId::new(NODE_ID), &PARAMS).unwrap();
    login(&mut iface, &mut driver, &mut handler);
    let alias = iface.node(0).unwrap().alias;

    iface.on_can_frame(&CanFrame::new(0x1949_0AAA, &[]));
    let frames = drain(&mut iface, &mut driver, &mut handler, 4);

    assert_eq!(frames.len(), 1);
    let reply = &frames[0];
    assert_eq!(reply.openlcb_mti(), Mti::VERIFIED_NODE_ID);
    assert_eq!(reply.source_alias(), alias);
    assert_eq!(reply.payload(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    assert_eq!(reply.payload_count(), 6);
}

#[test]
fn protocol_support_inquiry_round_trip() {
    let mut iface = interface();
    let mut driver = TestDriver::new();
    let mut handler = handler();
    iface.create_node(NodeId::new(NODE_ID), &PARAMS).unwrap();
    login(&mut iface, &mut driver, &mut handler);
    let alias = iface.node(0).unwrap().alias;

    let id = identifier::openlcb_message(Mti::PROTOCOL_SUPPORT_INQUIRY, Alias::new(0xAAA));
    let dest = alias.to_bytes();
    iface.on_can_frame(&CanFrame::new(id, &[dest[0], dest[1]]));

    let frames = drain(&mut iface, &mut driver, &mut handler, 4);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].openlcb_mti(), Mti::PROTOCOL_SUPPORT_REPLY);
    assert_eq!(frames[0].dest_alias(), Alias::new(0xAAA));
    // Datagram, memory configuration, events, SNIP and CDI bits.
    assert_eq!(&frames[0].payload()[2..], &[0x54, 0x18, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn snip_request_round_trip() {
    let mut iface = interface();
    let mut driver = TestDriver::new();
    let mut handler = handler();
    iface.create_node(NodeId::new(NODE_ID), &PARAMS).unwrap();
    login(&mut iface, &mut driver, &mut handler);
    let alias = iface.node(0).unwrap().alias;

    let id = identifier::openlcb_message(Mti::SIMPLE_NODE_INFO_REQUEST, Alias::new(0xAAA));
    let dest = alias.to_bytes();
    iface.on_can_frame(&CanFrame::new(id, &[dest[0], dest[1]]));

    let frames = drain(&mut iface, &mut driver, &mut handler, 8);
    assert!(frames.len() > 1, "SNIP reply must span frames");

    // Reassemble the addressed multi-frame reply.
    let mut data = Vec::new();
    for frame in &frames {
        assert_eq!(frame.openlcb_mti(), Mti::SIMPLE_NODE_INFO_REPLY);
        data.extend_from_slice(&frame.payload()[2..]);
    }

    let mut expected = vec![4u8];
    expected.extend_from_slice(b"Test\0");
    expected.extend_from_slice(b"Test Model J\0");
    expected.extend_from_slice(b"0.001\0");
    expected.extend_from_slice(b"0.002\0");
    expected.push(2);
    expected.extend_from_slice(b"Yard\0");
    expected.extend_from_slice(b"West throat\0");
    assert_eq!(data, expected);
}

#[test]
fn identify_events_enumerates_on_the_wire() {
    let mut iface = interface();
    let mut driver = TestDriver::new();
    let mut handler = handler();
    iface.create_node(NodeId::new(NODE_ID), &PARAMS).unwrap();
    login(&mut iface, &mut driver, &mut handler);

    let id = identifier::openlcb_message(Mti::EVENTS_IDENTIFY, Alias::new(0xAAA));
    iface.on_can_frame(&CanFrame::new(id, &[]));

    let frames = drain(&mut iface, &mut driver, &mut handler, 8);
    let mtis: Vec<Mti> = frames.iter().map(|f| f.openlcb_mti()).collect();
    assert_eq!(
        mtis,
        vec![
            Mti::PRODUCER_IDENTIFIED_UNKNOWN,
            Mti::PRODUCER_IDENTIFIED_UNKNOWN,
            Mti::CONSUMER_IDENTIFIED_UNKNOWN,
        ],
    );
}

#[test]
fn config_mem_read_datagram_round_trip() {
    let mut iface = interface();
    let mut driver = TestDriver::new();
    let mut handler = handler();
    iface.create_node(NodeId::new(NODE_ID), &PARAMS).unwrap();
    login(&mut iface, &mut driver, &mut handler);
    let alias = iface.node(0).unwrap().alias;

    // Read four bytes of config memory at 0; space 0xFD is not marked
    // present in these parameters, so the read fails cleanly.
    iface.on_can_frame(&CanFrame::new(
        identifier::datagram(
            openlcb_network::wire::FrameType::DatagramOnly,
            alias,
            Alias::new(0xAAA),
        ),
        &[0x20, 0x41, 0x00, 0x00, 0x00, 0x00, 0x04],
    ));

    let frames = drain(&mut iface, &mut driver, &mut handler, 8);
    assert_eq!(frames.len(), 2);

    // First the ACK with reply pending.
    assert_eq!(frames[0].openlcb_mti(), Mti::DATAGRAM_OK_REPLY);
    assert_eq!(frames[0].payload()[2..], [0x80]);

    // Then the read-failure datagram naming the unknown space.
    assert_eq!(frames[1].openlcb_mti(), Mti::DATAGRAM);
    assert_eq!(
        frames[1].payload(),
        &[0x20, 0x59, 0x00, 0x00, 0x00, 0x00, 0x10, 0x81],
    );
}

#[test]
fn produced_event_report_goes_out() {
    let mut iface = interface();
    let mut driver = TestDriver::new();
    let mut handler = handler();
    iface.create_node(NodeId::new(NODE_ID), &PARAMS).unwrap();
    login(&mut iface, &mut driver, &mut handler);
    let alias = iface.node(0).unwrap().alias;

    let event = openlcb_core::event::EventId::from_node(NodeId::new(NODE_ID), 0);
    application::send_event_report(&mut iface, 0, event).unwrap();

    let frames = drain(&mut iface, &mut driver, &mut handler, 4);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].openlcb_mti(), Mti::PC_EVENT_REPORT);
    assert_eq!(frames[0].source_alias(), alias);
    assert_eq!(frames[0].payload(), &event.to_bytes());
}
