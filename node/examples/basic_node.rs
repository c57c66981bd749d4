//! A single virtual node on a simulated bus.
//!
//! Wires the full stack together on the host: caller-provided pools, a
//! loopback driver standing in for the CAN controller, and the
//! standard protocol handlers. Prints every frame the node puts on the
//! wire while it logs in and answers a Verify Node ID enquiry.

use openlcb_core::alias::Alias;
use openlcb_core::error::ErrorCode;
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
use openlcb_network::wire::CanFrame;
use openlcb_node::{ConfigMemory, StandardHandler};

static NODE_PARAMETERS: NodeParameters = {
    let mut parameters = NodeParameters::new();
    parameters.snip = SnipData {
        mfg_version: 4,
        name: "openlcb-rs",
        model: "Basic Node",
        hardware_version: "1.0",
        software_version: "1.0",
        user_version: 2,
    };
    parameters.protocol_support = ProtocolSupport::DATAGRAM
        .union(ProtocolSupport::MEMORY_CONFIGURATION)
        .union(ProtocolSupport::EVENT_EXCHANGE)
        .union(ProtocolSupport::SIMPLE_NODE_INFORMATION)
        .union(ProtocolSupport::CONFIGURATION_DESCRIPTION_INFO);
    parameters.producer_count_autocreate = 2;
    parameters.consumer_count_autocreate = 2;
    parameters
};

/// 512 bytes of RAM standing in for the node's configuration EEPROM.
struct RamConfigMemory {
    data: [u8; 512],
}

impl ConfigMemory for RamConfigMemory {
    fn read(
        &mut self,
        _node: &Node,
        _space: u8,
        address: u32,
        buffer: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        let start = address as usize;
        if start >= self.data.len() {
            return Err(ErrorCode::PERMANENT_CONFIG_MEM_OUT_OF_BOUNDS_INVALID_ADDRESS);
        }
        let count = buffer.len().min(self.data.len() - start);
        buffer[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }

    fn write(
        &mut self,
        _node: &mut Node,
        _space: u8,
        address: u32,
        data: &[u8],
    ) -> Result<(), ErrorCode> {
        let start = address as usize;
        if start + data.len() > self.data.len() {
            return Err(ErrorCode::PERMANENT_CONFIG_MEM_OUT_OF_BOUNDS_INVALID_ADDRESS);
        }
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

fn main() {
    let mut iface = Interface::new(
        BufferStore::new(
            vec![Message::default(); 10],
            vec![[0u8; LEN_PAYLOAD_BASIC]; 4],
            vec![[0u8; LEN_PAYLOAD_DATAGRAM]; 4],
            vec![[0u8; LEN_PAYLOAD_SNIP]; 1],
            vec![[0u8; LEN_PAYLOAD_STREAM]; 1],
        ),
        AliasMap::new(vec![AliasMapping::default(); 1]),
        NodeRegistry::new(Vec::from_iter([None])),
        BufferList::new(vec![None; 10]),
        MessageFifo::new(vec![None; 11]),
        CanFrameFifo::new(vec![CanFrame::default(); 11]),
        NoopLock,
    );

    let mut driver: Loopback<32> = Loopback::new();
    let mut handler = StandardHandler::new(RamConfigMemory { data: [0; 512] });

    let node_id = NodeId::new(0x0102_0304_0506);
    iface.create_node(node_id, &NODE_PARAMETERS).unwrap();
    println!("logging in node {node_id}");

    // The embedded main loop, compressed: poll, drain the driver, tick.
    for _ in 0..64 {
        iface.poll(&mut driver, &mut handler);
        while let Some(frame) = driver.dequeue() {
            println!("  -> {frame}");
        }
        iface.tick_100ms();
        if iface.node(0).map(|node| node.run_state) == Some(RunState::Run) && driver.is_empty() {
            break;
        }
    }

    let alias = iface.node(0).unwrap().alias;
    println!("node is permitted with alias {alias}");

    // A peer asks who is out there.
    let verify = CanFrame::new(0x1949_0000 | 0xAAA, &[]);
    println!("<- {verify} (verify node id global from {})", Alias::new(0xAAA));
    iface.on_can_frame(&verify);

    for _ in 0..4 {
        iface.poll(&mut driver, &mut handler);
        while let Some(frame) = driver.dequeue() {
            println!("  -> {frame} (verified node id)");
        }
    }
}
