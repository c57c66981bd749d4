use crate::phy::Driver;
use crate::wire::can::identifier;
use crate::wire::{CanFrame, FrameType, FramingBits, LEN_CAN_PAYLOAD};
use openlcb_core::alias::Alias;
use openlcb_core::mti::Mti;

/// Data bytes per frame once the destination alias occupies the first
/// two payload octets.
const LEN_ADDRESSED_CHUNK: usize = LEN_CAN_PAYLOAD - 2;

/// A borrowed view of one outgoing message, however it is stored.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingView<'m> {
    pub mti: Mti,
    pub source_alias: Alias,
    pub dest_alias: Alias,
    pub payload: &'m [u8],
}

/// Optional hook invoked for every frame handed to the hardware.
pub type TxObserver = fn(&CanFrame);

/// Fragment one OpenLCB message into ordered CAN frames and hand them
/// to the driver.
///
/// Returns `false` for "try later": the hardware buffer was not empty,
/// so nothing was sent and the caller keeps the message. Once the
/// first frame is out the whole sequence follows before this function
/// returns, so a multi-frame message is never interleaved with another
/// message from this node.
pub(crate) fn send_openlcb_message<D: Driver>(
    driver: &mut D,
    msg: OutgoingView,
    observer: Option<TxObserver>,
) -> bool {
    if !driver.is_transmit_empty() {
        return false;
    }

    if msg.mti == Mti::DATAGRAM {
        send_datagram(driver, msg, observer)
    } else if msg.mti.is_stream() {
        send_stream(driver, msg, observer)
    } else if msg.mti.is_addressed() {
        send_addressed(driver, msg, observer)
    } else {
        send_unaddressed(driver, msg, observer)
    }
}

/// Thin pass-through for login and control frames.
///
/// `false` means the driver could not take the frame; the caller
/// retries on a later poll.
pub(crate) fn send_can_frame<D: Driver>(
    driver: &mut D,
    frame: &CanFrame,
    observer: Option<TxObserver>,
) -> bool {
    match driver.transmit(frame) {
        Ok(()) => {
            if let Some(callback) = observer {
                callback(frame);
            }
            true
        }
        Err(nb::Error::WouldBlock) => false,
        Err(nb::Error::Other(_)) => {
            net_debug!("tx: driver rejected frame");
            false
        }
    }
}

fn transmit_all<D: Driver>(driver: &mut D, frame: &CanFrame, observer: Option<TxObserver>) -> bool {
    loop {
        match driver.transmit(frame) {
            Ok(()) => {
                if let Some(callback) = observer {
                    callback(frame);
                }
                return true;
            }
            // Stall inside the sequence; releasing the bus here would
            // let another message interleave.
            Err(nb::Error::WouldBlock) => continue,
            Err(nb::Error::Other(_)) => {
                net_debug!("tx: driver rejected frame mid-sequence");
                return false;
            }
        }
    }
}

fn send_datagram<D: Driver>(driver: &mut D, msg: OutgoingView, observer: Option<TxObserver>) -> bool {
    if msg.payload.len() <= LEN_CAN_PAYLOAD {
        let id = identifier::datagram(FrameType::DatagramOnly, msg.dest_alias, msg.source_alias);
        return transmit_all(driver, &CanFrame::new(id, msg.payload), observer);
    }

    let mut index = 0;
    while index < msg.payload.len() {
        let remaining = msg.payload.len() - index;
        let count = remaining.min(LEN_CAN_PAYLOAD);
        let frame_type = if index == 0 {
            FrameType::DatagramFirst
        } else if remaining <= LEN_CAN_PAYLOAD {
            FrameType::DatagramFinal
        } else {
            FrameType::DatagramMiddle
        };

        let id = identifier::datagram(frame_type, msg.dest_alias, msg.source_alias);
        let frame = CanFrame::new(id, &msg.payload[index..index + count]);
        if !transmit_all(driver, &frame, observer) {
            return false;
        }
        index += count;
    }
    true
}

fn send_addressed<D: Driver>(driver: &mut D, msg: OutgoingView, observer: Option<TxObserver>) -> bool {
    let id = identifier::openlcb_message(msg.mti, msg.source_alias);
    let dest = msg.dest_alias.to_bytes();

    if msg.payload.len() <= LEN_ADDRESSED_CHUNK {
        let mut frame = CanFrame::new(id, &dest);
        frame.append_payload(msg.payload);
        return transmit_all(driver, &frame, observer);
    }

    let mut index = 0;
    while index < msg.payload.len() {
        let remaining = msg.payload.len() - index;
        let count = remaining.min(LEN_ADDRESSED_CHUNK);
        let framing = if index == 0 {
            FramingBits::First
        } else if remaining <= LEN_ADDRESSED_CHUNK {
            FramingBits::Final
        } else {
            FramingBits::Middle
        };

        let mut frame = CanFrame::new(id, &[dest[0] | framing as u8, dest[1]]);
        frame.append_payload(&msg.payload[index..index + count]);
        if !transmit_all(driver, &frame, observer) {
            return false;
        }
        index += count;
    }
    true
}

fn send_unaddressed<D: Driver>(
    driver: &mut D,
    msg: OutgoingView,
    observer: Option<TxObserver>,
) -> bool {
    if msg.payload.len() <= LEN_CAN_PAYLOAD {
        let id = identifier::openlcb_message(msg.mti, msg.source_alias);
        return transmit_all(driver, &CanFrame::new(id, msg.payload), observer);
    }

    // The only unaddressed message longer than one frame is the Event
    // Report with payload, which has its own CAN-level MTI per frame.
    debug_assert!(msg.mti == Mti::PC_EVENT_REPORT, "oversized unaddressed message");

    let mut index = 0;
    while index < msg.payload.len() {
        let remaining = msg.payload.len() - index;
        let count = remaining.min(LEN_CAN_PAYLOAD);
        let mti = if index == 0 {
            Mti::PCER_WITH_PAYLOAD_FIRST
        } else if remaining <= LEN_CAN_PAYLOAD {
            Mti::PCER_WITH_PAYLOAD_LAST
        } else {
            Mti::PCER_WITH_PAYLOAD_MIDDLE
        };

        let id = identifier::openlcb_message(mti, msg.source_alias);
        let frame = CanFrame::new(id, &msg.payload[index..index + count]);
        if !transmit_all(driver, &frame, observer) {
            return false;
        }
        index += count;
    }
    true
}

fn send_stream<D: Driver>(driver: &mut D, msg: OutgoingView, observer: Option<TxObserver>) -> bool {
    let id = identifier::stream(msg.source_alias);
    let dest = msg.dest_alias.to_bytes();

    let mut index = 0;
    loop {
        let remaining = msg.payload.len() - index;
        let count = remaining.min(LEN_ADDRESSED_CHUNK);

        let mut frame = CanFrame::new(id, &dest);
        frame.append_payload(&msg.payload[index..index + count]);
        if !transmit_all(driver, &frame, observer) {
            return false;
        }
        index += count;

        if index >= msg.payload.len() {
            return true;
        }
    }
}
