use super::{Full, MessageHandle};
use crate::wire::CanFrame;
use managed::ManagedSlice;

/// The ring of completed messages awaiting dispatch.
///
/// Strict FIFO, single producer (the receive context) and single
/// consumer (the main loop). Sized one larger than the message pool so
/// a push can only fail on a sizing mistake, which callers still treat
/// like pool exhaustion.
pub struct MessageFifo<'a> {
    ring: ManagedSlice<'a, Option<MessageHandle>>,
    head: usize,
    count: usize,
}

impl<'a> MessageFifo<'a> {
    pub fn new<R>(ring: R) -> MessageFifo<'a>
    where
        R: Into<ManagedSlice<'a, Option<MessageHandle>>>,
    {
        let mut fifo = MessageFifo {
            ring: ring.into(),
            head: 0,
            count: 0,
        };
        fifo.ring.fill(None);
        fifo
    }

    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Queue a completed message. The caller's reference transfers to
    /// the FIFO.
    pub fn push(&mut self, handle: MessageHandle) -> Result<(), Full> {
        if self.count == self.ring.len() {
            return Err(Full);
        }
        let tail = (self.head + self.count) % self.ring.len();
        self.ring[tail] = Some(handle);
        self.count += 1;
        Ok(())
    }

    /// Take the oldest message; its reference transfers to the caller.
    pub fn pop(&mut self) -> Option<MessageHandle> {
        if self.count == 0 {
            return None;
        }
        let handle = self.ring[self.head].take();
        self.head = (self.head + 1) % self.ring.len();
        self.count -= 1;
        handle
    }
}

/// The ring of CAN frames awaiting hardware transmission.
///
/// Carries the control frames (RID, AMD, AMR) synthesized by the
/// receive path; frames are values, so popping is the only release.
pub struct CanFrameFifo<'a> {
    ring: ManagedSlice<'a, CanFrame>,
    head: usize,
    count: usize,
}

impl<'a> CanFrameFifo<'a> {
    pub fn new<R>(ring: R) -> CanFrameFifo<'a>
    where
        R: Into<ManagedSlice<'a, CanFrame>>,
    {
        let mut fifo = CanFrameFifo {
            ring: ring.into(),
            head: 0,
            count: 0,
        };
        fifo.ring.fill(CanFrame::default());
        fifo
    }

    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn push(&mut self, frame: CanFrame) -> Result<(), Full> {
        if self.count == self.ring.len() {
            return Err(Full);
        }
        let tail = (self.head + self.count) % self.ring.len();
        self.ring[tail] = frame;
        self.count += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<CanFrame> {
        if self.count == 0 {
            return None;
        }
        let frame = self.ring[self.head];
        self.head = (self.head + 1) % self.ring.len();
        self.count -= 1;
        Some(frame)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::{BufferStore, Message};
    use openlcb_core::payload::{
        PayloadKind, LEN_PAYLOAD_BASIC, LEN_PAYLOAD_DATAGRAM, LEN_PAYLOAD_SNIP, LEN_PAYLOAD_STREAM,
    };

    #[test]
    fn test_fifo_order_is_preserved() {
        let mut store = BufferStore::new(
            alloc::vec![Message::default(); 4],
            alloc::vec![[0u8; LEN_PAYLOAD_BASIC]; 4],
            alloc::vec![[0u8; LEN_PAYLOAD_DATAGRAM]; 0],
            alloc::vec![[0u8; LEN_PAYLOAD_SNIP]; 0],
            alloc::vec![[0u8; LEN_PAYLOAD_STREAM]; 0],
        );
        let mut fifo = MessageFifo::new(alloc::vec![None; 5]);

        let first = store.allocate(PayloadKind::Basic).unwrap();
        let second = store.allocate(PayloadKind::Basic).unwrap();
        fifo.push(first).unwrap();
        fifo.push(second).unwrap();

        assert_eq!(fifo.pop(), Some(first));
        assert_eq!(fifo.pop(), Some(second));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_push_fails_when_full() {
        let mut store = BufferStore::new(
            alloc::vec![Message::default(); 3],
            alloc::vec![[0u8; LEN_PAYLOAD_BASIC]; 3],
            alloc::vec![[0u8; LEN_PAYLOAD_DATAGRAM]; 0],
            alloc::vec![[0u8; LEN_PAYLOAD_SNIP]; 0],
            alloc::vec![[0u8; LEN_PAYLOAD_STREAM]; 0],
        );
        let mut fifo = MessageFifo::new(alloc::vec![None; 2]);

        let a = store.allocate(PayloadKind::Basic).unwrap();
        let b = store.allocate(PayloadKind::Basic).unwrap();
        let c = store.allocate(PayloadKind::Basic).unwrap();
        fifo.push(a).unwrap();
        fifo.push(b).unwrap();
        assert_eq!(fifo.push(c), Err(Full));

        // Popping makes room again.
        fifo.pop();
        fifo.push(c).unwrap();
    }

    #[test]
    fn test_can_frame_fifo_wraps_around() {
        let mut fifo = CanFrameFifo::new(alloc::vec![CanFrame::default(); 2]);

        for round in 0..5u32 {
            fifo.push(CanFrame::new(0x1070_0000 + round, &[])).unwrap();
            let frame = fifo.pop().unwrap();
            assert_eq!(frame.identifier(), 0x1070_0000 + round);
        }
        assert!(fifo.is_empty());
    }
}
