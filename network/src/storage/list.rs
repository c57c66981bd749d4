use super::{BufferStore, Full, MessageHandle};
use managed::ManagedSlice;
use openlcb_core::alias::Alias;
use openlcb_core::mti::Mti;

/// Index of multi-frame messages currently being assembled.
///
/// Keyed by `(source alias, destination alias, MTI)`, which keeps
/// concurrent partial assemblies from different peers apart. Sized to
/// the message pool depth so adding can only fail on a sizing mistake.
pub struct BufferList<'a> {
    slots: ManagedSlice<'a, Option<MessageHandle>>,
}

impl<'a> BufferList<'a> {
    pub fn new<S>(slots: S) -> BufferList<'a>
    where
        S: Into<ManagedSlice<'a, Option<MessageHandle>>>,
    {
        let mut list = BufferList { slots: slots.into() };
        list.slots.fill(None);
        list
    }

    /// Locate the in-progress message for the given key.
    pub fn find(
        &self,
        store: &BufferStore,
        source: Alias,
        dest: Alias,
        mti: Mti,
    ) -> Option<MessageHandle> {
        self.slots.iter().flatten().copied().find(|handle| {
            let msg = store.msg(*handle);
            msg.source_alias == source && msg.dest_alias == dest && msg.mti == mti
        })
    }

    /// Track a newly started assembly. The message must not already be
    /// present; the caller is expected to have looked it up first.
    pub fn add(&mut self, handle: MessageHandle) -> Result<(), Full> {
        debug_assert!(
            !self.slots.iter().flatten().any(|h| *h == handle),
            "message already in the in-progress index",
        );
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(handle);
                return Ok(());
            }
        }
        Err(Full)
    }

    /// Remove a completed or abandoned assembly.
    pub fn release(&mut self, handle: MessageHandle) {
        for slot in self.slots.iter_mut() {
            if *slot == Some(handle) {
                *slot = None;
                return;
            }
        }
    }
}
