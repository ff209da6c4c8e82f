//! Message/reply handler registries (spec.md §3.3, §4.6).
//!
//! Each table is a fixed-capacity array of `(id, handler)` slots searched
//! linearly; registration claims the first vacant slot and fails with
//! [`SfcpError::HandlerTableFull`] once the table is saturated, matching the
//! original's static handler-table sizing.

use crate::buffer::BufferHandle;
use crate::error::SfcpError;

/// A registered handler: given the handle of the buffer holding the
/// payload, process it and report success or failure.
pub type HandlerFn = Box<dyn FnMut(BufferHandle) -> Result<(), SfcpError> + Send>;

struct Entry {
    id: u16,
    handler: HandlerFn,
}

/// Fixed-capacity `(id, handler)` table, used for both the
/// `application_id → handler` table (`MAX_MSG_HANDLERS`) and the
/// `client_id → handler` table (`MAX_REPLY_HANDLERS`).
pub struct HandlerTable {
    capacity: usize,
    entries: Vec<Entry>,
}

impl HandlerTable {
    /// Build an empty table with room for `capacity` handlers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Vec::with_capacity(capacity) }
    }

    /// Register a handler for `id`, replacing any existing registration.
    ///
    /// # Errors
    ///
    /// [`SfcpError::HandlerTableFull`] if `id` is not already registered and
    /// the table has no free slots.
    pub fn register(&mut self, id: u16, handler: HandlerFn) -> Result<(), SfcpError> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.handler = handler;
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(SfcpError::HandlerTableFull);
        }
        self.entries.push(Entry { id, handler });
        Ok(())
    }

    /// Remove the handler registered for `id`, if any.
    pub fn unregister(&mut self, id: u16) {
        self.entries.retain(|e| e.id != id);
    }

    /// Invoke the handler registered for `id` with `handle`.
    ///
    /// # Errors
    ///
    /// Propagates whatever the handler itself returns. The caller is
    /// responsible for mapping "no handler registered" into the
    /// appropriate `SfcpError` variant, since that differs between the
    /// message table (`InvalidApplicationId`) and the reply table
    /// (`InvalidClientId`).
    pub fn dispatch(&mut self, id: u16, handle: BufferHandle) -> Option<Result<(), SfcpError>> {
        self.entries.iter_mut().find(|e| e.id == id).map(|e| (e.handler)(handle))
    }

    /// True if a handler is registered for `id`.
    #[must_use]
    pub fn contains(&self, id: u16) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn registers_up_to_capacity_then_fails() {
        let mut table = HandlerTable::new(2);
        table.register(1, Box::new(|_| Ok(()))).unwrap();
        table.register(2, Box::new(|_| Ok(()))).unwrap();
        let err = table.register(3, Box::new(|_| Ok(()))).unwrap_err();
        assert_eq!(err, SfcpError::HandlerTableFull);
    }

    #[test]
    fn unregister_frees_a_slot() {
        let mut table = HandlerTable::new(1);
        table.register(1, Box::new(|_| Ok(()))).unwrap();
        table.unregister(1);
        table.register(2, Box::new(|_| Ok(()))).unwrap();
        assert!(table.contains(2));
    }

    #[test]
    fn dispatch_invokes_the_registered_handler() {
        let mut table = HandlerTable::new(1);
        table.register(7, Box::new(|handle| if handle == 0 { Ok(()) } else { Err(SfcpError::HandlerFailed) })).unwrap();
        assert_eq!(table.dispatch(7, 0), Some(Ok(())));
        assert_eq!(table.dispatch(7, 9), Some(Err(SfcpError::HandlerFailed)));
        assert!(table.dispatch(8, 0).is_none());
    }
}
