//! Reactive fields and their dependency graph
//!
//! Reading a field while an assert endpoint or dataflow block is being
//! evaluated records that reader as a dependent of the field. Writing the
//! field marks every dependent dirty; dirty readers are re-run in id order.

use crate::runtime::{ActorError, ActorResult};
use crate::types::{ActorId, DataflowId, EndpointId, FieldId};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;

/// Handle to a reactive field holding a `T`
///
/// Handles are plain ids: copying one does not copy the value, and a handle
/// to a field whose facet stopped reports `FieldNotLive`.
pub struct Field<T> {
    id: FieldId,
    actor: ActorId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    pub(crate) fn new(id: FieldId, actor: ActorId) -> Self {
        Self {
            id,
            actor,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    /// The actor allowed to access this field
    pub fn actor(&self) -> ActorId {
        self.actor
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({}, {})", self.id, self.actor)
    }
}

/// Something that reads fields and must be re-run when they change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Reader {
    Endpoint(EndpointId),
    Dataflow(DataflowId),
}

impl Reader {
    fn index(self) -> u64 {
        match self {
            Reader::Endpoint(id) => id.index(),
            Reader::Dataflow(id) => id.index(),
        }
    }
}

struct Slot {
    actor: ActorId,
    value: Box<dyn Any>,
    readers: BTreeSet<Reader>,
}

/// Field values plus the per-reader dependency graph
#[derive(Default)]
pub(crate) struct FieldStore {
    slots: HashMap<FieldId, Slot>,
    deps: HashMap<Reader, BTreeSet<FieldId>>,
    tracking: Vec<Reader>,
    dirty: BTreeMap<u64, Reader>,
}

impl FieldStore {
    pub(crate) fn insert(&mut self, id: FieldId, actor: ActorId, value: Box<dyn Any>) {
        self.slots.insert(
            id,
            Slot {
                actor,
                value,
                readers: BTreeSet::new(),
            },
        );
    }

    fn slot(&mut self, id: FieldId, actor: ActorId) -> ActorResult<&mut Slot> {
        let slot = self.slots.get_mut(&id).ok_or(ActorError::FieldNotLive(id))?;
        if slot.actor != actor {
            return Err(ActorError::ForeignField {
                field: id,
                owner: slot.actor,
                actor,
            });
        }
        Ok(slot)
    }

    /// Read a field, recording a dependency for the reader being evaluated
    pub(crate) fn read<T: 'static, R>(
        &mut self,
        id: FieldId,
        actor: ActorId,
        f: impl FnOnce(&T) -> R,
    ) -> ActorResult<R> {
        let reader = self.tracking.last().copied();
        let slot = self.slot(id, actor)?;
        let value = slot
            .value
            .downcast_ref::<T>()
            .ok_or(ActorError::FieldType(id))?;
        let result = f(value);
        if let Some(reader) = reader {
            slot.readers.insert(reader);
            self.deps.entry(reader).or_default().insert(id);
        }
        Ok(result)
    }

    /// Mutate a field and mark its readers dirty
    pub(crate) fn write<T: 'static, R>(
        &mut self,
        id: FieldId,
        actor: ActorId,
        f: impl FnOnce(&mut T) -> R,
    ) -> ActorResult<R> {
        let slot = self.slot(id, actor)?;
        let value = slot
            .value
            .downcast_mut::<T>()
            .ok_or(ActorError::FieldType(id))?;
        let result = f(value);
        let readers: Vec<Reader> = slot.readers.iter().copied().collect();
        for reader in readers {
            self.dirty.insert(reader.index(), reader);
        }
        Ok(result)
    }

    /// Start evaluating a reader, dropping the dependencies of its last run
    pub(crate) fn begin(&mut self, reader: Reader) {
        self.clear_deps(reader);
        self.dirty.remove(&reader.index());
        self.tracking.push(reader);
    }

    pub(crate) fn end(&mut self) {
        self.tracking.pop();
    }

    fn clear_deps(&mut self, reader: Reader) {
        for id in self.deps.remove(&reader).unwrap_or_default() {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.readers.remove(&reader);
            }
        }
    }

    /// Forget a reader entirely (its facet stopped or it was removed)
    pub(crate) fn forget(&mut self, reader: Reader) {
        self.clear_deps(reader);
        self.dirty.remove(&reader.index());
    }

    pub(crate) fn remove(&mut self, id: FieldId) {
        if let Some(slot) = self.slots.remove(&id) {
            for reader in slot.readers {
                if let Some(deps) = self.deps.get_mut(&reader) {
                    deps.remove(&id);
                }
            }
        }
    }

    /// Next dirty reader in id order
    pub(crate) fn pop_dirty(&mut self) -> Option<Reader> {
        self.dirty.pop_first().map(|(_, reader)| reader)
    }

    /// Drop every pending re-evaluation
    pub(crate) fn clear_dirty(&mut self) -> usize {
        std::mem::take(&mut self.dirty).len()
    }

    pub(crate) fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(value: i64) -> FieldStore {
        let mut store = FieldStore::default();
        store.insert(FieldId(1), ActorId(1), Box::new(value));
        store
    }

    #[test]
    fn test_write_marks_readers_dirty() {
        let mut store = store_with(1);
        let reader = Reader::Endpoint(EndpointId(5));
        store.begin(reader);
        assert_eq!(store.read(FieldId(1), ActorId(1), |v: &i64| *v).unwrap(), 1);
        store.end();
        assert!(!store.has_dirty());

        store.write(FieldId(1), ActorId(1), |v: &mut i64| *v = 2).unwrap();
        assert_eq!(store.pop_dirty(), Some(reader));
        assert_eq!(store.pop_dirty(), None);
    }

    #[test]
    fn test_untracked_reads_record_nothing() {
        let mut store = store_with(1);
        store.read(FieldId(1), ActorId(1), |v: &i64| *v).unwrap();
        store.write(FieldId(1), ActorId(1), |v: &mut i64| *v += 1).unwrap();
        assert!(!store.has_dirty());
    }

    #[test]
    fn test_dirty_order_is_by_id() {
        let mut store = store_with(0);
        for reader in [Reader::Dataflow(DataflowId(9)), Reader::Endpoint(EndpointId(3))] {
            store.begin(reader);
            store.read(FieldId(1), ActorId(1), |_: &i64| ()).unwrap();
            store.end();
        }
        store.write(FieldId(1), ActorId(1), |v: &mut i64| *v = 1).unwrap();
        assert_eq!(store.pop_dirty(), Some(Reader::Endpoint(EndpointId(3))));
        assert_eq!(store.pop_dirty(), Some(Reader::Dataflow(DataflowId(9))));
    }

    #[test]
    fn test_access_is_scoped_to_actor() {
        let mut store = store_with(0);
        assert!(matches!(
            store.read(FieldId(1), ActorId(2), |_: &i64| ()),
            Err(ActorError::ForeignField { .. })
        ));
        assert!(matches!(
            store.read(FieldId(1), ActorId(1), |_: &String| ()),
            Err(ActorError::FieldType(_))
        ));
        store.remove(FieldId(1));
        assert!(matches!(
            store.read(FieldId(1), ActorId(1), |_: &i64| ()),
            Err(ActorError::FieldNotLive(_))
        ));
    }

    #[test]
    fn test_rerun_drops_stale_dependencies() {
        let mut store = store_with(0);
        store.insert(FieldId(2), ActorId(1), Box::new(0i64));
        let reader = Reader::Dataflow(DataflowId(7));
        store.begin(reader);
        store.read(FieldId(1), ActorId(1), |_: &i64| ()).unwrap();
        store.end();
        store.begin(reader);
        store.read(FieldId(2), ActorId(1), |_: &i64| ()).unwrap();
        store.end();

        store.write(FieldId(1), ActorId(1), |v: &mut i64| *v = 1).unwrap();
        assert!(!store.has_dirty());
        store.write(FieldId(2), ActorId(1), |v: &mut i64| *v = 1).unwrap();
        assert!(store.has_dirty());
    }
}
