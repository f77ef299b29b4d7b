//! Query caches: field-backed views of a pattern's current matches
//!
//! A cache subscribes to a pattern and keeps a container in a reactive
//! field in step with the patch stream. Supports are reference counted, so
//! two facets asserting the same value yield one entry, and the entry goes
//! away only with the last support.
//!
//! Because the container lives in a field, endpoints and dataflow blocks
//! that read it are re-run when it changes.

use crate::actor::Field;
use crate::dataspace::{Delivery, SubscriptionKind};
use crate::pattern::{Captures, Pattern};
use crate::runtime::{ActorResult, Turn};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

type Projection<T> = Box<dyn Fn(&Captures) -> T>;
type Callback<T> = Box<dyn FnMut(&mut Turn<'_>, &T) -> ActorResult<()>>;
type PairCallback<K, V> = Box<dyn FnMut(&mut Turn<'_>, &K, &V) -> ActorResult<()>>;

/// A set view: each match is projected to one element
pub struct SetQuery<T> {
    pattern: Pattern,
    project: Projection<T>,
    on_add: Option<Callback<T>>,
    on_remove: Option<Callback<T>>,
}

impl<T> SetQuery<T> {
    pub fn new(pattern: Pattern, project: impl Fn(&Captures) -> T + 'static) -> Self {
        Self {
            pattern,
            project: Box::new(project),
            on_add: None,
            on_remove: None,
        }
    }

    /// Called once per element that becomes present
    pub fn on_add(mut self, f: impl FnMut(&mut Turn<'_>, &T) -> ActorResult<()> + 'static) -> Self {
        self.on_add = Some(Box::new(f));
        self
    }

    /// Called once per element that stops being present
    pub fn on_remove(
        mut self,
        f: impl FnMut(&mut Turn<'_>, &T) -> ActorResult<()> + 'static,
    ) -> Self {
        self.on_remove = Some(Box::new(f));
        self
    }
}

impl SetQuery<Captures> {
    /// The set of capture tuples
    pub fn captures(pattern: Pattern) -> Self {
        Self::new(pattern, Captures::clone)
    }
}

/// A keyed view: each match is projected to a key and a value
///
/// Used by both [`Turn::query_hash`] and [`Turn::query_hash_set`].
pub struct HashQuery<K, V> {
    pattern: Pattern,
    key: Projection<K>,
    value: Projection<V>,
    on_add: Option<PairCallback<K, V>>,
    on_remove: Option<PairCallback<K, V>>,
}

impl<K, V> HashQuery<K, V> {
    pub fn new(
        pattern: Pattern,
        key: impl Fn(&Captures) -> K + 'static,
        value: impl Fn(&Captures) -> V + 'static,
    ) -> Self {
        Self {
            pattern,
            key: Box::new(key),
            value: Box::new(value),
            on_add: None,
            on_remove: None,
        }
    }

    /// Called once per (key, value) pair that becomes present
    pub fn on_add(
        mut self,
        f: impl FnMut(&mut Turn<'_>, &K, &V) -> ActorResult<()> + 'static,
    ) -> Self {
        self.on_add = Some(Box::new(f));
        self
    }

    /// Called once per (key, value) pair that stops being present
    pub fn on_remove(
        mut self,
        f: impl FnMut(&mut Turn<'_>, &K, &V) -> ActorResult<()> + 'static,
    ) -> Self {
        self.on_remove = Some(Box::new(f));
        self
    }
}

/// Handle to a set cache
pub struct QuerySet<T> {
    field: Field<BTreeSet<T>>,
    tainted: Rc<Cell<bool>>,
}

impl<T> Clone for QuerySet<T> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            tainted: self.tainted.clone(),
        }
    }
}

impl<T: Ord + Clone + 'static> QuerySet<T> {
    /// The backing field, for reading inside endpoints and dataflow blocks
    pub fn field(&self) -> Field<BTreeSet<T>> {
        self.field
    }

    pub fn contains(&self, t: &mut Turn<'_>, item: &T) -> ActorResult<bool> {
        t.with(&self.field, |set| set.contains(item))
    }

    pub fn len(&self, t: &mut Turn<'_>) -> ActorResult<usize> {
        t.with(&self.field, BTreeSet::len)
    }

    pub fn is_empty(&self, t: &mut Turn<'_>) -> ActorResult<bool> {
        t.with(&self.field, BTreeSet::is_empty)
    }

    pub fn snapshot(&self, t: &mut Turn<'_>) -> ActorResult<BTreeSet<T>> {
        t.get(&self.field)
    }

    /// Mutate the container directly
    ///
    /// The cache no longer reflects the dataspace until its next patch,
    /// which rebuilds the container from the reference counts.
    pub fn modify_unchecked<R>(
        &self,
        t: &mut Turn<'_>,
        f: impl FnOnce(&mut BTreeSet<T>) -> R,
    ) -> ActorResult<R> {
        self.tainted.set(true);
        t.update(&self.field, f)
    }
}

/// Handle to a key → value cache
///
/// When several values share a key, the smallest one is exposed.
pub struct QueryHash<K, V> {
    field: Field<BTreeMap<K, V>>,
    tainted: Rc<Cell<bool>>,
}

impl<K, V> Clone for QueryHash<K, V> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            tainted: self.tainted.clone(),
        }
    }
}

impl<K: Ord + Clone + 'static, V: Clone + 'static> QueryHash<K, V> {
    pub fn field(&self) -> Field<BTreeMap<K, V>> {
        self.field
    }

    pub fn get(&self, t: &mut Turn<'_>, key: &K) -> ActorResult<Option<V>> {
        t.with(&self.field, |map| map.get(key).cloned())
    }

    pub fn contains_key(&self, t: &mut Turn<'_>, key: &K) -> ActorResult<bool> {
        t.with(&self.field, |map| map.contains_key(key))
    }

    pub fn len(&self, t: &mut Turn<'_>) -> ActorResult<usize> {
        t.with(&self.field, BTreeMap::len)
    }

    pub fn snapshot(&self, t: &mut Turn<'_>) -> ActorResult<BTreeMap<K, V>> {
        t.get(&self.field)
    }

    /// Mutate the container directly; see [`QuerySet::modify_unchecked`]
    pub fn modify_unchecked<R>(
        &self,
        t: &mut Turn<'_>,
        f: impl FnOnce(&mut BTreeMap<K, V>) -> R,
    ) -> ActorResult<R> {
        self.tainted.set(true);
        t.update(&self.field, f)
    }
}

/// Handle to a key → set of values cache
pub struct QueryHashSet<K, V> {
    field: Field<BTreeMap<K, BTreeSet<V>>>,
    tainted: Rc<Cell<bool>>,
}

impl<K, V> Clone for QueryHashSet<K, V> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            tainted: self.tainted.clone(),
        }
    }
}

impl<K: Ord + Clone + 'static, V: Ord + Clone + 'static> QueryHashSet<K, V> {
    pub fn field(&self) -> Field<BTreeMap<K, BTreeSet<V>>> {
        self.field
    }

    /// Values under `key`; empty when the key is absent
    pub fn get(&self, t: &mut Turn<'_>, key: &K) -> ActorResult<BTreeSet<V>> {
        t.with(&self.field, |map| map.get(key).cloned().unwrap_or_default())
    }

    pub fn contains(&self, t: &mut Turn<'_>, key: &K, value: &V) -> ActorResult<bool> {
        t.with(&self.field, |map| {
            map.get(key).is_some_and(|values| values.contains(value))
        })
    }

    pub fn snapshot(&self, t: &mut Turn<'_>) -> ActorResult<BTreeMap<K, BTreeSet<V>>> {
        t.get(&self.field)
    }

    /// Mutate the container directly; see [`QuerySet::modify_unchecked`]
    pub fn modify_unchecked<R>(
        &self,
        t: &mut Turn<'_>,
        f: impl FnOnce(&mut BTreeMap<K, BTreeSet<V>>) -> R,
    ) -> ActorResult<R> {
        self.tainted.set(true);
        t.update(&self.field, f)
    }
}

/// Reference counts of present items
struct Bag<T> {
    counts: BTreeMap<T, usize>,
}

impl<T: Ord> Bag<T> {
    fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// True when `item` becomes present
    fn add(&mut self, item: T) -> bool {
        let count = self.counts.entry(item).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// True when `item` stops being present
    fn remove(&mut self, item: &T) -> bool {
        match self.counts.get_mut(item) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(item);
                true
            }
            None => false,
        }
    }
}

/// Per-key reference counts of present values
struct PairBag<K, V> {
    entries: BTreeMap<K, Bag<V>>,
}

impl<K: Ord + Clone, V: Ord> PairBag<K, V> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    fn add(&mut self, key: K, value: V) -> bool {
        self.entries.entry(key).or_insert_with(Bag::new).add(value)
    }

    fn remove(&mut self, key: &K, value: &V) -> bool {
        let Some(bag) = self.entries.get_mut(key) else {
            return false;
        };
        let last = bag.remove(value);
        if bag.counts.is_empty() {
            self.entries.remove(key);
        }
        last
    }

    fn values(&self, key: &K) -> impl Iterator<Item = &V> {
        self.entries
            .get(key)
            .into_iter()
            .flat_map(|bag| bag.counts.keys())
    }
}

impl Turn<'_> {
    /// Maintain the set of projected matches of a pattern
    pub fn query_set<T: Ord + Clone + 'static>(
        &mut self,
        spec: SetQuery<T>,
    ) -> ActorResult<QuerySet<T>> {
        let SetQuery {
            pattern,
            project,
            mut on_add,
            mut on_remove,
        } = spec;
        let field = self.field(BTreeSet::new())?;
        let tainted = Rc::new(Cell::new(false));
        let taint = tainted.clone();
        let mut bag = Bag::new();

        self.subscribe(
            pattern,
            SubscriptionKind::Assertions,
            Box::new(move |t, delivery| {
                let Delivery::Patch(patch) = delivery else {
                    return Ok(());
                };
                let mut appeared = Vec::new();
                let mut vanished = Vec::new();
                for captures in patch.added.values() {
                    let item = project(captures);
                    if bag.add(item.clone()) {
                        appeared.push(item);
                    }
                }
                for captures in patch.removed.values() {
                    let item = project(captures);
                    if bag.remove(&item) {
                        vanished.push(item);
                    }
                }

                let rebuild = taint.replace(false);
                if rebuild || !appeared.is_empty() || !vanished.is_empty() {
                    t.update(&field, |set| {
                        if rebuild {
                            *set = bag.counts.keys().cloned().collect();
                            return;
                        }
                        for item in &vanished {
                            set.remove(item);
                        }
                        set.extend(appeared.iter().cloned());
                    })?;
                }

                if let Some(callback) = on_remove.as_mut() {
                    for item in &vanished {
                        if !t.is_live() {
                            return Ok(());
                        }
                        callback(t, item)?;
                    }
                }
                if let Some(callback) = on_add.as_mut() {
                    for item in &appeared {
                        if !t.is_live() {
                            return Ok(());
                        }
                        callback(t, item)?;
                    }
                }
                Ok(())
            }),
        )?;
        Ok(QuerySet { field, tainted })
    }

    /// Maintain a key → value map of projected matches
    pub fn query_hash<K, V>(&mut self, spec: HashQuery<K, V>) -> ActorResult<QueryHash<K, V>>
    where
        K: Ord + Clone + 'static,
        V: Ord + Clone + 'static,
    {
        let (field, tainted) = self.keyed_cache(spec, |bag, key| bag.values(key).next().cloned())?;
        Ok(QueryHash { field, tainted })
    }

    /// Maintain a key → set of values map of projected matches
    pub fn query_hash_set<K, V>(
        &mut self,
        spec: HashQuery<K, V>,
    ) -> ActorResult<QueryHashSet<K, V>>
    where
        K: Ord + Clone + 'static,
        V: Ord + Clone + 'static,
    {
        let (field, tainted) = self.keyed_cache(spec, |bag, key| {
            let values: BTreeSet<V> = bag.values(key).cloned().collect();
            (!values.is_empty()).then_some(values)
        })?;
        Ok(QueryHashSet { field, tainted })
    }

    /// Shared machinery of the keyed caches; `summarize` derives the entry
    /// for a key from its present values, `None` when it has none
    fn keyed_cache<K, V, X>(
        &mut self,
        spec: HashQuery<K, V>,
        summarize: fn(&PairBag<K, V>, &K) -> Option<X>,
    ) -> ActorResult<(Field<BTreeMap<K, X>>, Rc<Cell<bool>>)>
    where
        K: Ord + Clone + 'static,
        V: Ord + Clone + 'static,
        X: 'static,
    {
        let HashQuery {
            pattern,
            key,
            value,
            mut on_add,
            mut on_remove,
        } = spec;
        let field = self.field(BTreeMap::new())?;
        let tainted = Rc::new(Cell::new(false));
        let taint = tainted.clone();
        let mut bag = PairBag::new();

        self.subscribe(
            pattern,
            SubscriptionKind::Assertions,
            Box::new(move |t, delivery| {
                let Delivery::Patch(patch) = delivery else {
                    return Ok(());
                };
                let mut appeared = Vec::new();
                let mut vanished = Vec::new();
                for captures in patch.added.values() {
                    let (k, v) = (key(captures), value(captures));
                    if bag.add(k.clone(), v.clone()) {
                        appeared.push((k, v));
                    }
                }
                for captures in patch.removed.values() {
                    let (k, v) = (key(captures), value(captures));
                    if bag.remove(&k, &v) {
                        vanished.push((k, v));
                    }
                }

                let rebuild = taint.replace(false);
                if rebuild || !appeared.is_empty() || !vanished.is_empty() {
                    t.update(&field, |map| {
                        if rebuild {
                            *map = bag
                                .entries
                                .keys()
                                .filter_map(|k| summarize(&bag, k).map(|x| (k.clone(), x)))
                                .collect();
                            return;
                        }
                        for (k, _) in appeared.iter().chain(&vanished) {
                            match summarize(&bag, k) {
                                Some(x) => {
                                    map.insert(k.clone(), x);
                                }
                                None => {
                                    map.remove(k);
                                }
                            }
                        }
                    })?;
                }

                if let Some(callback) = on_remove.as_mut() {
                    for (k, v) in &vanished {
                        if !t.is_live() {
                            return Ok(());
                        }
                        callback(t, k, v)?;
                    }
                }
                if let Some(callback) = on_add.as_mut() {
                    for (k, v) in &appeared {
                        if !t.is_live() {
                            return Ok(());
                        }
                        callback(t, k, v)?;
                    }
                }
                Ok(())
            }),
        )?;
        Ok((field, tainted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::Value;
    use crate::runtime::Network;
    use crate::record;
    use crate::types::ActorId;
    use std::cell::RefCell;

    fn first(captures: &Captures) -> Value {
        captures[0].clone()
    }

    fn second(captures: &Captures) -> Value {
        captures[1].clone()
    }

    #[test]
    fn test_query_set_counts_supports() {
        let mut network = Network::default();
        let cache = Rc::new(RefCell::new(None));
        let slot = cache.clone();
        let watcher = network
            .spawn("watcher", move |t| {
                let set = t.query_set(SetQuery::new("item($)".parse().unwrap(), first))?;
                *slot.borrow_mut() = Some(set);
                Ok(())
            })
            .unwrap();
        let a = network
            .spawn("a", |t| t.assert(record!("item", 1i64)).map(|_| ()))
            .unwrap();
        let b = network
            .spawn("b", |t| t.assert(record!("item", 1i64)).map(|_| ()))
            .unwrap();

        let set = cache.borrow().clone().unwrap();
        let contents = |network: &mut Network| {
            let mut out = BTreeSet::new();
            let set = set.clone();
            network
                .execute(watcher, |t| {
                    out = set.snapshot(t)?;
                    Ok(())
                })
                .unwrap();
            out
        };
        assert_eq!(contents(&mut network), BTreeSet::from([Value::int(1)]));
        network.terminate(a).unwrap();
        assert_eq!(contents(&mut network), BTreeSet::from([Value::int(1)]));
        network.terminate(b).unwrap();
        assert!(contents(&mut network).is_empty());
    }

    #[test]
    fn test_callbacks_fire_once_per_element() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut network = Network::default();
        let (added, removed) = (log.clone(), log.clone());
        network
            .spawn("watcher", move |t| {
                t.query_set(
                    SetQuery::new("item($)".parse().unwrap(), first)
                        .on_add(move |_, v| {
                            added.borrow_mut().push(format!("+{v}"));
                            Ok(())
                        })
                        .on_remove(move |_, v| {
                            removed.borrow_mut().push(format!("-{v}"));
                            Ok(())
                        }),
                )?;
                Ok(())
            })
            .unwrap();
        let a = network
            .spawn("a", |t| t.assert(record!("item", 1i64)).map(|_| ()))
            .unwrap();
        let b = network
            .spawn("b", |t| t.assert(record!("item", 1i64)).map(|_| ()))
            .unwrap();
        network.terminate(a).unwrap();
        network.terminate(b).unwrap();
        assert_eq!(*log.borrow(), vec!["+1", "-1"]);
    }

    #[test]
    fn test_query_hash_exposes_smallest_value() {
        let mut network = Network::default();
        let out = Rc::new(RefCell::new(Vec::new()));
        let seen = out.clone();
        let watcher: ActorId = network
            .spawn("watcher", move |t| {
                let query = HashQuery::new("price($, $)".parse().unwrap(), first, second);
                let hash = t.query_hash(query)?;
                t.dataflow(move |t| {
                    let price = hash.get(t, &Value::symbol("apple"))?;
                    seen.borrow_mut().push(price);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        network
            .spawn("shop", |t| {
                t.assert("price(apple, 7)".parse().unwrap())?;
                t.assert("price(apple, 3)".parse().unwrap())?;
                Ok(())
            })
            .unwrap();
        assert!(network.is_alive(watcher));
        assert_eq!(out.borrow().last(), Some(&Some(Value::int(3))));
    }

    #[test]
    fn test_query_hash_set_groups_values() {
        let mut network = Network::default();
        let out = Rc::new(RefCell::new(BTreeMap::new()));
        let seen = out.clone();
        network
            .spawn("watcher", move |t| {
                let query = HashQuery::new("member($, $)".parse().unwrap(), first, second);
                let groups = t.query_hash_set(query)?;
                t.dataflow(move |t| {
                    *seen.borrow_mut() = groups.snapshot(t)?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        let club = network
            .spawn("club", |t| {
                t.assert("member(chess, alice)".parse().unwrap())?;
                t.assert("member(chess, bob)".parse().unwrap())?;
                t.assert("member(go, carol)".parse().unwrap())?;
                Ok(())
            })
            .unwrap();
        assert_eq!(out.borrow().len(), 2);
        assert_eq!(out.borrow()[&Value::symbol("chess")].len(), 2);
        network
            .execute(club, |t| {
                t.retract(&"member(go, carol)".parse().unwrap())?;
                Ok(())
            })
            .unwrap();
        assert!(!out.borrow().contains_key(&Value::symbol("go")));
    }

    #[test]
    fn test_modify_unchecked_is_reconciled_by_next_patch() {
        let mut network = Network::default();
        let cache = Rc::new(RefCell::new(None));
        let slot = cache.clone();
        let watcher = network
            .spawn("watcher", move |t| {
                let set = t.query_set(SetQuery::new("item($)".parse().unwrap(), first))?;
                *slot.borrow_mut() = Some(set);
                Ok(())
            })
            .unwrap();
        network
            .spawn("a", |t| t.assert(record!("item", 1i64)).map(|_| ()))
            .unwrap();
        let set = cache.borrow().clone().unwrap();

        let tampered = set.clone();
        network
            .execute(watcher, move |t| {
                tampered.modify_unchecked(t, |items| items.insert(Value::int(99)))?;
                assert!(tampered.contains(t, &Value::int(99))?);
                Ok(())
            })
            .unwrap();

        network
            .spawn("b", |t| t.assert(record!("item", 2i64)).map(|_| ()))
            .unwrap();
        let checked = set.clone();
        network
            .execute(watcher, move |t| {
                assert_eq!(
                    checked.snapshot(t)?,
                    BTreeSet::from([Value::int(1), Value::int(2)])
                );
                Ok(())
            })
            .unwrap();
    }
}
