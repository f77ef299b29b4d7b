//! Turn: the handle through which handlers act on the network
//!
//! A `Turn` is bound to one facet of one actor. Structural operations
//! (endpoints, subscriptions, child facets, hooks) require that facet to be
//! live; field access requires the field to belong to the same actor.

use super::{ActorError, ActorResult, Network};
use crate::actor::{Entity, Event, FacetState, Field, Hook, Reaction};
use crate::assertion::Value;
use crate::dataspace::{Delivery, SubscriptionKind};
use crate::pattern::{Captures, Pattern};
use crate::types::{ActorId, DataflowId, EndpointId, FacetId, SubscriptionId, TurnId};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

pub struct Turn<'a> {
    network: &'a mut Network,
    actor: ActorId,
    facet: FacetId,
}

impl<'a> Turn<'a> {
    pub(crate) fn new(network: &'a mut Network, actor: ActorId, facet: FacetId) -> Self {
        Self {
            network,
            actor,
            facet,
        }
    }

    pub(crate) fn network(&mut self) -> &mut Network {
        self.network
    }

    /// Run `f` with this turn rebound to another facet of the same actor
    pub(crate) fn in_facet<R>(
        &mut self,
        facet: FacetId,
        f: impl FnOnce(&mut Turn<'_>) -> ActorResult<R>,
    ) -> ActorResult<R> {
        self.network.run_in(facet, f)
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn facet(&self) -> FacetId {
        self.facet
    }

    pub fn turn_id(&self) -> TurnId {
        self.network.current_turn()
    }

    /// Whether the bound facet can still acquire endpoints and subscriptions
    pub fn is_live(&self) -> bool {
        self.network.facet_is_live(self.facet)
    }

    pub fn facet_state(&self, facet: FacetId) -> Option<FacetState> {
        self.network.facet_state(facet)
    }

    pub fn is_alive(&self, actor: ActorId) -> bool {
        self.network.is_alive(actor)
    }

    /// Committed assertions matching a pattern
    pub fn query(&self, pattern: &Pattern) -> Vec<Value> {
        self.network.query(pattern)
    }

    /// Fix the arity of a record label
    pub fn declare_shape(&mut self, label: &str, arity: usize) -> ActorResult<()> {
        Ok(self.network.dataspace.declare_shape(label, arity)?)
    }

    // ----- actors -----

    /// Spawn a new actor; its boot runs before this call returns
    ///
    /// A failing boot terminates the new actor only.
    pub fn spawn<F>(&mut self, name: impl Into<String>, boot: F) -> ActorId
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()>,
    {
        self.network.create_actor(name.into(), boot)
    }

    /// Stop the current actor
    pub fn quit(&mut self) -> ActorResult<()> {
        let root = self
            .network
            .actor_root(self.actor)
            .ok_or(ActorError::FacetNotLive(self.facet))?;
        self.stop_facet(root)
    }

    /// Stop another actor; false if it is not alive
    pub fn terminate_actor(&mut self, actor: ActorId) -> ActorResult<bool> {
        match self.network.actor_root(actor) {
            Some(root) => Ok(self.network.stop_facet(root)),
            None => Ok(false),
        }
    }

    // ----- assertions -----

    /// Publish a constant value for as long as the facet lives
    pub fn assert(&mut self, value: Value) -> ActorResult<EndpointId> {
        self.network
            .add_endpoint(self.facet, Box::new(move |_| Ok(Some(value.clone()))))
    }

    /// Publish a value computed from fields, re-published when they change
    ///
    /// `None` publishes nothing.
    pub fn assert_with<F>(&mut self, compute: F) -> ActorResult<EndpointId>
    where
        F: FnMut(&mut Turn<'_>) -> ActorResult<Option<Value>> + 'static,
    {
        self.network.add_endpoint(self.facet, Box::new(compute))
    }

    /// Remove the endpoints of this facet currently publishing `value`
    pub fn retract(&mut self, value: &Value) -> ActorResult<bool> {
        let endpoints = self.network.endpoints_publishing(self.facet, value);
        for id in &endpoints {
            self.network.remove_endpoint(self.actor, *id)?;
        }
        Ok(!endpoints.is_empty())
    }

    pub fn remove_endpoint(&mut self, id: EndpointId) -> ActorResult<()> {
        self.network.remove_endpoint(self.actor, id)
    }

    /// Send a message, delivered at the next commit
    pub fn send(&mut self, message: Value) -> ActorResult<()> {
        Ok(self.network.send_message(message)?)
    }

    // ----- subscriptions -----

    pub(crate) fn subscribe(
        &mut self,
        pattern: Pattern,
        kind: SubscriptionKind,
        reaction: Reaction,
    ) -> ActorResult<SubscriptionId> {
        self.network.add_subscription(self.facet, pattern, kind, reaction)
    }

    /// Cancel a subscription of this actor
    ///
    /// No further events reach its handler, and its `observe` interest is
    /// withdrawn.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> ActorResult<()> {
        self.network.remove_subscription(self.actor, subscription)
    }

    /// Run `handler` with the captures of every matching event
    pub fn on<F>(&mut self, event: Event, mut handler: F) -> ActorResult<SubscriptionId>
    where
        F: FnMut(&mut Turn<'_>, &Captures) -> ActorResult<()> + 'static,
    {
        let pattern = event.pattern().clone();
        let kind = event.kind();
        self.subscribe(
            pattern,
            kind,
            Box::new(move |t, delivery| {
                for (_, captures) in event.firings(delivery) {
                    if !t.is_live() {
                        break;
                    }
                    handler(t, &captures)?;
                }
                Ok(())
            }),
        )
    }

    /// Route the event's subscription to an entity
    ///
    /// Assertion events deliver both appearances and withdrawals to the
    /// entity (withdrawals first); message events deliver messages.
    pub fn attach<E: Entity>(
        &mut self,
        event: Event,
        mut entity: E,
    ) -> ActorResult<SubscriptionId> {
        let pattern = event.pattern().clone();
        self.subscribe(
            pattern,
            event.kind(),
            Box::new(move |t, delivery| match delivery {
                Delivery::Patch(patch) => {
                    for (value, captures) in &patch.removed {
                        entity.retracted(t, value, captures)?;
                    }
                    for (value, captures) in &patch.added {
                        entity.asserted(t, value, captures)?;
                    }
                    Ok(())
                }
                Delivery::Message { value, captures } => entity.message(t, value, captures),
            }),
        )
    }

    /// Run `body` in a child facet for each distinct capture of `pattern`
    ///
    /// The child lives while at least one matching assertion with those
    /// captures is present.
    pub fn during<F>(&mut self, pattern: Pattern, mut body: F) -> ActorResult<SubscriptionId>
    where
        F: FnMut(&mut Turn<'_>, &Captures) -> ActorResult<()> + 'static,
    {
        let mut live: BTreeMap<Captures, (usize, Option<FacetId>)> = BTreeMap::new();
        self.subscribe(
            pattern,
            SubscriptionKind::Assertions,
            Box::new(move |t, delivery| {
                let Delivery::Patch(patch) = delivery else {
                    return Ok(());
                };
                // additions are counted first: a capture replaced within
                // one patch keeps its child
                let mut fresh = Vec::new();
                for captures in patch.added.values() {
                    let slot = live.entry(captures.clone()).or_insert((0, None));
                    slot.0 += 1;
                    if slot.0 == 1 && slot.1.is_none() {
                        fresh.push(captures.clone());
                    }
                }
                for captures in patch.removed.values() {
                    if let Entry::Occupied(mut slot) = live.entry(captures.clone()) {
                        slot.get_mut().0 -= 1;
                        if slot.get().0 == 0 {
                            if let (_, Some(child)) = slot.remove() {
                                t.network.stop_facet(child);
                            }
                        }
                    }
                }
                for captures in fresh {
                    if !t.is_live() {
                        break;
                    }
                    let Some(slot) = live.get_mut(&captures) else {
                        continue;
                    };
                    let child = t.network.next_facet_id();
                    slot.1 = Some(child);
                    let booted = t
                        .network
                        .boot_facet(child, t.actor, Some(t.facet), |t| body(t, &captures));
                    match booted {
                        Err(error) if error.is_fatal() => return Err(error),
                        Err(error) => t.network.note_fault(t.actor, child, &error),
                        Ok(()) => {}
                    }
                }
                Ok(())
            }),
        )
    }

    // ----- facets -----

    /// Create and boot a child facet of the current facet
    pub fn react<F>(&mut self, boot: F) -> ActorResult<FacetId>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()>,
    {
        if !self.is_live() {
            return Err(ActorError::FacetNotLive(self.facet));
        }
        let child = self.network.next_facet_id();
        self.network
            .boot_facet(child, self.actor, Some(self.facet), boot)?;
        Ok(child)
    }

    pub fn on_start<F>(&mut self, hook: F) -> ActorResult<()>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()> + 'static,
    {
        self.network.push_on_start(self.facet, Box::new(hook))
    }

    pub fn on_stop<F>(&mut self, hook: F) -> ActorResult<()>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()> + 'static,
    {
        self.network.push_on_stop(self.facet, Box::new(hook))
    }

    /// Stop the current facet when the event fires
    pub fn stop_when(&mut self, event: Event) -> ActorResult<SubscriptionId> {
        self.stop_when_inner(event, None)
    }

    /// Stop the current facet when the event fires, then run `then` in
    /// the parent facet
    pub fn stop_when_then<F>(&mut self, event: Event, then: F) -> ActorResult<SubscriptionId>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()> + 'static,
    {
        self.stop_when_inner(event, Some(Box::new(then)))
    }

    fn stop_when_inner(
        &mut self,
        event: Event,
        mut then: Option<Hook>,
    ) -> ActorResult<SubscriptionId> {
        let pattern = event.pattern().clone();
        let kind = event.kind();
        self.subscribe(
            pattern,
            kind,
            Box::new(move |t, delivery| {
                if event.firings(delivery).is_empty() || !t.is_live() {
                    return Ok(());
                }
                let parent = t.network.facet_parent(t.facet);
                t.network.stop_facet(t.facet);
                if let (Some(then), Some(parent)) = (then.take(), parent) {
                    if t.network.facet_is_live(parent) {
                        if let Err(error) = t.in_facet(parent, then) {
                            t.network.fault(parent, error);
                        }
                    }
                }
                Ok(())
            }),
        )
    }

    /// Stop the current facet and its subtree
    pub fn stop(&mut self) -> ActorResult<()> {
        self.stop_facet(self.facet)
    }

    /// Stop a facet of the current actor
    pub fn stop_facet(&mut self, facet: FacetId) -> ActorResult<()> {
        match self.network.facet_actor(facet) {
            Some(owner) if owner != self.actor => Err(ActorError::ForeignFacet {
                facet,
                actor: self.actor,
            }),
            Some(_) if self.network.stop_facet(facet) => Ok(()),
            _ => Err(ActorError::FacetNotLive(facet)),
        }
    }

    /// Commit pending effects and let other facets react now
    ///
    /// Events addressed to facets whose handlers are on the stack,
    /// including this one, stay queued.
    pub fn flush(&mut self) -> ActorResult<()> {
        self.network.drain()
    }

    // ----- fields -----

    /// Declare a reactive field in the current facet
    pub fn field<T: 'static>(&mut self, initial: T) -> ActorResult<Field<T>> {
        self.network.add_field(self.facet, initial)
    }

    pub fn get<T: Clone + 'static>(&mut self, field: &Field<T>) -> ActorResult<T> {
        self.with(field, T::clone)
    }

    /// Read a field by reference
    pub fn with<T: 'static, R>(
        &mut self,
        field: &Field<T>,
        f: impl FnOnce(&T) -> R,
    ) -> ActorResult<R> {
        self.network.fields_mut().read(field.id(), self.actor, f)
    }

    pub fn set<T: 'static>(&mut self, field: &Field<T>, value: T) -> ActorResult<()> {
        self.update(field, |slot| *slot = value)
    }

    /// Mutate a field in place; its readers are re-run before the next commit
    pub fn update<T: 'static, R>(
        &mut self,
        field: &Field<T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> ActorResult<R> {
        self.network.fields_mut().write(field.id(), self.actor, f)
    }

    /// Run `body` now and again whenever a field it read changes
    pub fn dataflow<F>(&mut self, body: F) -> ActorResult<DataflowId>
    where
        F: FnMut(&mut Turn<'_>) -> ActorResult<()> + 'static,
    {
        self.network.add_dataflow(self.facet, Box::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_assert_with_tracks_fields() {
        let mut network = Network::default();
        let actor = network
            .spawn("counter", |t| {
                let count = t.field(0i64)?;
                t.assert_with(move |t| Ok(Some(record!("count", t.get(&count)?))))?;
                t.on(Event::message("bump".parse().unwrap()), move |t, _| {
                    t.update(&count, |n| *n += 1)
                })?;
                Ok(())
            })
            .unwrap();
        let counts: Pattern = "count(_)".parse().unwrap();
        assert_eq!(network.query(&counts), vec![record!("count", 0i64)]);
        network.send(Value::symbol("bump")).unwrap();
        network.send(Value::symbol("bump")).unwrap();
        assert_eq!(network.query(&counts), vec![record!("count", 2i64)]);
        assert!(network.is_alive(actor));
    }

    #[test]
    fn test_retract_removes_endpoint() {
        let mut network = Network::default();
        let actor = network
            .spawn("a", |t| {
                t.assert(Value::symbol("x"))?;
                t.assert(Value::symbol("y"))?;
                Ok(())
            })
            .unwrap();
        network
            .execute(actor, |t| {
                assert!(t.retract(&Value::symbol("x"))?);
                assert!(!t.retract(&Value::symbol("z"))?);
                Ok(())
            })
            .unwrap();
        assert_eq!(network.assertions(), vec![Value::symbol("y")]);
    }

    #[test]
    fn test_duplicate_endpoints_in_one_facet() {
        let mut network = Network::default();
        let actor = network
            .spawn("a", |t| {
                let first = t.assert(Value::symbol("x"))?;
                t.assert(Value::symbol("x"))?;
                t.remove_endpoint(first)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(network.assertions(), vec![Value::symbol("x")]);
        network.terminate(actor).unwrap();
        assert!(network.assertions().is_empty());
    }

    #[test]
    fn test_on_start_runs_while_pending() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut network = Network::default();
        let seen = log.clone();
        let actor = network
            .spawn("a", move |t| {
                let on_start = seen.clone();
                t.on_start(move |t| {
                    on_start.borrow_mut().push(("start", t.facet_state(t.facet())));
                    Ok(())
                })?;
                seen.borrow_mut().push(("boot", t.facet_state(t.facet())));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                ("boot", Some(FacetState::Pending)),
                ("start", Some(FacetState::Pending)),
            ]
        );
        let root = network.actor(actor).unwrap().root;
        assert_eq!(network.facet_state(root), Some(FacetState::Active));

        // a hook added to an active facet runs later in the same turn
        let seen = log.clone();
        network
            .execute(actor, move |t| {
                t.on_start(move |t| {
                    seen.borrow_mut().push(("late", t.facet_state(t.facet())));
                    Ok(())
                })
            })
            .unwrap();
        assert_eq!(log.borrow()[2], ("late", Some(FacetState::Active)));
    }

    #[test]
    fn test_failing_on_start_aborts_the_facet() {
        let mut network = Network::default();
        let actor = network
            .spawn("a", |t| {
                t.react(|t| {
                    t.assert(Value::symbol("child"))?;
                    t.on_start(|_| Err(ActorError::failed("no")))
                })?;
                Ok(())
            })
            .unwrap();
        assert!(!network.is_alive(actor));
        assert!(network.assertions().is_empty());
    }

    #[test]
    fn test_stop_facet_of_other_actor_is_fatal() {
        let mut network = Network::default();
        let victim = network.spawn("victim", |_| Ok(())).unwrap();
        let root = network.actor(victim).unwrap().root;
        let attacker = network.spawn("attacker", |_| Ok(())).unwrap();
        let summary = network
            .execute(attacker, move |t| t.stop_facet(root))
            .unwrap();
        assert!(summary.faults[0].fatal);
        assert!(!network.is_alive(attacker));
        assert!(network.is_alive(victim));
    }

    #[test]
    fn test_stop_when_then_runs_in_parent() {
        let mut network = Network::default();
        let actor = network
            .spawn("a", |t| {
                t.react(|t| {
                    t.assert(Value::symbol("waiting"))?;
                    t.stop_when_then(Event::message("go".parse().unwrap()), |t| {
                        t.assert(Value::symbol("done"))?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        network.send(Value::symbol("go")).unwrap();
        let root = network.actor(actor).unwrap().root;
        assert!(network.facet_children(root).is_empty());
        assert_eq!(network.assertions(), vec![Value::symbol("done")]);
    }

    #[test]
    fn test_quit_from_handler_retracts_everything() {
        let mut network = Network::default();
        let actor = network
            .spawn("a", |t| {
                t.assert(Value::symbol("up"))?;
                t.on(Event::message("shutdown".parse().unwrap()), |t, _| t.quit())?;
                Ok(())
            })
            .unwrap();
        network.send(Value::symbol("shutdown")).unwrap();
        assert!(!network.is_alive(actor));
        assert!(network.assertions().is_empty());
    }

    #[test]
    fn test_stop_when_stops_on_assertion() {
        let mut network = Network::default();
        let turns = Rc::new(RefCell::new(Vec::new()));
        let seen = turns.clone();
        let actor = network
            .spawn("a", move |t| {
                seen.borrow_mut().push(t.turn_id());
                t.react(|t| {
                    t.assert(Value::symbol("waiting"))?;
                    t.stop_when(Event::asserted("halt".parse().unwrap()))?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        assert_eq!(network.query(&"waiting".parse().unwrap()).len(), 1);

        network
            .spawn("b", |t| t.assert(Value::symbol("halt")).map(|_| ()))
            .unwrap();
        assert!(network.query(&"waiting".parse().unwrap()).is_empty());
        let root = network.actor(actor).unwrap().root;
        assert!(network.facet_children(root).is_empty());
        assert_eq!(turns.borrow().len(), 1);
        assert!(turns.borrow()[0] < network.current_turn());
    }
}
