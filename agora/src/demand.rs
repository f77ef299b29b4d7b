//! Demand matcher: one handler actor per unmet demand
//!
//! The matcher tracks two patterns with the same captures. When demand for
//! a capture tuple appears and nothing supplies it, a handler actor is
//! spawned for that tuple; when the demand goes away the handler is
//! stopped. If supply for a tuple vanishes while demand persists and its
//! handler is gone, a fresh handler is spawned.

use crate::actor::Event;
use crate::pattern::{Captures, Pattern, PatternError};
use crate::query::SetQuery;
use crate::runtime::{ActorResult, Turn};
use crate::types::ActorId;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

type Handler = Rc<dyn Fn(&mut Turn<'_>, &Captures) -> ActorResult<()>>;

/// Live handler actors by capture tuple
#[derive(Default)]
struct Handlers {
    live: BTreeMap<Captures, ActorId>,
}

impl Handlers {
    fn running(&self, t: &Turn<'_>, captures: &Captures) -> bool {
        self.live
            .get(captures)
            .is_some_and(|actor| t.is_alive(*actor))
    }
}

impl Turn<'_> {
    /// Spawn a matcher actor pairing `demand` with `supply`
    ///
    /// Both patterns must capture the same number of values; `handler`
    /// boots each handler actor with the demand's captures.
    pub fn spawn_demand_matcher<F>(
        &mut self,
        supply: Pattern,
        demand: Pattern,
        handler: F,
    ) -> ActorResult<ActorId>
    where
        F: Fn(&mut Turn<'_>, &Captures) -> ActorResult<()> + 'static,
    {
        let (left, right) = (demand.capture_count(), supply.capture_count());
        if left != right {
            return Err(PatternError::CaptureMismatch { left, right }.into());
        }
        let shapes = self.network().dataspace().shapes();
        demand.validate(shapes)?;
        supply.validate(shapes)?;

        let handler: Handler = Rc::new(handler);
        let name = format!("demand {demand}");
        Ok(self.spawn(name, move |t| matcher(t, supply, demand, handler)))
    }
}

fn matcher(
    t: &mut Turn<'_>,
    supply: Pattern,
    demand: Pattern,
    handler: Handler,
) -> ActorResult<()> {
    let handlers = Rc::new(RefCell::new(Handlers::default()));
    let supplies = t.query_set(SetQuery::captures(supply.clone()))?;

    let demands = t.query_set(
        SetQuery::captures(demand)
            .on_add({
                let handlers = handlers.clone();
                let supplies = supplies.clone();
                let handler = handler.clone();
                move |t, captures| {
                    if supplies.contains(t, captures)? {
                        return Ok(());
                    }
                    start(t, &handlers, &handler, captures);
                    Ok(())
                }
            })
            .on_remove({
                let handlers = handlers.clone();
                move |t, captures| {
                    let stopped = handlers.borrow_mut().live.remove(captures);
                    if let Some(actor) = stopped {
                        debug!(%actor, "demand withdrawn; stopping handler");
                        t.terminate_actor(actor)?;
                    }
                    Ok(())
                }
            }),
    )?;

    t.on(Event::retracted(supply), move |t, captures| {
        if demands.contains(t, captures)? && !supplies.contains(t, captures)? {
            start(t, &handlers, &handler, captures);
        }
        Ok(())
    })?;
    Ok(())
}

/// Spawn a handler for `captures` unless one is already running
fn start(t: &mut Turn<'_>, handlers: &RefCell<Handlers>, handler: &Handler, captures: &Captures) {
    if handlers.borrow().running(t, captures) {
        return;
    }
    let boot = handler.clone();
    let tuple = captures.clone();
    let actor = t.spawn(handler_name(captures), move |t| boot(t, &tuple));
    if t.is_alive(actor) {
        debug!(%actor, "demand unmet; handler spawned");
        handlers.borrow_mut().live.insert(captures.clone(), actor);
    } else {
        handlers.borrow_mut().live.remove(captures);
    }
}

fn handler_name(captures: &Captures) -> String {
    let parts: Vec<String> = captures.iter().map(ToString::to_string).collect();
    format!("handler [{}]", parts.join(", "))
}
