//! Runtime coordinator for a ground network
//!
//! A `Network` owns one dataspace and the arenas of every actor, facet,
//! endpoint, field and dataflow block living in it. It is driven by
//! stimuli (`spawn`, `send`, `execute`, `terminate`); each stimulus runs as
//! one turn, iterated to a fixpoint:
//! - dirty field readers are re-evaluated (in id order)
//! - pending dataspace changes are committed into per-subscriber patches
//! - queued deliveries are handed to their facets, FIFO
//!
//! until nothing is pending. Handlers never re-enter a running facet;
//! events for it stay queued until it returns.

mod config;
mod error;
mod ground;
mod turn;

pub use config::{NetworkConfig, DEFAULT_MAX_ROUNDS};
pub use error::{ActorError, ActorResult, Result, RuntimeError};
pub use ground::{Ground, Stimulus};
pub use turn::Turn;

use crate::actor::{
    Actor, Compute, Dataflow, Endpoint, Facet, FacetState, Field, FieldStore, FlowBody, Hook,
    Reaction, Reader,
};
use crate::assertion::Value;
use crate::dataspace::{Dataspace, DataspaceStats, Delivery, SubscriptionKind};
use crate::pattern::{Pattern, PatternError};
use crate::types::{
    ActorId, DataflowId, EndpointId, FacetId, IdAllocator, SubscriptionId, TurnId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, debug_span, trace, warn};

/// Unit of queued work
enum Work {
    /// Run on-start hooks added to an already active facet
    Start(FacetId),
    /// Hand a patch or message to a subscription's handler
    Deliver {
        facet: FacetId,
        subscription: SubscriptionId,
        delivery: Delivery,
    },
}

impl Work {
    fn facet(&self) -> FacetId {
        match self {
            Work::Start(facet) => *facet,
            Work::Deliver { facet, .. } => *facet,
        }
    }
}

/// A handler fault observed during a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub actor: ActorId,
    pub facet: FacetId,
    pub error: String,
    /// Whether the whole actor was terminated
    pub fatal: bool,
}

/// What one turn did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub turn: TurnId,
    pub rounds: usize,
    pub deliveries: usize,
    pub spawned: Vec<ActorId>,
    pub terminated: Vec<ActorId>,
    pub faults: Vec<Fault>,
}

impl TurnSummary {
    fn new(turn: TurnId) -> Self {
        Self {
            turn,
            ..Self::default()
        }
    }
}

/// Statistics about a network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub turns: u64,
    pub rounds: u64,
    pub deliveries: u64,
    pub actors_spawned: u64,
    pub facets_stopped: u64,
    pub faults: u64,
    pub live_actors: usize,
    pub live_facets: usize,
    pub fields: usize,
    pub dataspace: DataspaceStats,
}

/// One ground network: a dataspace plus the actors attached to it
///
/// # Example
///
/// ```
/// use agora::runtime::Network;
/// use agora::pattern::Pattern;
/// use agora::Value;
///
/// let mut network = Network::default();
/// network
///     .spawn("greeter", |t| {
///         t.assert(Value::record("hello", vec![Value::string("world")]))?;
///         Ok(())
///     })
///     .unwrap();
///
/// let hello = Pattern::record("hello", vec![Pattern::bind()]);
/// assert_eq!(network.query(&hello).len(), 1);
/// ```
pub struct Network {
    config: NetworkConfig,
    ids: IdAllocator,
    dataspace: Dataspace,
    actors: BTreeMap<ActorId, Actor>,
    facets: BTreeMap<FacetId, Facet>,
    endpoints: BTreeMap<EndpointId, Endpoint>,
    dataflows: BTreeMap<DataflowId, Dataflow>,
    fields: FieldStore,
    reactions: HashMap<SubscriptionId, Reaction>,
    queue: VecDeque<Work>,
    /// Facets whose handler is on the stack
    running: Vec<FacetId>,
    turn: TurnId,
    summary: TurnSummary,
    stats: RuntimeStats,
}

impl Default for Network {
    fn default() -> Self {
        Self::build(NetworkConfig::default())
    }
}

impl Network {
    /// Create a network with the given configuration
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: NetworkConfig) -> Self {
        Self {
            dataspace: Dataspace::new(config.name.clone()),
            config,
            ids: IdAllocator::default(),
            actors: BTreeMap::new(),
            facets: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            dataflows: BTreeMap::new(),
            fields: FieldStore::default(),
            reactions: HashMap::new(),
            queue: VecDeque::new(),
            running: Vec::new(),
            turn: TurnId::genesis(),
            summary: TurnSummary::default(),
            stats: RuntimeStats::default(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Fix the arity of a record label for every later pattern and assertion
    pub fn declare_shape(&mut self, label: &str, arity: usize) -> Result<()> {
        Ok(self.dataspace.declare_shape(label, arity)?)
    }

    // ----- stimuli -----

    /// Spawn an actor; its boot runs to completion inside this turn
    ///
    /// A failing boot is reported in the turn's faults and leaves the
    /// actor terminated.
    pub fn spawn<F>(&mut self, name: impl Into<String>, boot: F) -> Result<ActorId>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()>,
    {
        let name = name.into();
        let mut spawned = ActorId(0);
        self.run_turn(|network| {
            spawned = network.create_actor(name, boot);
            Ok(())
        })?;
        Ok(spawned)
    }

    /// Send a message into the dataspace
    pub fn send(&mut self, message: Value) -> Result<TurnSummary> {
        self.run_turn(|network| Ok(network.dataspace.send(message)?))
    }

    /// Run a closure in an actor's root facet, as a driver would
    pub fn execute<F>(&mut self, actor: ActorId, action: F) -> Result<TurnSummary>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()>,
    {
        self.run_turn(|network| {
            let root = network.root_of(actor)?;
            if let Err(error) = network.run_in(root, action) {
                network.fault(root, error);
            }
            Ok(())
        })
    }

    /// Stop an actor's root facet
    pub fn terminate(&mut self, actor: ActorId) -> Result<TurnSummary> {
        self.run_turn(|network| {
            let root = network.root_of(actor)?;
            network.stop_facet(root);
            Ok(())
        })
    }

    fn root_of(&self, actor: ActorId) -> Result<FacetId> {
        self.actors
            .get(&actor)
            .map(|record| record.root)
            .ok_or(RuntimeError::UnknownActor(actor))
    }

    fn run_turn<F>(&mut self, stimulus: F) -> Result<TurnSummary>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.turn = self.turn.next();
        self.summary = TurnSummary::new(self.turn);
        let span = debug_span!("turn", network = %self.config.name, turn = %self.turn);
        let _enter = span.enter();

        stimulus(self)?;
        match self.drain() {
            Ok(()) => {}
            Err(ActorError::Livelock { rounds }) => {
                warn!(
                    rounds,
                    queued = self.queue.len(),
                    "livelock; discarding queued work"
                );
                self.queue.clear();
                self.dataspace.discard_messages();
                self.fields.clear_dirty();
                return Err(RuntimeError::Livelock {
                    turn: self.turn,
                    rounds,
                });
            }
            Err(error) => return Err(error.into()),
        }

        self.stats.turns += 1;
        debug!(
            rounds = self.summary.rounds,
            deliveries = self.summary.deliveries,
            faults = self.summary.faults.len(),
            "turn complete"
        );
        Ok(self.summary.clone())
    }

    // ----- inspection -----

    /// Committed assertions matching a pattern
    pub fn query(&self, pattern: &Pattern) -> Vec<Value> {
        self.dataspace.query(pattern)
    }

    /// Every committed assertion
    pub fn assertions(&self) -> Vec<Value> {
        self.dataspace.assertions()
    }

    pub fn is_alive(&self, actor: ActorId) -> bool {
        self.actors.contains_key(&actor)
    }

    pub fn actor(&self, actor: ActorId) -> Option<&Actor> {
        self.actors.get(&actor)
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    /// State of a facet; `None` once it has been torn down
    pub fn facet_state(&self, facet: FacetId) -> Option<FacetState> {
        self.facets.get(&facet).map(|node| node.state)
    }

    /// Live children of a facet
    pub fn facet_children(&self, facet: FacetId) -> Vec<FacetId> {
        self.facets
            .get(&facet)
            .map(|node| node.children.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dataspace(&self) -> &Dataspace {
        &self.dataspace
    }

    pub fn current_turn(&self) -> TurnId {
        self.turn
    }

    /// Summary of the most recent turn
    pub fn last_turn(&self) -> &TurnSummary {
        &self.summary
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            live_actors: self.actors.len(),
            live_facets: self.facets.len(),
            fields: self.fields.len(),
            dataspace: self.dataspace.stats(),
            ..self.stats.clone()
        }
    }

    // ----- scheduling -----

    /// Run queued work to a fixpoint, skipping facets that are running
    pub(crate) fn drain(&mut self) -> ActorResult<()> {
        let mut rounds = 0;
        let result = self.drain_rounds(&mut rounds);
        self.summary.rounds += rounds;
        self.stats.rounds += rounds as u64;
        result
    }

    fn drain_rounds(&mut self, rounds: &mut usize) -> ActorResult<()> {
        loop {
            self.tick(rounds)?;
            self.refresh(rounds)?;
            for dispatch in self.dataspace.commit() {
                self.queue.push_back(Work::Deliver {
                    facet: dispatch.facet,
                    subscription: dispatch.subscription,
                    delivery: dispatch.delivery,
                });
            }
            match self.next_work() {
                Some(work) => self.perform(work),
                None if !self.fields.has_dirty() && !self.dataspace.has_pending() => {
                    return Ok(())
                }
                None => {}
            }
        }
    }

    fn tick(&self, rounds: &mut usize) -> ActorResult<()> {
        *rounds += 1;
        if *rounds > self.config.max_rounds {
            return Err(ActorError::Livelock {
                rounds: self.config.max_rounds,
            });
        }
        Ok(())
    }

    fn next_work(&mut self) -> Option<Work> {
        let running = &self.running;
        let position = self
            .queue
            .iter()
            .position(|work| !running.contains(&work.facet()))?;
        self.queue.remove(position)
    }

    /// Re-evaluate dirty endpoints and dataflow blocks
    fn refresh(&mut self, rounds: &mut usize) -> ActorResult<()> {
        while let Some(reader) = self.fields.pop_dirty() {
            self.tick(rounds)?;
            let (facet, result) = match reader {
                Reader::Endpoint(id) => (
                    self.endpoints.get(&id).map(|endpoint| endpoint.facet),
                    self.evaluate_endpoint(id),
                ),
                Reader::Dataflow(id) => (
                    self.dataflows.get(&id).map(|flow| flow.facet),
                    self.evaluate_dataflow(id),
                ),
            };
            if let (Some(facet), Err(error)) = (facet, result) {
                self.fault(facet, error);
            }
        }
        Ok(())
    }

    fn perform(&mut self, work: Work) {
        match work {
            Work::Start(facet) => {
                let hooks = match self.facets.get_mut(&facet) {
                    Some(node) if node.is_live() => std::mem::take(&mut node.on_start),
                    _ => return,
                };
                for hook in hooks {
                    if !self.facet_is_live(facet) {
                        break;
                    }
                    if let Err(error) = self.run_in(facet, hook) {
                        self.fault(facet, error);
                        break;
                    }
                }
            }
            Work::Deliver {
                facet,
                subscription,
                delivery,
            } => {
                if !self.facet_is_live(facet) {
                    return;
                }
                let Some(mut reaction) = self.reactions.remove(&subscription) else {
                    return;
                };
                self.summary.deliveries += 1;
                self.stats.deliveries += 1;
                trace!(%facet, %subscription, "deliver");
                let result = self.run_in(facet, |t| reaction(t, &delivery));
                if self.dataspace.subscription(subscription).is_some() {
                    self.reactions.insert(subscription, reaction);
                }
                if let Err(error) = result {
                    self.fault(facet, error);
                }
            }
        }
    }

    /// Run `f` as a handler of `facet`
    pub(crate) fn run_in<R>(
        &mut self,
        facet: FacetId,
        f: impl FnOnce(&mut Turn<'_>) -> ActorResult<R>,
    ) -> ActorResult<R> {
        let actor = self
            .facets
            .get(&facet)
            .map(|node| node.actor)
            .ok_or(ActorError::FacetNotLive(facet))?;
        self.running.push(facet);
        let result = f(&mut Turn::new(self, actor, facet));
        self.running.pop();
        result
    }

    // ----- faults -----

    pub(crate) fn note_fault(&mut self, actor: ActorId, facet: FacetId, error: &ActorError) {
        let fatal = error.is_fatal();
        warn!(%actor, %facet, %error, fatal, "handler fault");
        self.stats.faults += 1;
        self.summary.faults.push(Fault {
            actor,
            facet,
            error: error.to_string(),
            fatal,
        });
    }

    /// Stop the faulting facet's subtree, or the whole actor when fatal
    pub(crate) fn fault(&mut self, facet: FacetId, error: ActorError) {
        let Some(actor) = self.facets.get(&facet).map(|node| node.actor) else {
            warn!(%facet, %error, "fault in torn-down facet");
            return;
        };
        self.note_fault(actor, facet, &error);
        if error.is_fatal() {
            if let Some(root) = self.actors.get(&actor).map(|record| record.root) {
                self.stop_facet(root);
            }
        } else {
            self.stop_facet(facet);
        }
    }

    // ----- actors and facets -----

    pub(crate) fn create_actor<F>(&mut self, name: String, boot: F) -> ActorId
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()>,
    {
        let id = self.ids.actor();
        let root = self.ids.facet();
        debug!(actor = %id, %name, %root, "spawn");
        self.actors.insert(id, Actor { id, name, root });
        self.stats.actors_spawned += 1;
        self.summary.spawned.push(id);
        if let Err(error) = self.boot_facet(root, id, None, boot) {
            self.note_fault(id, root, &error);
        }
        id
    }

    /// Boot a facet: run `boot` while it is pending, then link and activate it
    ///
    /// On failure the facet is torn down before the error is returned.
    pub(crate) fn boot_facet<F>(
        &mut self,
        id: FacetId,
        actor: ActorId,
        parent: Option<FacetId>,
        boot: F,
    ) -> ActorResult<()>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()>,
    {
        self.facets.insert(id, Facet::new(actor, parent));
        let result = self
            .run_in(id, boot)
            .and_then(|()| self.run_on_start(id))
            .and_then(|()| match parent {
                Some(parent) if !self.facet_is_live(parent) => {
                    Err(ActorError::FacetNotLive(parent))
                }
                _ => Ok(()),
            });
        if let Err(error) = result {
            self.stop_facet(id);
            return Err(error);
        }
        let Some(node) = self.facets.get_mut(&id) else {
            // stopped itself while booting
            return Ok(());
        };
        if node.state == FacetState::Pending {
            node.state = FacetState::Active;
        }
        if let Some(parent) = parent.and_then(|parent| self.facets.get_mut(&parent)) {
            parent.children.insert(id);
        }
        Ok(())
    }

    /// Run the on-start hooks of a facet still under construction
    fn run_on_start(&mut self, facet: FacetId) -> ActorResult<()> {
        loop {
            let hooks = match self.facets.get_mut(&facet) {
                Some(node) if node.is_live() && !node.on_start.is_empty() => {
                    std::mem::take(&mut node.on_start)
                }
                _ => return Ok(()),
            };
            for hook in hooks {
                if !self.facet_is_live(facet) {
                    return Ok(());
                }
                self.run_in(facet, hook)?;
            }
        }
    }

    pub(crate) fn next_facet_id(&mut self) -> FacetId {
        self.ids.facet()
    }

    pub(crate) fn facet_is_live(&self, facet: FacetId) -> bool {
        self.facets.get(&facet).is_some_and(Facet::is_live)
    }

    pub(crate) fn facet_actor(&self, facet: FacetId) -> Option<ActorId> {
        self.facets.get(&facet).map(|node| node.actor)
    }

    pub(crate) fn facet_parent(&self, facet: FacetId) -> Option<FacetId> {
        self.facets.get(&facet).and_then(|node| node.parent)
    }

    pub(crate) fn actor_root(&self, actor: ActorId) -> Option<FacetId> {
        self.actors.get(&actor).map(|record| record.root)
    }

    fn live_node(&mut self, facet: FacetId) -> ActorResult<&mut Facet> {
        match self.facets.get_mut(&facet) {
            Some(node) if node.is_live() => Ok(node),
            _ => Err(ActorError::FacetNotLive(facet)),
        }
    }

    /// Tear down a facet subtree
    ///
    /// Runs on-stop hooks innermost first, then withdraws every assertion
    /// and subscription of the subtree in one step. Returns false when the
    /// facet was not live.
    pub(crate) fn stop_facet(&mut self, facet: FacetId) -> bool {
        if !self.facet_is_live(facet) {
            return false;
        }
        let mut order = Vec::new();
        self.collect_subtree(facet, &mut order);
        for id in &order {
            if let Some(node) = self.facets.get_mut(id) {
                node.state = FacetState::Stopping;
            }
        }
        for id in &order {
            let hooks = self
                .facets
                .get_mut(id)
                .map(|node| std::mem::take(&mut node.on_stop))
                .unwrap_or_default();
            for hook in hooks {
                if let Err(error) = self.run_in(*id, hook) {
                    warn!(facet = %id, %error, "on-stop hook failed");
                    self.stats.faults += 1;
                }
            }
        }
        let parent = self.facet_parent(facet);
        for id in &order {
            self.dismantle(*id);
        }
        if let Some(parent) = parent.and_then(|parent| self.facets.get_mut(&parent)) {
            parent.children.remove(&facet);
        }
        self.stats.facets_stopped += order.len() as u64;
        debug!(%facet, facets = order.len(), "facet stopped");
        true
    }

    fn collect_subtree(&self, facet: FacetId, order: &mut Vec<FacetId>) {
        if let Some(node) = self.facets.get(&facet) {
            for child in &node.children {
                self.collect_subtree(*child, order);
            }
            order.push(facet);
        }
    }

    fn dismantle(&mut self, facet: FacetId) {
        let Some(mut node) = self.facets.remove(&facet) else {
            return;
        };
        node.state = FacetState::Stopped;
        self.dataspace.unpublish_facet(facet);
        for subscription in &node.subscriptions {
            self.dataspace.unsubscribe(*subscription);
            self.reactions.remove(subscription);
        }
        for endpoint in &node.endpoints {
            self.endpoints.remove(endpoint);
            self.fields.forget(Reader::Endpoint(*endpoint));
        }
        for flow in &node.dataflows {
            self.dataflows.remove(flow);
            self.fields.forget(Reader::Dataflow(*flow));
        }
        for field in &node.fields {
            self.fields.remove(*field);
        }
        if node.parent.is_none() && self.actor_root(node.actor) == Some(facet) {
            if let Some(actor) = self.actors.remove(&node.actor) {
                debug!(actor = %actor.id, name = %actor.name, "actor terminated");
                self.summary.terminated.push(actor.id);
            }
        }
    }

    // ----- published sets -----

    fn contribute(&mut self, facet: FacetId, value: Value) -> ActorResult<()> {
        self.dataspace.shapes().check_value(&value)?;
        let first = self.live_node(facet)?.contribute(value.clone());
        if first {
            self.dataspace.publish(facet, value)?;
        }
        Ok(())
    }

    fn withdraw(&mut self, facet: FacetId, value: &Value) {
        let last = self
            .facets
            .get_mut(&facet)
            .is_some_and(|node| node.withdraw(value));
        if last {
            self.dataspace.unpublish(facet, value);
        }
    }

    // ----- endpoints -----

    pub(crate) fn add_endpoint(
        &mut self,
        facet: FacetId,
        compute: Compute,
    ) -> ActorResult<EndpointId> {
        self.live_node(facet)?;
        let id = self.ids.endpoint();
        self.endpoints.insert(
            id,
            Endpoint {
                facet,
                compute: Some(compute),
                current: None,
            },
        );
        self.live_node(facet)?.endpoints.insert(id);
        self.evaluate_endpoint(id)?;
        Ok(id)
    }

    fn evaluate_endpoint(&mut self, id: EndpointId) -> ActorResult<()> {
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return Ok(());
        };
        let facet = endpoint.facet;
        if !self.facet_is_live(facet) {
            return Ok(());
        }
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return Ok(());
        };
        let Some(mut compute) = endpoint.compute.take() else {
            return Ok(());
        };
        let actor = self.facet_actor(facet).ok_or(ActorError::FacetNotLive(facet))?;
        self.fields.begin(Reader::Endpoint(id));
        let result = compute(&mut Turn::new(self, actor, facet));
        self.fields.end();
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return result.map(|_| ());
        };
        endpoint.compute = Some(compute);
        let value = result?;
        if endpoint.current == value {
            return Ok(());
        }
        if let Some(new) = &value {
            self.contribute(facet, new.clone())?;
        }
        let old = self
            .endpoints
            .get_mut(&id)
            .and_then(|endpoint| std::mem::replace(&mut endpoint.current, value));
        if let Some(old) = old {
            self.withdraw(facet, &old);
        }
        Ok(())
    }

    pub(crate) fn remove_endpoint(&mut self, actor: ActorId, id: EndpointId) -> ActorResult<()> {
        let facet = match self.endpoints.get(&id) {
            Some(endpoint) if self.facet_actor(endpoint.facet) == Some(actor) => endpoint.facet,
            _ => return Err(ActorError::EndpointNotFound(id)),
        };
        let Some(endpoint) = self.endpoints.remove(&id) else {
            return Err(ActorError::EndpointNotFound(id));
        };
        self.fields.forget(Reader::Endpoint(id));
        if let Some(node) = self.facets.get_mut(&facet) {
            node.endpoints.remove(&id);
        }
        if let Some(value) = endpoint.current {
            self.withdraw(facet, &value);
        }
        Ok(())
    }

    /// Endpoints of a facet currently publishing `value`
    pub(crate) fn endpoints_publishing(&self, facet: FacetId, value: &Value) -> Vec<EndpointId> {
        self.facets
            .get(&facet)
            .map(|node| {
                node.endpoints
                    .iter()
                    .copied()
                    .filter(|id| {
                        self.endpoints
                            .get(id)
                            .is_some_and(|endpoint| endpoint.current.as_ref() == Some(value))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ----- dataflow -----

    pub(crate) fn add_dataflow(
        &mut self,
        facet: FacetId,
        body: FlowBody,
    ) -> ActorResult<DataflowId> {
        self.live_node(facet)?;
        let id = self.ids.dataflow();
        self.dataflows.insert(
            id,
            Dataflow {
                facet,
                body: Some(body),
            },
        );
        self.live_node(facet)?.dataflows.insert(id);
        self.evaluate_dataflow(id)?;
        Ok(id)
    }

    fn evaluate_dataflow(&mut self, id: DataflowId) -> ActorResult<()> {
        let Some(flow) = self.dataflows.get_mut(&id) else {
            return Ok(());
        };
        let facet = flow.facet;
        if !self.facet_is_live(facet) {
            return Ok(());
        }
        let Some(flow) = self.dataflows.get_mut(&id) else {
            return Ok(());
        };
        let Some(mut body) = flow.body.take() else {
            return Ok(());
        };
        let actor = self.facet_actor(facet).ok_or(ActorError::FacetNotLive(facet))?;
        self.fields.begin(Reader::Dataflow(id));
        let result = body(&mut Turn::new(self, actor, facet));
        self.fields.end();
        if let Some(flow) = self.dataflows.get_mut(&id) {
            flow.body = Some(body);
        }
        result
    }

    // ----- fields -----

    pub(crate) fn add_field<T: 'static>(
        &mut self,
        facet: FacetId,
        initial: T,
    ) -> ActorResult<Field<T>> {
        let actor = self.live_node(facet)?.actor;
        let id = self.ids.field();
        self.fields.insert(id, actor, Box::new(initial));
        self.live_node(facet)?.fields.insert(id);
        Ok(Field::new(id, actor))
    }

    pub(crate) fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.fields
    }

    // ----- subscriptions -----

    /// Register a subscription owned by `facet`
    ///
    /// Publishes the pattern's `observe` interest (when enabled) and queues
    /// the initial patch if the committed match set is not empty.
    pub(crate) fn add_subscription(
        &mut self,
        facet: FacetId,
        pattern: Pattern,
        kind: SubscriptionKind,
        reaction: Reaction,
    ) -> ActorResult<SubscriptionId> {
        self.live_node(facet)?;
        let interest = self.config.observe_interest.then(|| pattern.interest());
        let (id, initial) = self.dataspace.subscribe(facet, pattern, kind)?;
        self.live_node(facet)?.subscriptions.insert(id);
        self.reactions.insert(id, reaction);
        if let Some(interest) = interest {
            self.contribute(facet, interest)?;
        }
        if !initial.is_empty() {
            self.queue.push_back(Work::Deliver {
                facet,
                subscription: id,
                delivery: Delivery::Patch(initial),
            });
        }
        Ok(id)
    }

    /// Cancel one subscription and withdraw its interest
    pub(crate) fn remove_subscription(
        &mut self,
        actor: ActorId,
        id: SubscriptionId,
    ) -> ActorResult<()> {
        let (facet, pattern) = match self.dataspace.subscription(id) {
            Some(sub) if self.facet_actor(sub.facet) == Some(actor) => {
                (sub.facet, sub.pattern.clone())
            }
            _ => return Err(ActorError::SubscriptionNotFound(id)),
        };
        self.live_node(facet)?.subscriptions.remove(&id);
        self.dataspace.unsubscribe(id);
        self.reactions.remove(&id);
        if self.config.observe_interest {
            self.withdraw(facet, &pattern.interest());
        }
        debug!(%facet, subscription = %id, "unsubscribed");
        Ok(())
    }

    pub(crate) fn send_message(&mut self, message: Value) -> std::result::Result<(), PatternError> {
        self.dataspace.send(message)
    }

    pub(crate) fn push_on_start(&mut self, facet: FacetId, hook: Hook) -> ActorResult<()> {
        let node = self.live_node(facet)?;
        node.on_start.push(hook);
        if node.state == FacetState::Active {
            self.queue.push_back(Work::Start(facet));
        }
        Ok(())
    }

    pub(crate) fn push_on_stop(&mut self, facet: FacetId, hook: Hook) -> ActorResult<()> {
        self.live_node(facet)?.on_stop.push(hook);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Event;
    use crate::record;

    #[test]
    fn test_spawn_publishes_boot_assertions() {
        let mut network = Network::default();
        let actor = network
            .spawn("a", |t| {
                t.assert(record!("ready", "a"))?;
                Ok(())
            })
            .unwrap();
        assert!(network.is_alive(actor));
        assert_eq!(network.assertions(), vec![record!("ready", "a")]);
        assert_eq!(network.last_turn().spawned, vec![actor]);
    }

    #[test]
    fn test_failed_boot_leaves_actor_dead() {
        let mut network = Network::default();
        let actor = network
            .spawn("broken", |t| {
                t.assert(record!("half", 1i64))?;
                Err(ActorError::failed("boot failed"))
            })
            .unwrap();
        assert!(!network.is_alive(actor));
        assert!(network.assertions().is_empty());
        assert_eq!(network.last_turn().faults.len(), 1);
    }

    #[test]
    fn test_unknown_actor() {
        let mut network = Network::default();
        assert!(matches!(
            network.terminate(ActorId(42)),
            Err(RuntimeError::UnknownActor(ActorId(42)))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Network::new(NetworkConfig::default().with_max_rounds(0)).is_err());
    }

    #[test]
    fn test_interest_is_published() {
        let mut network = Network::default();
        network
            .spawn("watcher", |t| {
                t.on(Event::asserted("account($)".parse().unwrap()), |_, _| Ok(()))?;
                Ok(())
            })
            .unwrap();
        let interests = network.query(&Pattern::observe(Pattern::Discard));
        assert_eq!(interests.len(), 1);

        let config = NetworkConfig::default().with_observe_interest(false);
        let mut quiet = Network::new(config).unwrap();
        quiet
            .spawn("watcher", |t| {
                t.on(Event::asserted("account($)".parse().unwrap()), |_, _| Ok(()))?;
                Ok(())
            })
            .unwrap();
        assert!(quiet.assertions().is_empty());
    }

    #[test]
    fn test_stats() {
        let mut network = Network::default();
        let actor = network.spawn("a", |_| Ok(())).unwrap();
        network.terminate(actor).unwrap();
        let stats = network.stats();
        assert_eq!(stats.turns, 2);
        assert_eq!(stats.actors_spawned, 1);
        assert_eq!(stats.live_actors, 0);
        assert_eq!(stats.facets_stopped, 1);
    }
}
