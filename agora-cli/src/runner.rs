//! Replays a checked script against a fresh network

use crate::script::{Checked, CheckedActor, CheckedStep};
use agora::runtime::{Network, NetworkConfig, RuntimeError, RuntimeStats, TurnSummary};
use agora::{ActorId, ActorResult, Captures, Entity, Event, Turn, Value};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Asserted,
    Retracted,
    Message,
    Fault,
    Error,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Asserted => "asserted",
            Kind::Retracted => "retracted",
            Kind::Message => "message",
            Kind::Fault => "fault",
            Kind::Error => "error",
        };
        f.write_str(name)
    }
}

/// Something an actor saw, or a fault it caused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Step that triggered it; `None` while actors boot
    pub step: Option<usize>,
    pub actor: String,
    pub kind: Kind,
    pub value: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub captures: Vec<String>,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "[{step}]")?,
            None => write!(f, "[setup]")?,
        }
        write!(f, " {} {} {}", self.actor, self.kind, self.value)?;
        if !self.captures.is_empty() {
            write!(f, " -> {}", self.captures.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub events: Vec<Record>,
    /// Assertions left in the dataspace after the last step
    pub assertions: Vec<String>,
    pub stats: RuntimeStats,
}

impl Report {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_string());
            out.push('\n');
        }
        out.push_str(&format!("assertions ({}):\n", self.assertions.len()));
        for assertion in &self.assertions {
            out.push_str(&format!("  {assertion}\n"));
        }
        out.push_str(&format!(
            "{} turns, {} deliveries, {} faults, {} live actors\n",
            self.stats.turns, self.stats.deliveries, self.stats.faults, self.stats.live_actors
        ));
        out
    }
}

type Log = Rc<RefCell<Vec<Record>>>;

/// Logs every event of one subscription
struct Recorder {
    actor: String,
    step: Rc<Cell<Option<usize>>>,
    log: Log,
}

impl Recorder {
    fn record(&self, kind: Kind, value: &Value, captures: &Captures) {
        self.log.borrow_mut().push(Record {
            step: self.step.get(),
            actor: self.actor.clone(),
            kind,
            value: value.to_string(),
            captures: captures.iter().map(Value::to_string).collect(),
        });
    }
}

impl Entity for Recorder {
    fn asserted(
        &mut self,
        _: &mut Turn<'_>,
        value: &Value,
        captures: &Captures,
    ) -> ActorResult<()> {
        self.record(Kind::Asserted, value, captures);
        Ok(())
    }

    fn retracted(
        &mut self,
        _: &mut Turn<'_>,
        value: &Value,
        captures: &Captures,
    ) -> ActorResult<()> {
        self.record(Kind::Retracted, value, captures);
        Ok(())
    }

    fn message(&mut self, _: &mut Turn<'_>, value: &Value, captures: &Captures) -> ActorResult<()> {
        self.record(Kind::Message, value, captures);
        Ok(())
    }
}

struct Runner {
    network: Network,
    actors: BTreeMap<String, ActorId>,
    names: BTreeMap<ActorId, String>,
    step: Rc<Cell<Option<usize>>>,
    log: Log,
}

impl Runner {
    fn spawn(&mut self, spec: CheckedActor) -> Result<(), RuntimeError> {
        let name = spec.name.clone();
        let step = self.step.clone();
        let log = self.log.clone();
        let id = self.network.spawn(name.clone(), move |t| {
            for value in spec.assert {
                t.assert(value)?;
            }
            let recorder = |log: &Log| Recorder {
                actor: spec.name.clone(),
                step: step.clone(),
                log: log.clone(),
            };
            for pattern in spec.observe {
                t.attach(Event::asserted(pattern), recorder(&log))?;
            }
            for pattern in spec.messages {
                t.attach(Event::message(pattern), recorder(&log))?;
            }
            Ok(())
        })?;
        debug!(actor = %id, %name, "script actor spawned");
        self.actors.insert(name.clone(), id);
        self.names.insert(id, name);
        let summary = self.network.last_turn().clone();
        self.note_faults(&summary);
        Ok(())
    }

    fn actor(&self, name: &str) -> Result<ActorId, RuntimeError> {
        self.actors
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::Config(format!("unknown actor `{name}`")))
    }

    fn apply(&mut self, step: CheckedStep) -> Result<(), RuntimeError> {
        let summary = match step {
            CheckedStep::Assert { actor, value } => {
                let id = self.actor(&actor)?;
                self.network.execute(id, move |t| t.assert(value).map(|_| ()))?
            }
            CheckedStep::Retract { actor, value } => {
                let id = self.actor(&actor)?;
                self.network
                    .execute(id, move |t| t.retract(&value).map(|_| ()))?
            }
            CheckedStep::Send(value) => self.network.send(value)?,
            CheckedStep::Stop(actor) => {
                let id = self.actor(&actor)?;
                self.network.terminate(id)?
            }
            CheckedStep::Spawn(spec) => return self.spawn(spec),
        };
        self.note_faults(&summary);
        Ok(())
    }

    fn note_faults(&self, summary: &TurnSummary) {
        let mut log = self.log.borrow_mut();
        for fault in &summary.faults {
            let actor = self
                .names
                .get(&fault.actor)
                .cloned()
                .unwrap_or_else(|| fault.actor.to_string());
            let value = if fault.fatal {
                format!("{} (actor terminated)", fault.error)
            } else {
                fault.error.clone()
            };
            log.push(Record {
                step: self.step.get(),
                actor,
                kind: Kind::Fault,
                value,
                captures: Vec::new(),
            });
        }
    }

    fn note_error(&self, error: &RuntimeError) {
        self.log.borrow_mut().push(Record {
            step: self.step.get(),
            actor: "-".to_string(),
            kind: Kind::Error,
            value: error.to_string(),
            captures: Vec::new(),
        });
    }
}

/// Run a script; step errors are recorded and the run carries on
pub fn run(script: Checked, config: NetworkConfig) -> Result<Report, RuntimeError> {
    let mut network = Network::new(config)?;
    for (label, arity) in &script.shapes {
        network.declare_shape(label, *arity)?;
    }

    let mut runner = Runner {
        network,
        actors: BTreeMap::new(),
        names: BTreeMap::new(),
        step: Rc::new(Cell::new(None)),
        log: Rc::new(RefCell::new(Vec::new())),
    };

    for spec in script.actors {
        runner.spawn(spec)?;
    }

    for (index, step) in script.steps.into_iter().enumerate() {
        runner.step.set(Some(index));
        if let Err(error) = runner.apply(step) {
            tracing::warn!(step = index, %error, "step failed");
            runner.note_error(&error);
        }
    }

    let stats = runner.network.stats();
    info!(
        turns = stats.turns,
        deliveries = stats.deliveries,
        faults = stats.faults,
        "script finished"
    );
    let assertions = runner
        .network
        .assertions()
        .iter()
        .map(Value::to_string)
        .collect();
    let events = runner.log.borrow().clone();
    Ok(Report {
        events,
        assertions,
        stats,
    })
}
