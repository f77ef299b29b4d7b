//! Ground: a network running on its own thread
//!
//! Actor state is not `Send`, so the network is built and driven entirely
//! on the ground thread. Other threads talk to it through a command
//! channel: stimuli are closures run against the network, one turn each,
//! and queries are answered over a oneshot reply.

use super::{ActorResult, Network, NetworkConfig, Result, RuntimeError, RuntimeStats, Turn};
use crate::assertion::Value;
use crate::pattern::Pattern;
use crate::types::ActorId;
use parking_lot::Mutex;
use preserves::IOValue;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Work injected into a ground network from outside
pub type Stimulus = Box<dyn FnOnce(&mut Network) -> Result<()> + Send>;

enum Command {
    Stimulus(Stimulus),
    Query(Pattern, oneshot::Sender<Vec<Value>>),
    Shutdown,
}

/// Handle to a network driven by a dedicated thread
pub struct Ground {
    id: Uuid,
    name: String,
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<Mutex<RuntimeStats>>,
    errors: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl Ground {
    /// Start a ground thread and run `boot` against its network
    ///
    /// Returns once `boot` has finished; a failing boot stops the thread and
    /// is reported as `RuntimeError::Init`.
    pub fn spawn<F>(config: NetworkConfig, boot: F) -> Result<Self>
    where
        F: FnOnce(&mut Network) -> Result<()> + Send + 'static,
    {
        config.validate()?;
        let id = Uuid::new_v4();
        let name = config.name.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(RuntimeStats::default()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let handle = thread::Builder::new()
            .name(format!("agora-{name}"))
            .spawn({
                let stats = stats.clone();
                let errors = errors.clone();
                move || serve(id, config, boot, rx, ready_tx, stats, errors)
            })
            .map_err(|e| RuntimeError::Init(e.to_string()))?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => Ok(Self {
                id,
                name,
                tx,
                stats,
                errors,
                handle: Some(handle),
            }),
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(RuntimeError::Init(message))
            }
            Err(_) => Err(RuntimeError::GroundClosed(name)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a stimulus; it runs after every stimulus queued before it
    pub fn inject<F>(&self, stimulus: F) -> Result<()>
    where
        F: FnOnce(&mut Network) -> Result<()> + Send + 'static,
    {
        self.command(Command::Stimulus(Box::new(stimulus)))
    }

    /// Queue a message send
    pub fn send(&self, message: Value) -> Result<()> {
        self.inject(move |network| network.send(message).map(|_| ()))
    }

    /// Queue a message arriving in preserves form
    pub fn send_preserves(&self, message: &IOValue) -> Result<()> {
        self.send(Value::try_from(message)?)
    }

    /// Queue the spawn of an actor
    pub fn spawn_actor<F>(&self, name: impl Into<String>, boot: F) -> Result<()>
    where
        F: FnOnce(&mut Turn<'_>) -> ActorResult<()> + Send + 'static,
    {
        let name = name.into();
        self.inject(move |network| network.spawn(name, boot).map(|_| ()))
    }

    /// Committed assertions matching a pattern, once queued stimuli have run
    ///
    /// Blocks the calling thread; use [`Ground::query_async`] from async code.
    pub fn query(&self, pattern: Pattern) -> Result<Vec<Value>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Query(pattern, reply))?;
        rx.blocking_recv()
            .map_err(|_| RuntimeError::GroundClosed(self.name.clone()))
    }

    pub async fn query_async(&self, pattern: Pattern) -> Result<Vec<Value>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Query(pattern, reply))?;
        rx.await
            .map_err(|_| RuntimeError::GroundClosed(self.name.clone()))
    }

    /// Statistics as of the last completed stimulus
    pub fn stats(&self) -> RuntimeStats {
        self.stats.lock().clone()
    }

    /// Errors returned by stimuli so far
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// Stop every actor and join the ground thread
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let _ = self.tx.send(Command::Shutdown);
        handle
            .join()
            .map_err(|_| RuntimeError::GroundClosed(self.name.clone()))
    }

    fn command(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| RuntimeError::GroundClosed(self.name.clone()))
    }
}

impl Drop for Ground {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!(ground = %self.id, %error, "ground thread panicked");
        }
    }
}

fn serve<F>(
    id: Uuid,
    config: NetworkConfig,
    boot: F,
    mut rx: mpsc::UnboundedReceiver<Command>,
    ready: oneshot::Sender<std::result::Result<(), String>>,
    stats: Arc<Mutex<RuntimeStats>>,
    errors: Arc<Mutex<Vec<String>>>,
) where
    F: FnOnce(&mut Network) -> Result<()>,
{
    let span = info_span!("ground", %id, name = %config.name);
    let _enter = span.enter();

    let mut network = match Network::new(config) {
        Ok(network) => network,
        Err(error) => {
            let _ = ready.send(Err(error.to_string()));
            return;
        }
    };
    if let Err(error) = boot(&mut network) {
        warn!(%error, "ground boot failed");
        let _ = ready.send(Err(error.to_string()));
        return;
    }
    *stats.lock() = network.stats();
    let _ = ready.send(Ok(()));
    info!("ground network running");

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Stimulus(stimulus) => {
                if let Err(error) = stimulus(&mut network) {
                    warn!(%error, "stimulus failed");
                    errors.lock().push(error.to_string());
                }
            }
            Command::Query(pattern, reply) => {
                let _ = reply.send(network.query(&pattern));
            }
            Command::Shutdown => break,
        }
        *stats.lock() = network.stats();
    }

    let actors: Vec<ActorId> = network.actors().map(|actor| actor.id).collect();
    for actor in actors {
        if network.is_alive(actor) {
            if let Err(error) = network.terminate(actor) {
                debug!(%actor, %error, "terminate on shutdown failed");
            }
        }
    }
    *stats.lock() = network.stats();
    info!(turns = network.stats().turns, "ground network stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Event;
    use crate::record;

    #[test]
    fn test_ground_round_trip() {
        let ground = Ground::spawn(NetworkConfig::named("test"), |network| {
            network.spawn("greeter", |t| {
                t.assert(record!("hello", "world"))?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();

        let hello: Pattern = "hello($)".parse().unwrap();
        assert_eq!(ground.query(hello).unwrap(), vec![record!("hello", "world")]);
        assert_eq!(ground.name(), "test");
        assert_eq!(ground.stats().live_actors, 1);
        ground.shutdown().unwrap();
    }

    #[test]
    fn test_ground_spawn_actor_and_send() {
        let ground = Ground::spawn(NetworkConfig::default(), |_| Ok(())).unwrap();
        ground
            .spawn_actor("echo", |t| {
                t.on(Event::message("ping($)".parse().unwrap()), |t, captures| {
                    t.assert(Value::record("pong", captures.clone()))?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        ground.send(record!("ping", 7i64)).unwrap();

        let pong: Pattern = "pong(_)".parse().unwrap();
        assert_eq!(ground.query(pong).unwrap(), vec![record!("pong", 7i64)]);
    }

    #[test]
    fn test_failed_boot_is_reported() {
        let result = Ground::spawn(NetworkConfig::default(), |network| {
            network.terminate(ActorId(99)).map(|_| ())
        });
        assert!(matches!(result, Err(RuntimeError::Init(_))));
    }

    #[test]
    fn test_stimulus_errors_are_collected() {
        let ground = Ground::spawn(NetworkConfig::default(), |_| Ok(())).unwrap();
        ground
            .inject(|network| network.terminate(ActorId(5)).map(|_| ()))
            .unwrap();
        // queries are answered in order, so the stimulus has run
        ground.query(Pattern::Discard).unwrap();
        assert_eq!(ground.errors(), vec!["Actor actor:5 not found".to_string()]);
    }
}
