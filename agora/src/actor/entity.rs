//! Entity trait for object-style behaviors
//!
//! Closures passed to `Turn::on` cover most handlers. An `Entity` groups
//! the asserted/retracted/message callbacks of one subscription on a value
//! that keeps its own state.

use crate::assertion::Value;
use crate::pattern::Captures;
use crate::runtime::{ActorResult, Turn};

/// Trait for implementing subscription behaviors
///
/// # Example
///
/// ```
/// use agora::actor::{Entity, Event};
/// use agora::pattern::{Captures, Pattern};
/// use agora::runtime::{ActorResult, Network, Turn};
/// use agora::Value;
///
/// struct Counter {
///     seen: usize,
/// }
///
/// impl Entity for Counter {
///     fn asserted(&mut self, t: &mut Turn<'_>, _: &Value, _: &Captures) -> ActorResult<()> {
///         self.seen += 1;
///         t.send(Value::record("seen", vec![Value::int(self.seen as i64)]))
///     }
/// }
///
/// let mut network = Network::default();
/// network
///     .spawn("counter", |t| {
///         t.attach(Event::asserted(Pattern::bind()), Counter { seen: 0 })?;
///         Ok(())
///     })
///     .unwrap();
/// ```
pub trait Entity: 'static {
    /// A matching assertion appeared
    fn asserted(
        &mut self,
        t: &mut Turn<'_>,
        value: &Value,
        captures: &Captures,
    ) -> ActorResult<()> {
        let _ = (t, value, captures);
        Ok(())
    }

    /// A matching assertion was withdrawn
    fn retracted(
        &mut self,
        t: &mut Turn<'_>,
        value: &Value,
        captures: &Captures,
    ) -> ActorResult<()> {
        let _ = (t, value, captures);
        Ok(())
    }

    /// A matching message was sent
    fn message(&mut self, t: &mut Turn<'_>, value: &Value, captures: &Captures) -> ActorResult<()> {
        let _ = (t, value, captures);
        Ok(())
    }
}
