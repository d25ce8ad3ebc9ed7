//! Build lifecycle events.
//!
//! Events are for observation only; the engine never reads them back. A step
//! that emits no `ContractDeployed` or `TxnExecuted` event changed nothing on
//! chain.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
  /// The fingerprint matches the previous build.
  Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BuildEvent {
  PreStep {
    step: String,
  },
  PostStep {
    step: String,
    /// False when the previous artifacts were reused.
    executed: bool,
  },
  ContractDeployed {
    step: String,
    name: String,
    address: String,
  },
  TxnExecuted {
    step: String,
    name: String,
    hash: String,
  },
  StepSkipped {
    step: String,
    reason: SkipReason,
  },
  ResolveDeploy {
    package: String,
    variant: String,
    url: Option<String>,
  },
  DownloadDeploy {
    url: String,
  },
}

pub trait BuildObserver: Send + Sync {
  fn on_event(&self, event: &BuildEvent);
}

impl<F> BuildObserver for F
where
  F: Fn(&BuildEvent) + Send + Sync,
{
  fn on_event(&self, event: &BuildEvent) {
    self(event)
  }
}

/// Fan-out of events to registered observers.
#[derive(Clone, Default)]
pub struct EventBus {
  observers: Vec<Arc<dyn BuildObserver>>,
}

impl std::fmt::Debug for EventBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventBus")
      .field("observers", &self.observers.len())
      .finish()
  }
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_observer(mut self, observer: impl BuildObserver + 'static) -> Self {
    self.subscribe(observer);
    self
  }

  pub fn subscribe(&mut self, observer: impl BuildObserver + 'static) {
    self.observers.push(Arc::new(observer));
  }

  pub fn emit(&self, event: &BuildEvent) {
    for observer in &self.observers {
      observer.on_event(event);
    }
  }
}

/// Forwards events into an unbounded channel.
pub struct ChannelObserver {
  tx: mpsc::UnboundedSender<BuildEvent>,
}

impl ChannelObserver {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<BuildEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl BuildObserver for ChannelObserver {
  fn on_event(&self, event: &BuildEvent) {
    // A dropped receiver only means nobody is listening anymore.
    let _ = self.tx.send(event.clone());
  }
}
