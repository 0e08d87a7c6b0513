//! Timer-driven idle callbacks.

use std::time::Duration;

use the_gutter::{
  config::GutterConfig,
  host::BufferId,
};
use tokio::{
  sync::mpsc::{
    self,
    Sender,
    UnboundedReceiver,
    UnboundedSender,
  },
  time::Instant,
};

use crate::debounce::{
  AsyncHook,
  send_blocking,
};

/// Collects idle requests and releases them together once `delay` has
/// passed since the first one. Later requests join the pending batch without
/// pushing the deadline back.
pub struct IdleRefreshHook {
  delay:   Duration,
  pending: Vec<BufferId>,
  ready:   UnboundedSender<BufferId>,
}

impl IdleRefreshHook {
  pub fn new(delay: Duration, ready: UnboundedSender<BufferId>) -> Self {
    Self {
      delay,
      pending: Vec::new(),
      ready,
    }
  }
}

impl AsyncHook for IdleRefreshHook {
  type Event = BufferId;

  fn handle_event(&mut self, buffer: BufferId, deadline: Option<Instant>) -> Option<Instant> {
    if !self.pending.contains(&buffer) {
      self.pending.push(buffer);
    }
    Some(deadline.unwrap_or_else(|| Instant::now() + self.delay))
  }

  fn finish_debounce(&mut self) {
    for buffer in self.pending.drain(..) {
      if self.ready.send(buffer).is_err() {
        log::debug!("idle receiver dropped, discarding {buffer:?}");
      }
    }
  }
}

/// Sending half of a spawned [`IdleRefreshHook`]. A host calls
/// [`IdleQueue::schedule`] from `Host::schedule_idle` and turns every buffer
/// read from the receiver into a `MarginEvent::Idle` for that buffer.
#[derive(Debug, Clone)]
pub struct IdleQueue {
  tx: Sender<BufferId>,
}

impl IdleQueue {
  pub fn spawn(delay: Duration) -> (Self, UnboundedReceiver<BufferId>) {
    let (ready, rx) = mpsc::unbounded_channel();
    let tx = IdleRefreshHook::new(delay, ready).spawn();
    (Self { tx }, rx)
  }

  /// Uses the `idle-delay-ms` setting.
  pub fn from_config(config: &GutterConfig) -> (Self, UnboundedReceiver<BufferId>) {
    Self::spawn(Duration::from_millis(config.idle_delay_ms))
  }

  pub fn schedule(&self, buffer: BufferId) {
    send_blocking(&self.tx, buffer);
  }
}
