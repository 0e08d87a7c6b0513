//! Debounced background hooks.

use std::time::Duration;

use futures_executor::block_on;
use tokio::{
  sync::mpsc::{
    self,
    Sender,
    error::TrySendError,
  },
  time::Instant,
};

const EVENT_CAPACITY: usize = 128;

/// Longest a synchronous caller blocks on a full channel before the event is
/// dropped.
const SEND_TIMEOUT: Duration = Duration::from_millis(2);

/// A stateful event handler running as a tokio task.
///
/// Events arrive over a channel. Each one may set or keep a deadline; once
/// the deadline passes without it being moved, [`AsyncHook::finish_debounce`]
/// runs.
pub trait AsyncHook: Send + 'static + Sized {
  type Event: Send + 'static;

  /// Takes one event. Returns the deadline to wait for, given the current
  /// one.
  fn handle_event(&mut self, event: Self::Event, deadline: Option<Instant>) -> Option<Instant>;

  /// Runs when the deadline passes.
  fn finish_debounce(&mut self);

  /// Starts the hook on the current runtime. Outside a runtime nothing is
  /// spawned and events sent to the returned channel are never handled.
  fn spawn(self) -> Sender<Self::Event> {
    let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
    if tokio::runtime::Handle::try_current().is_ok() {
      tokio::spawn(run(self, rx));
    } else {
      log::debug!("no tokio runtime, debounced hook not started");
    }
    tx
  }
}

async fn run<Hook: AsyncHook>(mut hook: Hook, mut rx: mpsc::Receiver<Hook::Event>) {
  let mut deadline = None;
  loop {
    let event = match deadline {
      Some(at) => {
        match tokio::time::timeout_at(at, rx.recv()).await {
          Ok(event) => event,
          Err(_) => {
            hook.finish_debounce();
            deadline = None;
            continue;
          },
        }
      },
      None => rx.recv().await,
    };
    let Some(event) = event else {
      break;
    };
    deadline = hook.handle_event(event, deadline);
  }
  if deadline.is_some() {
    hook.finish_debounce();
  }
}

/// Sends from synchronous code. A full channel blocks for at most
/// [`SEND_TIMEOUT`], after which the event is dropped.
pub fn send_blocking<T>(tx: &Sender<T>, event: T) {
  match tx.try_send(event) {
    Ok(()) => {},
    Err(TrySendError::Full(event)) => {
      if block_on(tx.send_timeout(event, SEND_TIMEOUT)).is_err() {
        log::warn!("debounced hook is saturated, dropping event");
      }
    },
    Err(TrySendError::Closed(_)) => log::warn!("debounced hook has shut down"),
  }
}
