//! Async plumbing for hosts that run a tokio runtime.
//!
//! The margin engine never waits on its own. When it asks for an idle
//! callback through `Host::schedule_idle`, a tokio-based host can forward the
//! request to an [`IdleQueue`], which hands the buffer back on a channel once
//! the configured quiet period has passed.

mod debounce;
pub mod idle;

pub use debounce::{
  AsyncHook,
  send_blocking,
};
pub use idle::{
  IdleQueue,
  IdleRefreshHook,
};
