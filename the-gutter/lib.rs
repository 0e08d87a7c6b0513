//! Relative line-number margin for text surfaces.
//!
//! `the-gutter` keeps a label beside every visible line of a buffer showing
//! that line's distance from the cursor line. The crate is host-agnostic: the
//! embedding editor implements [`host::Host`] and forwards its editing,
//! scrolling and command events to a [`engine::MarginEngine`].
//!
//! # Design
//!
//! - No IO and no background tasks; deferred refreshes go through
//!   [`host::Host::schedule_idle`].
//! - Decorations are pooled per buffer and reconciled by label equality, so a
//!   refresh with nothing to change issues no host calls.
//! - All state for a buffer lives in one [`engine::BufferState`].
//!
//! # Example
//!
//! ```no_run
//! use the_gutter::{
//!   config::GutterConfig,
//!   engine::MarginEngine,
//!   memory::MemoryHost,
//!   scheduler::MarginEvent,
//! };
//!
//! let mut host = MemoryHost::new();
//! let buffer = host.add_buffer("fn main() {\n  println!(\"hi\");\n}\n");
//! let surface = host.open_surface(buffer, 0, 10);
//!
//! let mut engine = MarginEngine::new(GutterConfig::default());
//! engine.handle_event(&mut host, buffer, MarginEvent::ModeEnable);
//!
//! host.set_cursor_line(surface, 3);
//! engine.handle_event(&mut host, buffer, MarginEvent::CursorOrCommand);
//! assert_eq!(host.labels(surface), vec!["2", "1", "0"]);
//! ```

use smartstring::{
  LazyCompact,
  SmartString,
};

pub mod config;
pub mod engine;
pub mod host;
pub mod label;
pub mod memory;
pub mod messages;
pub mod pool;
pub mod scheduler;
pub mod viewport;
pub mod width;

pub type Tendril = SmartString<LazyCompact>;
