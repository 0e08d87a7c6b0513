//! Collaborator interface implemented by the embedding editor.
//!
//! The engine never owns windows, text or decorations. Everything it needs
//! from the editor goes through [`Host`], addressed by the ids defined here.

use std::{
  num::NonZeroUsize,
  ops::Range,
};

use ropey::Rope;
use serde::{
  Deserialize,
  Serialize,
};
use the_core::line_ending::counted_lines;
use thiserror::Error;

use crate::{
  label::Label,
  messages::MessageLevel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(NonZeroUsize);

impl BufferId {
  pub const fn new(id: NonZeroUsize) -> Self {
    Self(id)
  }

  pub const fn get(self) -> NonZeroUsize {
    self.0
  }
}

impl From<NonZeroUsize> for BufferId {
  fn from(value: NonZeroUsize) -> Self {
    Self::new(value)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(NonZeroUsize);

impl SurfaceId {
  pub const fn new(id: NonZeroUsize) -> Self {
    Self(id)
  }

  pub const fn get(self) -> NonZeroUsize {
    self.0
  }
}

impl From<NonZeroUsize> for SurfaceId {
  fn from(value: NonZeroUsize) -> Self {
    Self::new(value)
  }
}

/// Opaque host handle for a placed margin decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecorationHandle(u64);

impl DecorationHandle {
  pub const fn new(raw: u64) -> Self {
    Self(raw)
  }

  pub const fn get(self) -> u64 {
    self.0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarginSide {
  #[default]
  Left,
  Right,
}

impl MarginSide {
  pub const fn opposite(self) -> Self {
    match self {
      Self::Left => Self::Right,
      Self::Right => Self::Left,
    }
  }
}

/// Widths, in columns, of both margins of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Margins {
  pub left:  u16,
  pub right: u16,
}

impl Margins {
  pub const fn new(left: u16, right: u16) -> Self {
    Self { left, right }
  }

  pub const fn get(self, side: MarginSide) -> u16 {
    match side {
      MarginSide::Left => self.left,
      MarginSide::Right => self.right,
    }
  }

  /// Returns a copy with `side` set to `width` and the other side untouched.
  pub const fn with(mut self, side: MarginSide, width: u16) -> Self {
    match side {
      MarginSide::Left => self.left = width,
      MarginSide::Right => self.right = width,
    }
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
  /// The surface was closed or otherwise invalidated.
  #[error("surface {0:?} is no longer available")]
  SurfaceLost(SurfaceId),
  /// The host discarded a decoration on its own.
  #[error("decoration {0:?} is unknown to the host")]
  UnknownDecoration(DecorationHandle),
  #[error("host failure: {0}")]
  Backend(String),
}

impl HostError {
  /// Errors that only invalidate one surface or decoration, never the buffer.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::SurfaceLost(_) | Self::UnknownDecoration(_))
  }
}

/// Read access to a buffer's text, in char offsets.
pub trait TextBuffer {
  fn len_chars(&self) -> usize;

  /// Lines a user would count; an empty trailing line after the final line
  /// ending does not count.
  fn total_lines(&self) -> usize;

  /// 0-indexed row containing `pos`. `pos` is clamped to the buffer length.
  fn char_to_line(&self, pos: usize) -> usize;

  /// Char offset of the start of `row`. Must accept `row` one past the last
  /// row and return the buffer length for it.
  fn line_to_char(&self, row: usize) -> usize;
}

impl TextBuffer for Rope {
  fn len_chars(&self) -> usize {
    Rope::len_chars(self)
  }

  fn total_lines(&self) -> usize {
    counted_lines(self)
  }

  fn char_to_line(&self, pos: usize) -> usize {
    Rope::char_to_line(self, pos.min(Rope::len_chars(self)))
  }

  fn line_to_char(&self, row: usize) -> usize {
    Rope::line_to_char(self, row.min(self.len_lines()))
  }
}

/// Everything the engine consumes from the embedding editor.
pub trait Host {
  type Text: TextBuffer;

  // Buffers

  fn text(&self, buffer: BufferId) -> Option<&Self::Text>;

  // Surfaces

  /// Surfaces currently displaying `buffer`, in a stable display order.
  fn surfaces_showing(&self, buffer: BufferId) -> Vec<SurfaceId>;

  /// Visible char range of the surface, end exclusive.
  fn visible_range(&self, surface: SurfaceId) -> Result<Range<usize>, HostError>;

  fn cursor_position(&self, surface: SurfaceId) -> Result<usize, HostError>;

  fn margins(&self, surface: SurfaceId) -> Result<Margins, HostError>;

  fn set_margins(&mut self, surface: SurfaceId, margins: Margins) -> Result<(), HostError>;

  // Decorations

  fn create_decoration(
    &mut self,
    surface: SurfaceId,
    anchor: usize,
  ) -> Result<DecorationHandle, HostError>;

  fn move_decoration(&mut self, handle: DecorationHandle, anchor: usize) -> Result<(), HostError>;

  /// Current anchor of a decoration, after the host's own edit tracking.
  fn decoration_anchor(&self, handle: DecorationHandle) -> Result<usize, HostError>;

  fn set_decoration_content(
    &mut self,
    handle: DecorationHandle,
    label: &Label,
  ) -> Result<(), HostError>;

  fn destroy_decoration(&mut self, handle: DecorationHandle) -> Result<(), HostError>;

  // Scheduling and reporting

  /// Arrange for [`crate::scheduler::MarginEvent::Idle`] to be delivered for
  /// `buffer` once the host is otherwise idle.
  fn schedule_idle(&mut self, buffer: BufferId);

  /// The editor's user-facing error channel.
  fn report(&mut self, level: MessageLevel, text: String);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn margins_replace_only_one_side() {
    let margins = Margins::new(4, 2);
    assert_eq!(margins.with(MarginSide::Left, 0), Margins::new(0, 2));
    assert_eq!(margins.with(MarginSide::Right, 7), Margins::new(4, 7));
    assert_eq!(margins.get(MarginSide::Right), 2);
    assert_eq!(MarginSide::Left.opposite(), MarginSide::Right);
  }

  #[test]
  fn rope_text_buffer_clamps_positions() {
    let text = Rope::from("ab\ncd\n");
    assert_eq!(TextBuffer::total_lines(&text), 2);
    assert_eq!(TextBuffer::char_to_line(&text, 100), 2);
    assert_eq!(TextBuffer::line_to_char(&text, 1), 3);
    assert_eq!(TextBuffer::line_to_char(&text, 3), 6);
    assert_eq!(TextBuffer::line_to_char(&text, 9), 6);
  }

  #[test]
  fn only_surface_and_decoration_loss_are_transient() {
    let surface = SurfaceId::new(NonZeroUsize::new(1).unwrap());
    assert!(HostError::SurfaceLost(surface).is_transient());
    assert!(HostError::UnknownDecoration(DecorationHandle::new(3)).is_transient());
    assert!(!HostError::Backend("boom".into()).is_transient());
  }
}
