//! In-memory [`Host`] for tests and headless embedding.
//!
//! Buffers are ropes, surfaces are row-based windows onto a buffer, and
//! decorations are kept in a slot map with their anchors tracked across
//! edits. Every decoration call is counted in [`DecorationStats`] so callers
//! can assert how much host work a refresh caused.

use std::{
  collections::BTreeMap,
  num::NonZeroUsize,
  ops::Range,
};

use ropey::Rope;
use slotmap::{
  Key,
  KeyData,
  SlotMap,
};

use crate::{
  host::{
    BufferId,
    DecorationHandle,
    Host,
    HostError,
    Margins,
    SurfaceId,
  },
  label::Label,
  messages::{
    MessageLevel,
    ReportLog,
  },
  scheduler::{
    BufferEdit,
    MarginEvent,
  },
};

slotmap::new_key_type! {
  struct DecorationKey;
}

impl From<DecorationHandle> for DecorationKey {
  fn from(handle: DecorationHandle) -> Self {
    KeyData::from_ffi(handle.get()).into()
  }
}

fn handle_of(key: DecorationKey) -> DecorationHandle {
  DecorationHandle::new(key.data().as_ffi())
}

/// Decoration calls issued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecorationStats {
  pub created:   usize,
  pub moved:     usize,
  pub rendered:  usize,
  pub destroyed: usize,
}

impl DecorationStats {
  pub fn total(&self) -> usize {
    self.created + self.moved + self.rendered + self.destroyed
  }
}

#[derive(Debug, Clone)]
struct Surface {
  buffer:  BufferId,
  top_row: usize,
  height:  usize,
  cursor:  usize,
  margins: Margins,
}

#[derive(Debug, Clone)]
struct Decoration {
  surface: SurfaceId,
  anchor:  usize,
  label:   Label,
}

#[derive(Debug)]
pub struct MemoryHost {
  buffers:         BTreeMap<BufferId, Rope>,
  surfaces:        BTreeMap<SurfaceId, Surface>,
  decorations:     SlotMap<DecorationKey, Decoration>,
  stats:           DecorationStats,
  idle:            Vec<BufferId>,
  idle_requests:   usize,
  messages:        ReportLog,
  next_id:         NonZeroUsize,
  /// Surface that disappears after the given number of further decoration
  /// calls on it.
  doomed:          Option<(SurfaceId, usize)>,
  /// Surface that disappears when its margins are next written.
  margin_loss:     Option<SurfaceId>,
  drop_on_render:  bool,
  backend_failure: Option<String>,
}

impl Default for MemoryHost {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryHost {
  pub fn new() -> Self {
    Self {
      buffers:         BTreeMap::new(),
      surfaces:        BTreeMap::new(),
      decorations:     SlotMap::with_key(),
      stats:           DecorationStats::default(),
      idle:            Vec::new(),
      idle_requests:   0,
      messages:        ReportLog::default(),
      next_id:         NonZeroUsize::MIN,
      doomed:          None,
      margin_loss:     None,
      drop_on_render:  false,
      backend_failure: None,
    }
  }

  fn allocate_id(&mut self) -> NonZeroUsize {
    let id = self.next_id;
    self.next_id = id.saturating_add(1);
    id
  }

  // Buffers

  pub fn add_buffer(&mut self, text: &str) -> BufferId {
    let id = BufferId::new(self.allocate_id());
    self.buffers.insert(id, Rope::from(text));
    id
  }

  pub fn rope(&self, buffer: BufferId) -> Option<&Rope> {
    self.buffers.get(&buffer)
  }

  /// Drops the buffer together with every surface showing it.
  pub fn close_buffer(&mut self, buffer: BufferId) -> MarginEvent {
    self.buffers.remove(&buffer);
    let closed: Vec<_> = self
      .surfaces
      .iter()
      .filter(|(_, surface)| surface.buffer == buffer)
      .map(|(id, _)| *id)
      .collect();
    for surface in closed {
      self.close_surface(surface);
    }
    MarginEvent::BufferClosed
  }

  /// Inserts `text` at char `pos`. Decorations and cursors after `pos` move
  /// with the text; a decoration exactly at `pos` stays.
  pub fn insert(&mut self, buffer: BufferId, pos: usize, text: &str) -> MarginEvent {
    let Some(rope) = self.buffers.get_mut(&buffer) else {
      return MarginEvent::BufferEdit(BufferEdit::insertion(pos, text));
    };
    let pos = pos.min(rope.len_chars());
    rope.insert(pos, text);
    let len = text.chars().count();

    for decoration in self.decorations.values_mut() {
      let shown = self.surfaces.get(&decoration.surface);
      if shown.is_some_and(|s| s.buffer == buffer) && decoration.anchor > pos {
        decoration.anchor += len;
      }
    }
    for surface in self.surfaces.values_mut() {
      if surface.buffer == buffer && surface.cursor >= pos {
        surface.cursor += len;
      }
    }
    MarginEvent::BufferEdit(BufferEdit::insertion(pos, text))
  }

  /// Removes the chars in `range`. Positions inside the range collapse to its
  /// start.
  pub fn delete(&mut self, buffer: BufferId, range: Range<usize>) -> MarginEvent {
    let Some(rope) = self.buffers.get_mut(&buffer) else {
      return MarginEvent::BufferEdit(BufferEdit::deletion(range.start));
    };
    let end = range.end.min(rope.len_chars());
    let start = range.start.min(end);
    rope.remove(start..end);

    let shift = |pos: usize| {
      if pos >= end {
        pos - (end - start)
      } else {
        pos.min(start)
      }
    };
    for decoration in self.decorations.values_mut() {
      let shown = self.surfaces.get(&decoration.surface);
      if shown.is_some_and(|s| s.buffer == buffer) {
        decoration.anchor = shift(decoration.anchor);
      }
    }
    for surface in self.surfaces.values_mut() {
      if surface.buffer == buffer {
        surface.cursor = shift(surface.cursor);
      }
    }
    MarginEvent::BufferEdit(BufferEdit::deletion(start))
  }

  // Surfaces

  /// Opens a surface showing `height` rows of `buffer` from the 0-based
  /// `top_row`, with the cursor at the start of the buffer.
  pub fn open_surface(&mut self, buffer: BufferId, top_row: usize, height: usize) -> SurfaceId {
    let id = SurfaceId::new(self.allocate_id());
    self.surfaces.insert(id, Surface {
      buffer,
      top_row,
      height,
      cursor: 0,
      margins: Margins::default(),
    });
    id
  }

  /// Closes the surface. Its decorations go with it.
  pub fn close_surface(&mut self, surface: SurfaceId) {
    self.surfaces.remove(&surface);
    self.decorations.retain(|_, decoration| decoration.surface != surface);
    if self.doomed.is_some_and(|(doomed, _)| doomed == surface) {
      self.doomed = None;
    }
  }

  /// Shows another buffer in the surface, from its top.
  pub fn switch_buffer(&mut self, surface: SurfaceId, buffer: BufferId) {
    if let Some(state) = self.surfaces.get_mut(&surface) {
      state.buffer = buffer;
      state.top_row = 0;
      state.cursor = 0;
    }
  }

  pub fn scroll_to(&mut self, surface: SurfaceId, top_row: usize) -> MarginEvent {
    if let Some(state) = self.surfaces.get_mut(&surface) {
      state.top_row = top_row;
    }
    MarginEvent::Scroll { surface }
  }

  pub fn resize(&mut self, surface: SurfaceId, height: usize) -> MarginEvent {
    if let Some(state) = self.surfaces.get_mut(&surface) {
      state.height = height;
    }
    MarginEvent::Scroll { surface }
  }

  pub fn set_cursor(&mut self, surface: SurfaceId, pos: usize) {
    if let Some(state) = self.surfaces.get_mut(&surface) {
      state.cursor = pos;
    }
  }

  /// Puts the cursor at the start of the 1-based `line`.
  pub fn set_cursor_line(&mut self, surface: SurfaceId, line: usize) {
    let Some(state) = self.surfaces.get_mut(&surface) else {
      return;
    };
    if let Some(rope) = self.buffers.get(&state.buffer) {
      let row = line.saturating_sub(1).min(rope.len_lines() - 1);
      state.cursor = rope.line_to_char(row);
    }
  }

  // Decorations

  pub fn stats(&self) -> DecorationStats {
    self.stats
  }

  pub fn reset_stats(&mut self) {
    self.stats = DecorationStats::default();
  }

  pub fn live_decorations(&self, surface: SurfaceId) -> usize {
    self
      .decorations
      .values()
      .filter(|decoration| decoration.surface == surface)
      .count()
  }

  pub fn total_decorations(&self) -> usize {
    self.decorations.len()
  }

  /// Decorations of `surface` as `(anchor, label)`, top to bottom.
  pub fn placed(&self, surface: SurfaceId) -> Vec<(usize, Label)> {
    let mut placed: Vec<_> = self
      .decorations
      .values()
      .filter(|decoration| decoration.surface == surface)
      .map(|decoration| (decoration.anchor, decoration.label.clone()))
      .collect();
    placed.sort_by_key(|(anchor, _)| *anchor);
    placed
  }

  /// Label texts of `surface`, top to bottom.
  pub fn labels(&self, surface: SurfaceId) -> Vec<String> {
    self
      .placed(surface)
      .into_iter()
      .map(|(_, label)| label.text.to_string())
      .collect()
  }

  // Fault injection

  /// The surface vanishes after `ops` further decoration calls on it, as if
  /// its window were closed mid-refresh.
  pub fn lose_surface_after(&mut self, surface: SurfaceId, ops: usize) {
    self.doomed = Some((surface, ops));
  }

  /// The surface vanishes on the next write to its margins, after its labels
  /// were placed.
  pub fn lose_surface_at_margins(&mut self, surface: SurfaceId) {
    self.margin_loss = Some(surface);
  }

  /// The next decoration to be rendered is discarded by the host instead,
  /// and the call fails with [`HostError::UnknownDecoration`].
  pub fn drop_next_render(&mut self) {
    self.drop_on_render = true;
  }

  /// The next decoration call fails with [`HostError::Backend`].
  pub fn inject_backend_failure(&mut self, message: impl Into<String>) {
    self.backend_failure = Some(message.into());
  }

  fn check_decoration_call(&mut self, surface: SurfaceId) -> Result<(), HostError> {
    if let Some(message) = self.backend_failure.take() {
      return Err(HostError::Backend(message));
    }
    if !self.surfaces.contains_key(&surface) {
      return Err(HostError::SurfaceLost(surface));
    }
    match self.doomed {
      Some((doomed, 0)) if doomed == surface => {
        self.close_surface(surface);
        Err(HostError::SurfaceLost(surface))
      },
      Some((doomed, remaining)) if doomed == surface => {
        self.doomed = Some((doomed, remaining - 1));
        Ok(())
      },
      _ => Ok(()),
    }
  }

  fn decoration_surface(&self, handle: DecorationHandle) -> Result<SurfaceId, HostError> {
    self
      .decorations
      .get(DecorationKey::from(handle))
      .map(|decoration| decoration.surface)
      .ok_or(HostError::UnknownDecoration(handle))
  }

  fn surface(&self, surface: SurfaceId) -> Result<&Surface, HostError> {
    self
      .surfaces
      .get(&surface)
      .ok_or(HostError::SurfaceLost(surface))
  }

  // Scheduling and messages

  /// Buffers with a pending idle callback, in request order. Draining them
  /// is the host going idle.
  pub fn take_idle(&mut self) -> Vec<BufferId> {
    std::mem::take(&mut self.idle)
  }

  /// How many times an idle callback was requested.
  pub fn idle_requests(&self) -> usize {
    self.idle_requests
  }

  pub fn messages(&self) -> &ReportLog {
    &self.messages
  }
}

impl Host for MemoryHost {
  type Text = Rope;

  fn text(&self, buffer: BufferId) -> Option<&Rope> {
    self.buffers.get(&buffer)
  }

  fn surfaces_showing(&self, buffer: BufferId) -> Vec<SurfaceId> {
    self
      .surfaces
      .iter()
      .filter(|(_, surface)| surface.buffer == buffer)
      .map(|(id, _)| *id)
      .collect()
  }

  fn visible_range(&self, surface: SurfaceId) -> Result<Range<usize>, HostError> {
    let state = self.surface(surface)?;
    let Some(rope) = self.buffers.get(&state.buffer) else {
      return Ok(0..0);
    };
    let rows = rope.len_lines();
    let top = state.top_row.min(rows);
    let bottom = state.top_row.saturating_add(state.height).min(rows);
    Ok(rope.line_to_char(top)..rope.line_to_char(bottom))
  }

  fn cursor_position(&self, surface: SurfaceId) -> Result<usize, HostError> {
    self.surface(surface).map(|state| state.cursor)
  }

  fn margins(&self, surface: SurfaceId) -> Result<Margins, HostError> {
    self.surface(surface).map(|state| state.margins)
  }

  fn set_margins(&mut self, surface: SurfaceId, margins: Margins) -> Result<(), HostError> {
    if self.margin_loss == Some(surface) {
      self.margin_loss = None;
      self.close_surface(surface);
      return Err(HostError::SurfaceLost(surface));
    }
    let state = self
      .surfaces
      .get_mut(&surface)
      .ok_or(HostError::SurfaceLost(surface))?;
    state.margins = margins;
    Ok(())
  }

  fn create_decoration(
    &mut self,
    surface: SurfaceId,
    anchor: usize,
  ) -> Result<DecorationHandle, HostError> {
    self.check_decoration_call(surface)?;
    let key = self.decorations.insert(Decoration {
      surface,
      anchor,
      label: Label::default(),
    });
    self.stats.created += 1;
    Ok(handle_of(key))
  }

  fn move_decoration(&mut self, handle: DecorationHandle, anchor: usize) -> Result<(), HostError> {
    let surface = self.decoration_surface(handle)?;
    self.check_decoration_call(surface)?;
    let decoration = self
      .decorations
      .get_mut(DecorationKey::from(handle))
      .ok_or(HostError::UnknownDecoration(handle))?;
    decoration.anchor = anchor;
    self.stats.moved += 1;
    Ok(())
  }

  fn decoration_anchor(&self, handle: DecorationHandle) -> Result<usize, HostError> {
    self
      .decorations
      .get(DecorationKey::from(handle))
      .map(|decoration| decoration.anchor)
      .ok_or(HostError::UnknownDecoration(handle))
  }

  fn set_decoration_content(
    &mut self,
    handle: DecorationHandle,
    label: &Label,
  ) -> Result<(), HostError> {
    let surface = self.decoration_surface(handle)?;
    self.check_decoration_call(surface)?;
    if std::mem::take(&mut self.drop_on_render) {
      self.decorations.remove(DecorationKey::from(handle));
      return Err(HostError::UnknownDecoration(handle));
    }
    let decoration = self
      .decorations
      .get_mut(DecorationKey::from(handle))
      .ok_or(HostError::UnknownDecoration(handle))?;
    decoration.label = label.clone();
    self.stats.rendered += 1;
    Ok(())
  }

  fn destroy_decoration(&mut self, handle: DecorationHandle) -> Result<(), HostError> {
    let key = DecorationKey::from(handle);
    if self.decorations.remove(key).is_none() {
      return Err(HostError::UnknownDecoration(handle));
    }
    self.stats.destroyed += 1;
    Ok(())
  }

  fn schedule_idle(&mut self, buffer: BufferId) {
    self.idle_requests += 1;
    if !self.idle.contains(&buffer) {
      self.idle.push(buffer);
    }
  }

  fn report(&mut self, level: MessageLevel, text: String) {
    self.messages.push(level, text);
  }
}
