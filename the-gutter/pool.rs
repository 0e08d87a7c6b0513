//! Reusable margin decorations.
//!
//! Every buffer keeps one [`AnnotationPool`]. A refresh runs one [`Cycle`] per
//! surface: the surface's live annotations are set aside as *recycled*, each
//! visible line then acquires an annotation (reusing one that already shows
//! the right label at the right place whenever possible), and whatever is
//! still recycled when the cycle finishes is destroyed.
//!
//! Annotations live in a slot map so keys stay stable while handles are
//! shuffled between the active and recycled sets. Recycled annotations are
//! indexed by anchor, which keeps a cycle linear in the number of visible
//! lines.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::{
  host::{
    DecorationHandle,
    Host,
    HostError,
    SurfaceId,
  },
  label::Label,
};

slotmap::new_key_type! {
  pub struct AnnotationKey;
}

/// A decoration the pool has placed in a surface's margin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
  surface: SurfaceId,
  anchor:  usize,
  label:   Label,
  handle:  DecorationHandle,
}

impl Annotation {
  pub fn surface(&self) -> SurfaceId {
    self.surface
  }

  pub fn anchor(&self) -> usize {
    self.anchor
  }

  pub fn label(&self) -> &Label {
    &self.label
  }

  pub fn handle(&self) -> DecorationHandle {
    self.handle
  }
}

/// How [`Cycle::acquire`] satisfied a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
  /// Same anchor, same label: no host call.
  Reused,
  /// Same anchor, new label.
  Rerendered,
  /// A recycled annotation from elsewhere was moved and re-rendered.
  Moved,
  /// Nothing to recycle; a new decoration was created.
  Created,
}

type Bucket = SmallVec<[AnnotationKey; 1]>;

#[derive(Debug, Default)]
pub struct AnnotationPool {
  annotations: SlotMap<AnnotationKey, Annotation>,
  active:      BTreeMap<SurfaceId, Vec<AnnotationKey>>,
  recycled:    IndexMap<usize, Bucket>,
}

impl AnnotationPool {
  pub fn new() -> Self {
    Self::default()
  }

  /// Live annotations across all surfaces.
  pub fn len(&self) -> usize {
    self.annotations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.annotations.is_empty()
  }

  /// Live annotations placed in `surface`.
  pub fn live_count(&self, surface: SurfaceId) -> usize {
    self.active.get(&surface).map_or(0, Vec::len)
  }

  /// Surfaces that currently hold annotations.
  pub fn surfaces(&self) -> impl Iterator<Item = SurfaceId> + '_ {
    self.active.keys().copied()
  }

  pub fn annotations(&self, surface: SurfaceId) -> impl Iterator<Item = &Annotation> + '_ {
    self
      .active
      .get(&surface)
      .into_iter()
      .flatten()
      .filter_map(|key| self.annotations.get(*key))
  }

  /// True outside of a cycle.
  pub fn is_settled(&self) -> bool {
    self.recycled.is_empty()
  }

  /// Starts reconciling `surface`.
  ///
  /// Anchors are refreshed from the host, since the host moves decorations
  /// along with edits. Decorations the host no longer knows are dropped. On
  /// any other error the cycle is aborted before returning.
  pub fn begin_cycle<'p, H: Host>(
    &'p mut self,
    host: &mut H,
    surface: SurfaceId,
    force_render: bool,
  ) -> Result<Cycle<'p>, HostError> {
    debug_assert!(self.is_settled(), "pool cycles must not interleave");

    let previous = self.active.remove(&surface).unwrap_or_default();
    let cycle = Cycle {
      pool: self,
      surface,
      acquired: Vec::with_capacity(previous.len()),
      force_render,
    };

    let mut failure = None;
    for key in previous {
      let Some(annotation) = cycle.pool.annotations.get_mut(key) else {
        continue;
      };
      if failure.is_none() {
        match host.decoration_anchor(annotation.handle) {
          Ok(anchor) => annotation.anchor = anchor,
          Err(HostError::UnknownDecoration(_)) => {
            cycle.pool.annotations.remove(key);
            continue;
          },
          Err(err) => failure = Some(err),
        }
      }
      let anchor = annotation.anchor;
      cycle.pool.recycled.entry(anchor).or_default().push(key);
    }

    match failure {
      Some(err) => {
        cycle.abort(host);
        Err(err)
      },
      None => Ok(cycle),
    }
  }

  /// Destroys the annotations of a surface that no longer shows the buffer.
  pub fn retire_surface<H: Host>(&mut self, host: &mut H, surface: SurfaceId) -> usize {
    let keys = self.active.remove(&surface).unwrap_or_default();
    self.release(host, keys)
  }

  /// Destroys every annotation of the buffer.
  pub fn clear<H: Host>(&mut self, host: &mut H) -> usize {
    let keys: Vec<_> = std::mem::take(&mut self.active)
      .into_values()
      .flatten()
      .chain(self.recycled.drain(..).flat_map(|(_, bucket)| bucket))
      .collect();
    self.release(host, keys)
  }

  /// Removes `keys` and destroys their decorations, ignoring host failures:
  /// a decoration that cannot be destroyed is already gone or belongs to a
  /// surface that is.
  fn release<H: Host>(&mut self, host: &mut H, keys: impl IntoIterator<Item = AnnotationKey>) -> usize {
    let mut released = 0;
    for key in keys {
      let Some(annotation) = self.annotations.remove(key) else {
        continue;
      };
      if let Err(err) = host.destroy_decoration(annotation.handle) {
        tracing::trace!(%err, surface = ?annotation.surface, "decoration already gone");
      }
      released += 1;
    }
    released
  }

  fn pop_recycled_at(&mut self, anchor: usize, label: Option<&Label>) -> Option<AnnotationKey> {
    let bucket = self.recycled.get_mut(&anchor)?;
    let idx = match label {
      Some(label) => {
        bucket
          .iter()
          .position(|key| self.annotations.get(*key).is_some_and(|a| &a.label == label))?
      },
      None => bucket.len().checked_sub(1)?,
    };
    let key = bucket.swap_remove(idx);
    if bucket.is_empty() {
      self.recycled.swap_remove(&anchor);
    }
    Some(key)
  }

  fn pop_any_recycled(&mut self) -> Option<AnnotationKey> {
    let (anchor, bucket) = self.recycled.last_mut()?;
    let anchor = *anchor;
    let key = bucket.pop();
    if bucket.is_empty() {
      self.recycled.swap_remove(&anchor);
    }
    key
  }
}

/// One surface's reconciliation pass. Must end with [`Cycle::finish`] or
/// [`Cycle::abort`].
#[must_use = "a cycle must be finished or aborted"]
pub struct Cycle<'p> {
  pool:         &'p mut AnnotationPool,
  surface:      SurfaceId,
  acquired:     Vec<AnnotationKey>,
  force_render: bool,
}

impl Cycle<'_> {
  pub fn surface(&self) -> SurfaceId {
    self.surface
  }

  /// Recycled annotations not yet claimed by a line.
  pub fn recycled_len(&self) -> usize {
    self.pool.recycled.values().map(|bucket| bucket.len()).sum()
  }

  /// Places `label` at `anchor`, preferring reuse over host work.
  ///
  /// A recycled decoration the host dropped in the meantime is forgotten and
  /// replaced by a new one.
  pub fn acquire<H: Host>(
    &mut self,
    host: &mut H,
    anchor: usize,
    label: Label,
  ) -> Result<Acquired, HostError> {
    if !self.force_render {
      if let Some(key) = self.pool.pop_recycled_at(anchor, Some(&label)) {
        self.acquired.push(key);
        tracing::trace!(anchor, "reused margin label");
        return Ok(Acquired::Reused);
      }
    }

    let (mut key, mut outcome) = if let Some(key) = self.pool.pop_recycled_at(anchor, None) {
      (key, Acquired::Rerendered)
    } else if let Some(key) = self.pool.pop_any_recycled() {
      (key, Acquired::Moved)
    } else {
      (self.create(host, anchor)?, Acquired::Created)
    };
    // Claimed before any host call so an abort releases it.
    self.acquired.push(key);

    match self.render(host, key, anchor, &label, outcome == Acquired::Moved) {
      Ok(()) => {},
      Err(HostError::UnknownDecoration(handle)) if outcome != Acquired::Created => {
        tracing::debug!(?handle, anchor, "recycled decoration vanished, recreating");
        self.acquired.pop();
        self.pool.annotations.remove(key);
        key = self.create(host, anchor)?;
        self.acquired.push(key);
        self.render(host, key, anchor, &label, false)?;
        outcome = Acquired::Created;
      },
      Err(err) => return Err(err),
    }
    self.pool.annotations[key].label = label;
    tracing::trace!(anchor, ?outcome, "placed margin label");
    Ok(outcome)
  }

  fn create<H: Host>(&mut self, host: &mut H, anchor: usize) -> Result<AnnotationKey, HostError> {
    let handle = host.create_decoration(self.surface, anchor)?;
    Ok(self.pool.annotations.insert(Annotation {
      surface: self.surface,
      anchor,
      label: Label::default(),
      handle,
    }))
  }

  fn render<H: Host>(
    &mut self,
    host: &mut H,
    key: AnnotationKey,
    anchor: usize,
    label: &Label,
    relocate: bool,
  ) -> Result<(), HostError> {
    let annotation = &mut self.pool.annotations[key];
    if relocate {
      host.move_decoration(annotation.handle, anchor)?;
      annotation.anchor = anchor;
    }
    host.set_decoration_content(annotation.handle, label)
  }

  /// Destroys the leftovers and makes the acquired annotations the
  /// surface's active set. Returns how many were destroyed.
  pub fn finish<H: Host>(self, host: &mut H) -> usize {
    let Cycle {
      pool,
      surface,
      acquired,
      ..
    } = self;
    let leftovers: Vec<_> = pool
      .recycled
      .drain(..)
      .flat_map(|(_, bucket)| bucket)
      .collect();
    let destroyed = pool.release(host, leftovers);
    if !acquired.is_empty() {
      pool.active.insert(surface, acquired);
    }
    destroyed
  }

  /// Gives up on the surface: every annotation it had or gained is released.
  pub fn abort<H: Host>(self, host: &mut H) -> usize {
    let Cycle { pool, acquired, .. } = self;
    let leftovers: Vec<_> = pool
      .recycled
      .drain(..)
      .flat_map(|(_, bucket)| bucket)
      .chain(acquired)
      .collect();
    pool.release(host, leftovers)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    label::LabelStyle,
    memory::MemoryHost,
  };

  fn label(text: &str) -> Label {
    Label::new(text, LabelStyle::Line)
  }

  fn run(
    pool: &mut AnnotationPool,
    host: &mut MemoryHost,
    surface: SurfaceId,
    lines: &[(usize, &str)],
  ) -> Vec<Acquired> {
    let mut cycle = pool.begin_cycle(host, surface, false).unwrap();
    let outcomes = lines
      .iter()
      .map(|(anchor, text)| cycle.acquire(host, *anchor, label(text)).unwrap())
      .collect();
    cycle.finish(host);
    outcomes
  }

  #[test]
  fn first_cycle_creates_one_decoration_per_line() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\nc\n");
    let surface = host.open_surface(buffer, 0, 3);
    let mut pool = AnnotationPool::new();

    let outcomes = run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1"), (4, "2")]);
    assert_eq!(outcomes, vec![Acquired::Created; 3]);
    assert_eq!(pool.live_count(surface), 3);
    assert_eq!(host.live_decorations(surface), 3);
    assert!(pool.is_settled());
  }

  #[test]
  fn identical_cycle_touches_nothing() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\nc\n");
    let surface = host.open_surface(buffer, 0, 3);
    let mut pool = AnnotationPool::new();
    let lines = [(0, "0"), (2, "1"), (4, "2")];

    run(&mut pool, &mut host, surface, &lines);
    host.reset_stats();
    let outcomes = run(&mut pool, &mut host, surface, &lines);

    assert_eq!(outcomes, vec![Acquired::Reused; 3]);
    assert_eq!(host.stats().total(), 0);
  }

  #[test]
  fn changed_labels_rerender_in_place() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\nc\n");
    let surface = host.open_surface(buffer, 0, 3);
    let mut pool = AnnotationPool::new();

    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1"), (4, "2")]);
    host.reset_stats();
    let outcomes = run(&mut pool, &mut host, surface, &[(0, "1"), (2, "0"), (4, "2")]);

    assert_eq!(outcomes, vec![
      Acquired::Rerendered,
      Acquired::Rerendered,
      Acquired::Reused,
    ]);
    let stats = host.stats();
    assert_eq!((stats.created, stats.moved, stats.destroyed), (0, 0, 0));
    assert_eq!(stats.rendered, 2);
  }

  #[test]
  fn shrinking_viewport_destroys_leftovers() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\nc\n");
    let surface = host.open_surface(buffer, 0, 3);
    let mut pool = AnnotationPool::new();

    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1"), (4, "2")]);
    run(&mut pool, &mut host, surface, &[(2, "1")]);

    assert_eq!(pool.live_count(surface), 1);
    assert_eq!(pool.len(), 1);
    assert_eq!(host.live_decorations(surface), 1);
  }

  #[test]
  fn scrolled_lines_move_recycled_decorations() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\nc\nd\n");
    let surface = host.open_surface(buffer, 0, 2);
    let mut pool = AnnotationPool::new();

    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1")]);
    host.reset_stats();
    let outcomes = run(&mut pool, &mut host, surface, &[(4, "2"), (6, "3")]);

    assert_eq!(outcomes, vec![Acquired::Moved; 2]);
    let stats = host.stats();
    assert_eq!((stats.created, stats.moved, stats.destroyed), (0, 2, 0));
  }

  #[test]
  fn abort_releases_everything_of_the_surface() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\nc\n");
    let surface = host.open_surface(buffer, 0, 3);
    let mut pool = AnnotationPool::new();
    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1")]);

    let mut cycle = pool.begin_cycle(&mut host, surface, false).unwrap();
    cycle.acquire(&mut host, 4, label("9")).unwrap();
    let released = cycle.abort(&mut host);

    assert_eq!(released, 2);
    assert!(pool.is_empty());
    assert!(pool.is_settled());
    assert_eq!(pool.live_count(surface), 0);
    assert_eq!(host.live_decorations(surface), 0);
  }

  #[test]
  fn forced_cycle_rerenders_identical_labels() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\n");
    let surface = host.open_surface(buffer, 0, 2);
    let mut pool = AnnotationPool::new();
    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1")]);

    let mut cycle = pool.begin_cycle(&mut host, surface, true).unwrap();
    let first = cycle.acquire(&mut host, 0, label("0")).unwrap();
    cycle.finish(&mut host);
    assert_eq!(first, Acquired::Rerendered);
  }

  #[test]
  fn anchors_follow_host_edits() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\n");
    let surface = host.open_surface(buffer, 0, 5);
    let mut pool = AnnotationPool::new();
    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1")]);

    // Splitting the first line pushes the second decoration down two chars.
    host.insert(buffer, 1, "\nx");
    host.reset_stats();
    let outcomes = run(&mut pool, &mut host, surface, &[(0, "0"), (4, "1")]);
    assert_eq!(outcomes, vec![Acquired::Reused; 2]);
    assert_eq!(host.stats().total(), 0);
  }

  #[test]
  fn decorations_discarded_by_the_host_are_dropped() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\nc\n");
    let surface = host.open_surface(buffer, 0, 3);
    let mut pool = AnnotationPool::new();
    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1"), (4, "2")]);

    let middle = pool
      .annotations(surface)
      .find(|annotation| annotation.anchor() == 2)
      .unwrap();
    assert_eq!(middle.surface(), surface);
    assert_eq!(middle.label(), &label("1"));
    host.destroy_decoration(middle.handle()).unwrap();

    let cycle = pool.begin_cycle(&mut host, surface, false).unwrap();
    assert_eq!(cycle.surface(), surface);
    assert_eq!(cycle.recycled_len(), 2);
    cycle.finish(&mut host);
    assert_eq!(pool.live_count(surface), 0);
    assert_eq!(pool.len(), 0);

    host.reset_stats();
    let outcomes = run(&mut pool, &mut host, surface, &[(2, "1")]);
    assert_eq!(outcomes, vec![Acquired::Created]);
    assert_eq!(pool.live_count(surface), 1);
  }

  #[test]
  fn recycled_decoration_lost_on_render_is_recreated() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\n");
    let surface = host.open_surface(buffer, 0, 2);
    let mut pool = AnnotationPool::new();
    run(&mut pool, &mut host, surface, &[(0, "0"), (2, "1")]);

    let mut cycle = pool.begin_cycle(&mut host, surface, false).unwrap();
    host.drop_next_render();
    assert_eq!(cycle.acquire(&mut host, 0, label("1")), Ok(Acquired::Created));
    assert_eq!(cycle.acquire(&mut host, 2, label("0")), Ok(Acquired::Rerendered));
    assert_eq!(cycle.recycled_len(), 0);
    assert_eq!(cycle.finish(&mut host), 0);

    assert_eq!(pool.live_count(surface), 2);
    assert_eq!(host.labels(surface), vec!["1", "0"]);
  }

  #[test]
  fn clear_destroys_all_surfaces() {
    let mut host = MemoryHost::new();
    let buffer = host.add_buffer("a\nb\n");
    let left = host.open_surface(buffer, 0, 2);
    let right = host.open_surface(buffer, 1, 2);
    let mut pool = AnnotationPool::new();
    run(&mut pool, &mut host, left, &[(0, "0"), (2, "1")]);
    run(&mut pool, &mut host, right, &[(2, "1")]);

    assert_eq!(pool.clear(&mut host), 3);
    assert!(pool.is_empty());
    assert_eq!(host.live_decorations(left) + host.live_decorations(right), 0);
  }
}
