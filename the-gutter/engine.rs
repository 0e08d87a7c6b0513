//! Refresh orchestration.
//!
//! [`MarginEngine`] owns one [`BufferState`] per buffer with the margin
//! enabled. Each refresh reads every surface showing the buffer, formats a
//! label per visible line, reconciles the labels against the buffer's
//! annotation pool, and finally sizes the margins.

use std::{
  collections::HashMap,
  fmt,
};

use crate::{
  Tendril,
  config::GutterConfig,
  host::{
    BufferId,
    Host,
    HostError,
    MarginSide,
    SurfaceId,
    TextBuffer,
  },
  label::{
    FormatContext,
    Label,
    LabelError,
    LabelFormat,
    LabelStyle,
    LineNumberMode,
    format_label,
  },
  messages::MessageLevel,
  pool::{
    Acquired,
    AnnotationPool,
  },
  scheduler::{
    Directive,
    MarginEvent,
    SchedulerState,
    UpdateScheduler,
  },
  viewport::read_viewport,
  width::{
    WidthTracker,
    apply_margin_width,
  },
};

/// Everything the engine keeps for one enabled buffer.
#[derive(Debug)]
pub struct BufferState {
  pool:      AnnotationPool,
  scheduler: UpdateScheduler,
  format:    LabelFormat,
  mode:      LineNumberMode,
}

impl BufferState {
  pub fn pool(&self) -> &AnnotationPool {
    &self.pool
  }

  pub fn scheduler_state(&self) -> SchedulerState {
    self.scheduler.state()
  }

  pub fn format(&self) -> &LabelFormat {
    &self.format
  }

  pub fn mode(&self) -> LineNumberMode {
    self.mode
  }
}

/// Passed to the before-labels hook once per surface, ahead of its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeforeLabels {
  pub buffer:       BufferId,
  pub surface:      SurfaceId,
  pub cursor_line:  usize,
  /// Re-render every label of this surface even when unchanged.
  pub force_render: bool,
}

pub type BeforeLabelsHook = Box<dyn FnMut(&mut BeforeLabels)>;

/// Outcome of one surface's cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceReport {
  pub surface:    SurfaceId,
  pub lines:      usize,
  pub reused:     usize,
  pub rerendered: usize,
  pub moved:      usize,
  pub created:    usize,
  pub destroyed:  usize,
  pub width:      u16,
}

impl SurfaceReport {
  fn new(surface: SurfaceId, lines: usize) -> Self {
    Self {
      surface,
      lines,
      reused: 0,
      rerendered: 0,
      moved: 0,
      created: 0,
      destroyed: 0,
      width: 0,
    }
  }

  fn count(&mut self, outcome: Acquired) {
    match outcome {
      Acquired::Reused => self.reused += 1,
      Acquired::Rerendered => self.rerendered += 1,
      Acquired::Moved => self.moved += 1,
      Acquired::Created => self.created += 1,
    }
  }

  /// Decoration calls the cycle caused.
  pub fn host_ops(&self) -> usize {
    self.rerendered + self.moved + self.created + self.destroyed
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
  pub buffer:         BufferId,
  pub surfaces:       Vec<SurfaceReport>,
  /// Surfaces left out after a transient host error, such as one that
  /// vanished mid-refresh.
  pub skipped:        Vec<SurfaceId>,
  /// Annotations destroyed because their surface stopped showing the buffer.
  pub retired:        usize,
  /// Lines whose custom label failed.
  pub label_failures: usize,
}

impl RefreshReport {
  fn new(buffer: BufferId) -> Self {
    Self {
      buffer,
      surfaces: Vec::new(),
      skipped: Vec::new(),
      retired: 0,
      label_failures: 0,
    }
  }

  pub fn surface(&self, surface: SurfaceId) -> Option<&SurfaceReport> {
    self.surfaces.iter().find(|report| report.surface == surface)
  }

  pub fn host_ops(&self) -> usize {
    self.surfaces.iter().map(SurfaceReport::host_ops).sum::<usize>() + self.retired
  }
}

pub struct MarginEngine {
  config:        GutterConfig,
  buffers:       HashMap<BufferId, BufferState>,
  before_labels: Option<BeforeLabelsHook>,
}

impl fmt::Debug for MarginEngine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MarginEngine")
      .field("config", &self.config)
      .field("buffers", &self.buffers)
      .field("before_labels", &self.before_labels.is_some())
      .finish()
  }
}

impl MarginEngine {
  pub fn new(config: GutterConfig) -> Self {
    Self {
      config,
      buffers: HashMap::new(),
      before_labels: None,
    }
  }

  pub fn config(&self) -> &GutterConfig {
    &self.config
  }

  /// Replaces the configuration. The refresh policy applies at once and a
  /// changed margin side moves every enabled margin; format and mode are
  /// picked up the next time a buffer is enabled.
  pub fn set_config<H: Host>(&mut self, host: &mut H, config: GutterConfig) {
    let old_side = self.config.side;
    self.config = config;
    for state in self.buffers.values_mut() {
      state.scheduler.set_policy(self.config.policy());
    }
    if old_side == self.config.side {
      return;
    }

    let mut buffers: Vec<_> = self.buffers.keys().copied().collect();
    buffers.sort();
    for buffer in buffers {
      reset_margins(host, buffer, old_side);
      self.refresh(host, buffer);
    }
  }

  pub fn set_before_labels<F>(&mut self, hook: F)
  where
    F: FnMut(&mut BeforeLabels) + 'static,
  {
    self.before_labels = Some(Box::new(hook));
  }

  pub fn clear_before_labels(&mut self) {
    self.before_labels = None;
  }

  pub fn is_enabled(&self, buffer: BufferId) -> bool {
    self.buffers.contains_key(&buffer)
  }

  pub fn state(&self, buffer: BufferId) -> Option<&BufferState> {
    self.buffers.get(&buffer)
  }

  /// Routes a host event for `buffer`. Returns the report of the refresh it
  /// triggered, if any.
  pub fn handle_event<H: Host>(
    &mut self,
    host: &mut H,
    buffer: BufferId,
    event: MarginEvent,
  ) -> Option<RefreshReport> {
    let state = match event {
      MarginEvent::ModeEnable => return self.enable(host, buffer),
      MarginEvent::ModeDisable => {
        self.disable(host, buffer);
        return None;
      },
      MarginEvent::BufferClosed => {
        self.buffer_closed(host, buffer);
        return None;
      },
      _ => self.buffers.get_mut(&buffer)?,
    };

    let directive = match &event {
      MarginEvent::CursorOrCommand => state.scheduler.on_cursor_or_command(),
      MarginEvent::BufferEdit(edit) => {
        let len = host.text(buffer).map_or(0, TextBuffer::len_chars);
        state.scheduler.on_buffer_edit(edit, len)
      },
      MarginEvent::Scroll { .. } => state.scheduler.on_scroll(),
      MarginEvent::Idle => state.scheduler.on_idle(),
      MarginEvent::ModeEnable | MarginEvent::ModeDisable | MarginEvent::BufferClosed => {
        Directive::Skip
      },
    };
    tracing::trace!(?buffer, ?event, ?directive, "margin event");

    match directive {
      Directive::Skip => None,
      Directive::ArmIdle => {
        host.schedule_idle(buffer);
        None
      },
      Directive::Refresh => self.refresh(host, buffer),
    }
  }

  /// Enables the margin for `buffer` and refreshes it. Enabling an enabled
  /// buffer only refreshes.
  pub fn enable<H: Host>(&mut self, host: &mut H, buffer: BufferId) -> Option<RefreshReport> {
    if !self.buffers.contains_key(&buffer) {
      let format = match self.config.resolve_format() {
        Ok(format) => format,
        Err(err) => {
          tracing::warn!(%err, "falling back to dynamic line numbers");
          host.report(MessageLevel::Warning, err.to_string());
          LabelFormat::Dynamic
        },
      };
      tracing::debug!(?buffer, ?format, "enabling line number margin");
      self.buffers.insert(buffer, BufferState {
        pool: AnnotationPool::new(),
        scheduler: UpdateScheduler::new(self.config.policy()),
        format,
        mode: self.config.mode,
      });
    }
    self.refresh(host, buffer)
  }

  /// Disables the margin for `buffer`: margins are reset before any
  /// annotation is destroyed. Returns whether it was enabled.
  pub fn disable<H: Host>(&mut self, host: &mut H, buffer: BufferId) -> bool {
    let Some(mut state) = self.buffers.remove(&buffer) else {
      return false;
    };
    tracing::debug!(?buffer, "disabling line number margin");
    reset_margins(host, buffer, self.config.side);
    state.pool.clear(host);
    true
  }

  /// Forgets `buffer` after the host closed it. Its surfaces are gone, so
  /// margins are left alone.
  pub fn buffer_closed<H: Host>(&mut self, host: &mut H, buffer: BufferId) {
    if let Some(mut state) = self.buffers.remove(&buffer) {
      let released = state.pool.clear(host);
      tracing::debug!(?buffer, released, "buffer closed");
    }
  }

  /// Switches between relative and absolute numbers for `buffer`.
  pub fn toggle_mode<H: Host>(&mut self, host: &mut H, buffer: BufferId) -> Option<RefreshReport> {
    let state = self.buffers.get_mut(&buffer)?;
    state.mode = state.mode.toggled();
    self.refresh(host, buffer)
  }

  /// Brings every surface showing `buffer` up to date. `None` when the
  /// margin is not enabled for it, or when the refresh failed and disabled
  /// it.
  pub fn refresh<H: Host>(&mut self, host: &mut H, buffer: BufferId) -> Option<RefreshReport> {
    if host.text(buffer).is_none() {
      self.buffer_closed(host, buffer);
      return None;
    }
    let state = self.buffers.get_mut(&buffer)?;

    let resume = state.scheduler.enter_refresh();
    let result = refresh_buffer(host, buffer, state, &self.config, &mut self.before_labels);
    state.scheduler.leave_refresh(resume);

    match result {
      Ok(report) => {
        tracing::debug!(
          ?buffer,
          surfaces = report.surfaces.len(),
          skipped = report.skipped.len(),
          host_ops = report.host_ops(),
          "refreshed line number margin"
        );
        Some(report)
      },
      Err(err) => {
        tracing::warn!(?buffer, %err, "line number margin failed, disabling");
        self.disable(host, buffer);
        host.report(
          MessageLevel::Error,
          format!("relative line numbers disabled: {err}"),
        );
        None
      },
    }
  }
}

fn reset_margins<H: Host>(host: &mut H, buffer: BufferId, side: MarginSide) {
  for surface in host.surfaces_showing(buffer) {
    if let Err(err) = apply_margin_width(host, surface, side, 0) {
      tracing::trace!(%err, ?surface, "margin reset skipped");
    }
  }
}

/// Custom formatter failures of one refresh, reported together.
#[derive(Default)]
struct LabelFailures {
  count: usize,
  first: Option<LabelError>,
}

impl LabelFailures {
  fn record(&mut self, err: LabelError) {
    self.count += 1;
    self.first.get_or_insert(err);
  }
}

fn refresh_buffer<H: Host>(
  host: &mut H,
  buffer: BufferId,
  state: &mut BufferState,
  config: &GutterConfig,
  hook: &mut Option<BeforeLabelsHook>,
) -> Result<RefreshReport, HostError> {
  let total_lines = host.text(buffer).map_or(0, TextBuffer::total_lines);
  let cx = FormatContext::new(
    total_lines,
    state.mode,
    config.current_symbol.as_deref().map(Tendril::from),
  );

  let surfaces = host.surfaces_showing(buffer);
  let mut report = RefreshReport::new(buffer);
  let mut failures = LabelFailures::default();

  for &surface in &surfaces {
    match refresh_surface(host, buffer, surface, state, &cx, hook, &mut failures) {
      Ok(Some(surface_report)) => report.surfaces.push(surface_report),
      Ok(None) => {},
      Err(err) if err.is_transient() => {
        tracing::debug!(?surface, %err, "surface skipped during refresh");
        state.pool.retire_surface(host, surface);
        report.skipped.push(surface);
      },
      Err(err) => return Err(err),
    }
  }

  let stale: Vec<_> = state
    .pool
    .surfaces()
    .filter(|surface| !surfaces.contains(surface))
    .collect();
  for surface in stale {
    report.retired += state.pool.retire_surface(host, surface);
  }

  let mut applied = Vec::with_capacity(report.surfaces.len());
  for surface_report in std::mem::take(&mut report.surfaces) {
    let surface = surface_report.surface;
    match apply_margin_width(host, surface, config.side, surface_report.width) {
      Ok(_) => applied.push(surface_report),
      Err(err) if err.is_transient() => {
        tracing::debug!(?surface, %err, "margin width not applied");
        state.pool.retire_surface(host, surface);
        report.skipped.push(surface);
      },
      Err(err) => return Err(err),
    }
  }
  report.surfaces = applied;

  if let Some(first) = failures.first {
    report.label_failures = failures.count;
    host.report(
      MessageLevel::Error,
      format!("{first} ({} line(s) affected)", failures.count),
    );
  }
  Ok(report)
}

fn refresh_surface<H: Host>(
  host: &mut H,
  buffer: BufferId,
  surface: SurfaceId,
  state: &mut BufferState,
  cx: &FormatContext,
  hook: &mut Option<BeforeLabelsHook>,
  failures: &mut LabelFailures,
) -> Result<Option<SurfaceReport>, HostError> {
  let Some(viewport) = read_viewport(host, buffer, surface)? else {
    return Ok(None);
  };

  let mut before = BeforeLabels {
    buffer,
    surface,
    cursor_line: viewport.cursor_line,
    force_render: false,
  };
  if let Some(hook) = hook.as_mut() {
    hook(&mut before);
  }

  let mut report = SurfaceReport::new(surface, viewport.lines.len());
  let mut width = WidthTracker::default();
  let mut cycle = state.pool.begin_cycle(host, surface, before.force_render)?;
  for line in &viewport.lines {
    let label = format_label(line.line, viewport.cursor_line, &state.format, cx).unwrap_or_else(
      |err| {
        failures.record(err);
        Label::empty(LabelStyle::Line)
      },
    );
    width.observe(&label);
    match cycle.acquire(host, line.anchor, label) {
      Ok(outcome) => report.count(outcome),
      Err(err) => {
        cycle.abort(host);
        return Err(err);
      },
    }
  }
  report.destroyed = cycle.finish(host);
  report.width = width.width();
  Ok(Some(report))
}
