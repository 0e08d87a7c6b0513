//! Refresh scheduling.
//!
//! Host hooks (post-command, after-change, scroll, window changes, mode
//! toggles) arrive as [`MarginEvent`]s. [`UpdateScheduler`] turns them into a
//! [`Directive`] per buffer; the engine carries it out.

use the_core::line_ending::contains_line_ending;

use crate::{
  Tendril,
  host::SurfaceId,
};

/// A text change, in post-change char offsets: `start..end` is the inserted
/// text, empty for a pure deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferEdit {
  pub start:    usize,
  pub end:      usize,
  pub inserted: Tendril,
}

impl BufferEdit {
  pub fn insertion(start: usize, text: impl Into<Tendril>) -> Self {
    let inserted = text.into();
    Self {
      start,
      end: start + inserted.chars().count(),
      inserted,
    }
  }

  pub fn deletion(at: usize) -> Self {
    Self {
      start:    at,
      end:      at,
      inserted: Tendril::new(),
    }
  }

  /// Whether this edit can change any line's label.
  ///
  /// A same-line insertion away from the end of the buffer never changes a
  /// line's distance from the cursor. Deletions are always refreshed since
  /// the removed text may have held line endings.
  pub fn needs_refresh(&self, buffer_len: usize) -> bool {
    self.inserted.is_empty() || self.end >= buffer_len || contains_line_ending(&self.inserted)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarginEvent {
  /// Fired after every user command.
  CursorOrCommand,
  BufferEdit(BufferEdit),
  /// The surface scrolled, resized or was rearranged.
  Scroll { surface: SurfaceId },
  /// An idle callback armed through `Host::schedule_idle` fired.
  Idle,
  ModeEnable,
  ModeDisable,
  BufferClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
  #[default]
  Idle,
  /// A synchronous refresh is running.
  PendingImmediate,
  /// An idle refresh is armed and has not fired yet.
  PendingDelayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
  /// Refresh after every command.
  pub eager: bool,
  /// With `eager`, defer the refresh to host idle time.
  pub delay: bool,
}

impl Default for RefreshPolicy {
  fn default() -> Self {
    Self {
      eager: true,
      delay: false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
  Skip,
  Refresh,
  /// Ask the host for an idle callback.
  ArmIdle,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateScheduler {
  state:  SchedulerState,
  policy: RefreshPolicy,
}

impl UpdateScheduler {
  pub fn new(policy: RefreshPolicy) -> Self {
    Self {
      state: SchedulerState::Idle,
      policy,
    }
  }

  pub fn state(&self) -> SchedulerState {
    self.state
  }

  pub fn policy(&self) -> RefreshPolicy {
    self.policy
  }

  pub fn set_policy(&mut self, policy: RefreshPolicy) {
    self.policy = policy;
  }

  pub fn on_cursor_or_command(&mut self) -> Directive {
    match self.policy {
      RefreshPolicy { eager: false, .. } => Directive::Skip,
      RefreshPolicy { delay: false, .. } => Directive::Refresh,
      _ if self.state == SchedulerState::PendingDelayed => Directive::Skip,
      _ => {
        self.state = SchedulerState::PendingDelayed;
        Directive::ArmIdle
      },
    }
  }

  pub fn on_buffer_edit(&mut self, edit: &BufferEdit, buffer_len: usize) -> Directive {
    if self.policy.eager || !edit.needs_refresh(buffer_len) {
      Directive::Skip
    } else {
      Directive::Refresh
    }
  }

  pub fn on_scroll(&mut self) -> Directive {
    Directive::Refresh
  }

  pub fn on_idle(&mut self) -> Directive {
    if self.state == SchedulerState::PendingDelayed {
      self.state = SchedulerState::Idle;
      Directive::Refresh
    } else {
      Directive::Skip
    }
  }

  /// Marks a synchronous refresh as running; pass the result to
  /// [`UpdateScheduler::leave_refresh`].
  pub fn enter_refresh(&mut self) -> SchedulerState {
    std::mem::replace(&mut self.state, SchedulerState::PendingImmediate)
  }

  /// Restores the state from before the refresh, so an idle refresh armed
  /// earlier still fires.
  pub fn leave_refresh(&mut self, resume: SchedulerState) {
    self.state = match resume {
      SchedulerState::PendingDelayed => SchedulerState::PendingDelayed,
      _ => SchedulerState::Idle,
    };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scheduler(eager: bool, delay: bool) -> UpdateScheduler {
    UpdateScheduler::new(RefreshPolicy { eager, delay })
  }

  #[test]
  fn eager_immediate_refreshes_every_command() {
    let mut s = scheduler(true, false);
    assert_eq!(s.on_cursor_or_command(), Directive::Refresh);
    assert_eq!(s.on_cursor_or_command(), Directive::Refresh);
    assert_eq!(s.state(), SchedulerState::Idle);
  }

  #[test]
  fn eager_delayed_arms_once_until_idle_fires() {
    let mut s = scheduler(true, true);
    assert_eq!(s.on_cursor_or_command(), Directive::ArmIdle);
    assert_eq!(s.state(), SchedulerState::PendingDelayed);
    assert_eq!(s.on_cursor_or_command(), Directive::Skip);
    assert_eq!(s.on_cursor_or_command(), Directive::Skip);

    assert_eq!(s.on_idle(), Directive::Refresh);
    assert_eq!(s.state(), SchedulerState::Idle);
    assert_eq!(s.on_idle(), Directive::Skip);
    assert_eq!(s.on_cursor_or_command(), Directive::ArmIdle);
  }

  #[test]
  fn lazy_mode_ignores_commands() {
    let mut s = scheduler(false, false);
    assert_eq!(s.on_cursor_or_command(), Directive::Skip);
    assert_eq!(s.on_scroll(), Directive::Refresh);
  }

  #[test]
  fn policy_changes_apply_to_the_next_event() {
    let mut s = scheduler(false, false);
    assert_eq!(s.on_cursor_or_command(), Directive::Skip);

    let eager = RefreshPolicy {
      eager: true,
      delay: false,
    };
    s.set_policy(eager);
    assert_eq!(s.policy(), eager);
    assert_eq!(s.on_cursor_or_command(), Directive::Refresh);
  }

  #[test]
  fn edits_are_only_consumed_when_not_eager() {
    let newline = BufferEdit::insertion(3, "\n");
    assert_eq!(scheduler(true, false).on_buffer_edit(&newline, 100), Directive::Skip);
    assert_eq!(scheduler(false, false).on_buffer_edit(&newline, 100), Directive::Refresh);
  }

  #[test]
  fn edit_filter() {
    assert!(!BufferEdit::insertion(3, "x").needs_refresh(100));
    assert!(!BufferEdit::insertion(3, "hello world").needs_refresh(100));
    assert!(BufferEdit::insertion(3, "a\nb").needs_refresh(100));
    assert!(BufferEdit::insertion(3, "\r\n").needs_refresh(100));
    assert!(BufferEdit::deletion(3).needs_refresh(100));
    assert!(BufferEdit::insertion(99, "x").needs_refresh(100));
  }

  #[test]
  fn scroll_during_pending_idle_keeps_it_armed() {
    let mut s = scheduler(true, true);
    assert_eq!(s.on_cursor_or_command(), Directive::ArmIdle);
    assert_eq!(s.on_scroll(), Directive::Refresh);
    let resume = s.enter_refresh();
    assert_eq!(s.state(), SchedulerState::PendingImmediate);
    s.leave_refresh(resume);
    assert_eq!(s.state(), SchedulerState::PendingDelayed);
    assert_eq!(s.on_idle(), Directive::Refresh);
  }
}
