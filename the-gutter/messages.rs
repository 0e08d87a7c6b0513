//! Reports raised by the engine.
//!
//! The engine talks to the user only through [`crate::host::Host::report`].
//! [`ReportLog`] is the bounded log the in-memory host keeps them in; a real
//! host would forward them to its status line instead.

use std::collections::VecDeque;

use serde::{
  Deserialize,
  Serialize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageLevel {
  Info,
  Warning,
  Error,
}

impl MessageLevel {
  const fn slot(self) -> usize {
    match self {
      Self::Info => 0,
      Self::Warning => 1,
      Self::Error => 2,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
  /// Position in the stream of every report ever pushed, starting at 0.
  pub seq:   u64,
  pub level: MessageLevel,
  pub text:  String,
}

/// Keeps the most recent `capacity` reports. Per-level counts cover every
/// report pushed since the last [`ReportLog::clear`], including evicted ones.
#[derive(Debug, Clone)]
pub struct ReportLog {
  entries:  VecDeque<Report>,
  capacity: usize,
  pushed:   u64,
  counts:   [usize; 3],
}

impl Default for ReportLog {
  fn default() -> Self {
    Self::with_capacity(64)
  }
}

impl ReportLog {
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      entries: VecDeque::with_capacity(capacity),
      capacity,
      pushed: 0,
      counts: [0; 3],
    }
  }

  pub fn push(&mut self, level: MessageLevel, text: impl Into<String>) -> u64 {
    let seq = self.pushed;
    self.pushed += 1;
    self.counts[level.slot()] += 1;

    if self.entries.len() == self.capacity {
      self.entries.pop_front();
    }
    self.entries.push_back(Report {
      seq,
      level,
      text: text.into(),
    });
    seq
  }

  pub fn latest(&self) -> Option<&Report> {
    self.entries.back()
  }

  /// Newest retained report at `level` or above.
  pub fn latest_at_least(&self, level: MessageLevel) -> Option<&Report> {
    self.entries.iter().rev().find(|report| report.level >= level)
  }

  pub fn count(&self, level: MessageLevel) -> usize {
    self.counts[level.slot()]
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Report> {
    self.entries.iter()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.counts = [0; 3];
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn oldest_reports_are_evicted_but_still_counted() {
    let mut log = ReportLog::with_capacity(2);
    log.push(MessageLevel::Error, "first");
    log.push(MessageLevel::Warning, "second");
    let last = log.push(MessageLevel::Error, "third");

    assert_eq!(last, 2);
    let texts: Vec<_> = log.iter().map(|report| report.text.as_str()).collect();
    assert_eq!(texts, ["second", "third"]);
    assert_eq!(log.count(MessageLevel::Error), 2);
    assert_eq!(log.count(MessageLevel::Info), 0);
  }

  #[test]
  fn latest_at_least_skips_lower_levels() {
    let mut log = ReportLog::default();
    log.push(MessageLevel::Warning, "bad format");
    log.push(MessageLevel::Info, "refreshed");

    assert_eq!(log.latest().map(|r| r.level), Some(MessageLevel::Info));
    let worst = log.latest_at_least(MessageLevel::Warning).unwrap();
    assert_eq!(worst.text, "bad format");
    assert!(log.latest_at_least(MessageLevel::Error).is_none());
  }

  #[test]
  fn clear_resets_counts_not_sequence() {
    let mut log = ReportLog::default();
    log.push(MessageLevel::Error, "a");
    log.clear();
    assert!(log.is_empty());
    assert_eq!(log.count(MessageLevel::Error), 0);
    assert_eq!(log.push(MessageLevel::Info, "b"), 1);
  }
}
