//! Margin width policy.
//!
//! The margin is as wide as the widest label produced in a cycle. Widths are
//! tracked while labels are produced, never in a separate pass.

use crate::{
  host::{
    Host,
    HostError,
    MarginSide,
    Margins,
    SurfaceId,
  },
  label::Label,
};

/// Number of decimal digits in `n`, with `0` counted as one digit.
pub fn digit_count(n: usize) -> usize {
  (usize::checked_ilog10(n).unwrap_or(0) + 1) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WidthTracker {
  max: usize,
}

impl WidthTracker {
  pub fn observe(&mut self, label: &Label) {
    self.max = self.max.max(label.width());
  }

  pub fn width(&self) -> u16 {
    u16::try_from(self.max).unwrap_or(u16::MAX)
  }
}

/// Writes `width` to the engine's side of the surface margins, keeping the
/// opposite side as the host has it.
pub fn apply_margin_width<H: Host>(
  host: &mut H,
  surface: SurfaceId,
  side: MarginSide,
  width: u16,
) -> Result<Margins, HostError> {
  let current = host.margins(surface)?;
  let next = current.with(side, width);
  if next != current {
    host.set_margins(surface, next)?;
  }
  Ok(next)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::LabelStyle;

  #[test]
  fn digit_counts() {
    assert_eq!(digit_count(0), 1);
    assert_eq!(digit_count(9), 1);
    assert_eq!(digit_count(10), 2);
    assert_eq!(digit_count(20), 2);
    assert_eq!(digit_count(1000), 4);
  }

  #[test]
  fn tracker_keeps_the_widest_label() {
    let mut tracker = WidthTracker::default();
    assert_eq!(tracker.width(), 0);
    for text in ["1", "120", "", "12"] {
      tracker.observe(&Label::new(text, LabelStyle::Line));
    }
    assert_eq!(tracker.width(), 3);
  }
}
