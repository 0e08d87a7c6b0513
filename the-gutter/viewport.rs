//! Visible line enumeration.

use std::ops::Range;

use crate::host::{
  BufferId,
  Host,
  HostError,
  SurfaceId,
  TextBuffer,
};

/// A line shown in a surface: where its decoration anchors and its 1-based
/// number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleLine {
  pub anchor: usize,
  pub line:   usize,
}

/// What one surface shows of a buffer at the start of a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewport {
  pub surface:     SurfaceId,
  pub cursor_line: usize,
  pub lines:       Vec<VisibleLine>,
}

/// Lines whose start lies inside `range`, plus the partially visible line
/// containing `range.start`.
///
/// A line starting at the end of the buffer is never yielded: neither the
/// empty line after a trailing line ending nor the single line of an empty
/// buffer carries a label.
pub fn visible_lines<T: TextBuffer + ?Sized>(text: &T, range: Range<usize>) -> Vec<VisibleLine> {
  let len = text.len_chars();
  let end = range.end.min(len);
  if range.start >= range.end {
    return Vec::new();
  }

  let mut row = text.char_to_line(range.start);
  let mut lines = Vec::new();
  loop {
    let anchor = text.line_to_char(row);
    if anchor >= end {
      break;
    }
    lines.push(VisibleLine {
      anchor,
      line: row + 1,
    });
    row += 1;
  }
  lines
}

/// 1-based line holding `cursor`, independent of scrolling.
pub fn cursor_line<T: TextBuffer + ?Sized>(text: &T, cursor: usize) -> usize {
  text.char_to_line(cursor) + 1
}

/// Reads the viewport of `surface`. `None` when the host no longer has the
/// buffer's text.
pub fn read_viewport<H: Host>(
  host: &H,
  buffer: BufferId,
  surface: SurfaceId,
) -> Result<Option<Viewport>, HostError> {
  let range = host.visible_range(surface)?;
  let cursor = host.cursor_position(surface)?;
  let Some(text) = host.text(buffer) else {
    return Ok(None);
  };
  Ok(Some(Viewport {
    surface,
    cursor_line: cursor_line(text, cursor),
    lines: visible_lines(text, range),
  }))
}
