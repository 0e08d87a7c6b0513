use ropey::{
  Rope,
  RopeSlice,
};

/// A line break as ropey sees it.
///
/// Only CRLF and LF are recognised by default. The `unicode-lines` feature
/// adds the other breaks ropey counts in that configuration (VT, FF, a lone
/// CR, NEL and the two Unicode separators), keeping this type and
/// `Rope::len_lines` in agreement.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum LineEnding {
  Crlf,
  LF,
  #[cfg(feature = "unicode-lines")]
  VT,
  #[cfg(feature = "unicode-lines")]
  FF,
  #[cfg(feature = "unicode-lines")]
  CR,
  #[cfg(feature = "unicode-lines")]
  Nel,
  #[cfg(feature = "unicode-lines")]
  LS,
  #[cfg(feature = "unicode-lines")]
  PS,
}

impl LineEnding {
  pub const fn len_chars(self) -> usize {
    if matches!(self, Self::Crlf) { 2 } else { 1 }
  }

  /// Single-char endings only; CRLF is recognised by the callers that can
  /// look one char ahead or behind.
  pub const fn from_char(ch: char) -> Option<Self> {
    Some(match ch {
      '\n' => Self::LF,
      #[cfg(feature = "unicode-lines")]
      '\u{0B}' => Self::VT,
      #[cfg(feature = "unicode-lines")]
      '\u{0C}' => Self::FF,
      #[cfg(feature = "unicode-lines")]
      '\r' => Self::CR,
      #[cfg(feature = "unicode-lines")]
      '\u{85}' => Self::Nel,
      #[cfg(feature = "unicode-lines")]
      '\u{2028}' => Self::LS,
      #[cfg(feature = "unicode-lines")]
      '\u{2029}' => Self::PS,
      _ => return None,
    })
  }
}

/// Finds the first line ending in `text`, returning its byte offset.
///
/// A bare CR directly followed by LF is reported as a single CRLF.
pub fn find_line_ending(text: &str) -> Option<(usize, LineEnding)> {
  let mut chars = text.char_indices().peekable();
  while let Some((idx, ch)) = chars.next() {
    if ch == '\r' && matches!(chars.peek(), Some((_, '\n'))) {
      return Some((idx, LineEnding::Crlf));
    }
    if let Some(ending) = LineEnding::from_char(ch) {
      return Some((idx, ending));
    }
  }
  None
}

/// Whether inserting `text` can split a line.
///
/// Without the `unicode-lines` feature a lone CR is not a line ending, which
/// matches how ropey counts lines in that configuration.
#[inline]
pub fn contains_line_ending(text: &str) -> bool {
  find_line_ending(text).is_some()
}

/// Returns the passed slice's trailing line ending, if any.
pub fn get_line_ending(line: &RopeSlice) -> Option<LineEnding> {
  let len = line.len_chars();
  if len == 0 {
    return None;
  }
  let last = line.char(len - 1);
  if last == '\n' && len >= 2 && line.char(len - 2) == '\r' {
    return Some(LineEnding::Crlf);
  }
  LineEnding::from_char(last)
}

/// Number of lines a user would count in `text`.
///
/// Ropey reports one extra, empty line after a trailing line ending and a
/// single empty line for an empty rope; neither is counted here.
pub fn counted_lines(text: &Rope) -> usize {
  let slice = text.slice(..);
  if slice.len_chars() == 0 {
    return 0;
  }
  let lines = slice.len_lines();
  if get_line_ending(&slice).is_some() {
    lines - 1
  } else {
    lines
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_char_endings() {
    assert_eq!(LineEnding::from_char('\n'), Some(LineEnding::LF));
    assert_eq!(LineEnding::from_char('a'), None);
    assert_eq!(LineEnding::Crlf.len_chars(), 2);
    assert_eq!(LineEnding::LF.len_chars(), 1);
    #[cfg(not(feature = "unicode-lines"))]
    assert_eq!(LineEnding::from_char('\r'), None);
    #[cfg(feature = "unicode-lines")]
    assert_eq!(LineEnding::from_char('\u{2028}'), Some(LineEnding::LS));
  }

  #[test]
  fn finds_first_line_ending() {
    assert_eq!(find_line_ending("abc"), None);
    assert_eq!(find_line_ending("ab\ncd"), Some((2, LineEnding::LF)));
    assert_eq!(find_line_ending("x\r\ny"), Some((1, LineEnding::Crlf)));
    assert!(contains_line_ending("\n"));
    assert!(!contains_line_ending("plain text"));
    #[cfg(feature = "unicode-lines")]
    assert_eq!(find_line_ending("é\u{2029}"), Some((2, LineEnding::PS)));
  }

  #[test]
  fn trailing_line_ending_of_slice() {
    let text = Rope::from("one\r\ntwo\n");
    assert_eq!(get_line_ending(&text.line(0)), Some(LineEnding::Crlf));
    assert_eq!(get_line_ending(&text.line(1)), Some(LineEnding::LF));
    assert_eq!(get_line_ending(&text.line(2)), None);
  }

  #[test]
  fn counted_lines_ignores_phantom_last_line() {
    assert_eq!(counted_lines(&Rope::from("")), 0);
    assert_eq!(counted_lines(&Rope::from("a")), 1);
    assert_eq!(counted_lines(&Rope::from("a\n")), 1);
    assert_eq!(counted_lines(&Rope::from("a\nb")), 2);
    assert_eq!(counted_lines(&Rope::from("a\nb\n")), 2);
    assert_eq!(counted_lines(&Rope::from("\n\n")), 2);
  }
}
