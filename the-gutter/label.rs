//! Per-line label formatting.
//!
//! Built-in formats render the distance between a line and the cursor line.
//! A [`CustomFormatter`] instead receives the absolute line number and is free
//! to render anything; the two kinds are deliberately not symmetric.

use std::{
  fmt::{
    self,
    Write as _,
  },
  str::FromStr,
  sync::Arc,
};

use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;

use crate::{
  Tendril,
  width::digit_count,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineNumberMode {
  Absolute,
  #[default]
  Relative,
}

impl LineNumberMode {
  pub const fn toggled(self) -> Self {
    match self {
      Self::Absolute => Self::Relative,
      Self::Relative => Self::Absolute,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelStyle {
  #[default]
  Line,
  /// The line holding the cursor.
  Current,
}

/// Text and style of one margin label. Equality covers both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Label {
  pub text:  Tendril,
  pub style: LabelStyle,
}

impl Label {
  pub fn new(text: impl Into<Tendril>, style: LabelStyle) -> Self {
    Self {
      text: text.into(),
      style,
    }
  }

  pub fn empty(style: LabelStyle) -> Self {
    Self {
      text: Tendril::new(),
      style,
    }
  }

  /// Width in columns. Every char occupies one column.
  pub fn width(&self) -> usize {
    self.text.chars().count()
  }
}

type CustomFn = dyn Fn(usize) -> anyhow::Result<String> + Send + Sync;

/// User-supplied label function, called with the 1-based line number.
#[derive(Clone)]
pub struct CustomFormatter(Arc<CustomFn>);

impl CustomFormatter {
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(usize) -> anyhow::Result<String> + Send + Sync + 'static,
  {
    Self(Arc::new(f))
  }

  pub fn call(&self, line: usize) -> anyhow::Result<String> {
    (self.0)(line)
  }
}

impl fmt::Debug for CustomFormatter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("CustomFormatter(..)")
  }
}

impl PartialEq for CustomFormatter {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Align {
  #[default]
  Right,
  Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
  #[error("pattern has no `%d` or `%s` directive")]
  MissingDirective,
  #[error("pattern has more than one directive")]
  MultipleDirectives,
  #[error("unsupported conversion `%{0}`")]
  UnsupportedConversion(char),
  #[error("pattern ends with an unterminated `%`")]
  Dangling,
  #[error("field width exceeds {}", u16::MAX)]
  WidthTooLarge,
}

/// A printf-like pattern with exactly one `%d`/`%s` directive.
///
/// Supports `-` (left align) and `0` (zero pad) flags, a field width, and
/// `%%` for a literal percent sign: `"%3d "`, `"%-4s|"`, `"%02d"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberPattern {
  prefix:   Tendril,
  suffix:   Tendril,
  width:    usize,
  align:    Align,
  zero_pad: bool,
}

impl NumberPattern {
  pub fn parse(pattern: &str) -> Result<Self, PatternError> {
    let mut prefix = Tendril::new();
    let mut suffix = Tendril::new();
    let mut directive: Option<(usize, Align, bool)> = None;
    let mut chars = pattern.chars().peekable();

    while let Some(ch) = chars.next() {
      if ch != '%' {
        if directive.is_some() {
          suffix.push(ch);
        } else {
          prefix.push(ch);
        }
        continue;
      }

      if chars.peek() == Some(&'%') {
        chars.next();
        if directive.is_some() {
          suffix.push('%');
        } else {
          prefix.push('%');
        }
        continue;
      }

      let mut align = Align::Right;
      let mut zero_pad = false;
      while let Some(&flag) = chars.peek() {
        match flag {
          '-' => align = Align::Left,
          '0' => zero_pad = true,
          _ => break,
        }
        chars.next();
      }

      let mut width = 0usize;
      while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        width = width * 10 + digit as usize;
        if width > usize::from(u16::MAX) {
          return Err(PatternError::WidthTooLarge);
        }
        chars.next();
      }

      match chars.next() {
        Some('d' | 's') => {},
        Some(other) => return Err(PatternError::UnsupportedConversion(other)),
        None => return Err(PatternError::Dangling),
      }
      if directive.is_some() {
        return Err(PatternError::MultipleDirectives);
      }
      directive = Some((width, align, zero_pad && align == Align::Right));
    }

    let (width, align, zero_pad) = directive.ok_or(PatternError::MissingDirective)?;
    Ok(Self {
      prefix,
      suffix,
      width,
      align,
      zero_pad,
    })
  }

  /// Substitutes `value` into the pattern. Never truncates.
  pub fn render(&self, value: &str) -> Tendril {
    let len = value.chars().count();
    let pad = self.width.saturating_sub(len);
    let numeric = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    let fill = if self.zero_pad && numeric { '0' } else { ' ' };

    let mut out = Tendril::new();
    out.push_str(&self.prefix);
    if self.align == Align::Right {
      out.extend(std::iter::repeat_n(fill, pad));
      out.push_str(value);
    } else {
      out.push_str(value);
      out.extend(std::iter::repeat_n(' ', pad));
    }
    out.push_str(&self.suffix);
    out
  }
}

impl FromStr for NumberPattern {
  type Err = PatternError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelFormat {
  /// Right-aligned to the digit count of the buffer's line count.
  Dynamic,
  Fixed(NumberPattern),
  Custom(CustomFormatter),
}

impl Default for LabelFormat {
  fn default() -> Self {
    Self::Dynamic
  }
}

/// Inputs shared by every label of one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatContext {
  /// Field width of [`LabelFormat::Dynamic`], from the total line count.
  pub dynamic_width:  usize,
  pub mode:           LineNumberMode,
  /// Replaces the cursor line's `0`. An empty symbol shows the absolute
  /// line number instead.
  pub current_symbol: Option<Tendril>,
}

impl FormatContext {
  pub fn new(total_lines: usize, mode: LineNumberMode, current_symbol: Option<Tendril>) -> Self {
    Self {
      dynamic_width: digit_count(total_lines),
      mode,
      current_symbol,
    }
  }
}

#[derive(Debug, Error)]
pub enum LabelError {
  #[error("custom line formatter failed on line {line}: {message}")]
  Custom { line: usize, message: String },
}

/// Formats the label for `line` with the cursor on `cursor_line`. Both are
/// 1-based.
pub fn format_label(
  line: usize,
  cursor_line: usize,
  format: &LabelFormat,
  cx: &FormatContext,
) -> Result<Label, LabelError> {
  let style = if line == cursor_line {
    LabelStyle::Current
  } else {
    LabelStyle::Line
  };

  let pattern = match format {
    LabelFormat::Custom(custom) => {
      return custom
        .call(line)
        .map(|text| Label::new(text, style))
        .map_err(|err| {
          LabelError::Custom {
            line,
            message: format!("{err:#}"),
          }
        });
    },
    LabelFormat::Dynamic => None,
    LabelFormat::Fixed(pattern) => Some(pattern),
  };

  let mut value = Tendril::new();
  match (cx.mode, style, cx.current_symbol.as_deref()) {
    (LineNumberMode::Relative, LabelStyle::Current, Some("")) => {
      let _ = write!(value, "{line}");
    },
    (LineNumberMode::Relative, LabelStyle::Current, Some(symbol)) => value.push_str(symbol),
    (LineNumberMode::Relative, ..) => {
      let _ = write!(value, "{}", line.abs_diff(cursor_line));
    },
    (LineNumberMode::Absolute, ..) => {
      let _ = write!(value, "{line}");
    },
  }

  let text = match pattern {
    Some(pattern) => pattern.render(&value),
    None => {
      let mut padded = Tendril::new();
      let _ = write!(padded, "{:>width$}", value.as_str(), width = cx.dynamic_width);
      padded
    },
  };
  Ok(Label::new(text, style))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn relative(total_lines: usize) -> FormatContext {
    FormatContext::new(total_lines, LineNumberMode::Relative, None)
  }

  fn text(line: usize, cursor: usize, format: &LabelFormat, cx: &FormatContext) -> String {
    format_label(line, cursor, format, cx)
      .expect("built-in formats are infallible")
      .text
      .to_string()
  }

  #[test]
  fn dynamic_pads_to_line_count_digits() {
    let cx = relative(20);
    assert_eq!(text(1, 1, &LabelFormat::Dynamic, &cx), " 0");
    assert_eq!(text(10, 1, &LabelFormat::Dynamic, &cx), " 9");
    assert_eq!(text(20, 1, &LabelFormat::Dynamic, &cx), "19");
  }

  #[test]
  fn dynamic_never_truncates() {
    let cx = relative(5);
    assert_eq!(text(120, 1, &LabelFormat::Dynamic, &cx), "119");
  }

  #[test]
  fn cursor_line_is_styled_current() {
    let cx = relative(9);
    let label = format_label(4, 4, &LabelFormat::Dynamic, &cx).unwrap();
    assert_eq!(label, Label::new("0", LabelStyle::Current));
    let label = format_label(5, 4, &LabelFormat::Dynamic, &cx).unwrap();
    assert_eq!(label.style, LabelStyle::Line);
  }

  #[test]
  fn label_equality_includes_style() {
    assert_ne!(
      Label::new("1", LabelStyle::Line),
      Label::new("1", LabelStyle::Current)
    );
  }

  #[test]
  fn current_symbol_replaces_zero() {
    let cx = FormatContext::new(100, LineNumberMode::Relative, Some("->".into()));
    assert_eq!(text(7, 7, &LabelFormat::Dynamic, &cx), " ->");
    assert_eq!(text(8, 7, &LabelFormat::Dynamic, &cx), "  1");
  }

  #[test]
  fn empty_current_symbol_shows_absolute_line() {
    let cx = FormatContext::new(100, LineNumberMode::Relative, Some("".into()));
    assert_eq!(text(42, 42, &LabelFormat::Dynamic, &cx), " 42");
    assert_eq!(text(40, 42, &LabelFormat::Dynamic, &cx), "  2");
  }

  #[test]
  fn absolute_mode_renders_line_numbers() {
    let cx = FormatContext::new(100, LineNumberMode::Absolute, Some("->".into()));
    assert_eq!(text(7, 7, &LabelFormat::Dynamic, &cx), "  7");
    assert_eq!(text(12, 7, &LabelFormat::Dynamic, &cx), " 12");
  }

  #[test]
  fn custom_formatter_receives_line_number() {
    let cx = relative(50);
    let format = LabelFormat::Custom(CustomFormatter::new(|line| Ok(format!("L{line}"))));
    assert_eq!(text(8, 10, &format, &cx), "L8");
    assert_eq!(text(10, 10, &format, &cx), "L10");
  }

  #[test]
  fn custom_formatter_failure_is_an_error() {
    let cx = relative(50);
    let format = LabelFormat::Custom(CustomFormatter::new(|line| {
      anyhow::ensure!(line != 3, "no third line");
      Ok(line.to_string())
    }));
    let err = format_label(3, 1, &format, &cx).unwrap_err();
    let LabelError::Custom { line, message } = err;
    assert_eq!(line, 3);
    assert_eq!(message, "no third line");
  }

  #[test]
  fn pattern_parsing() {
    let pattern = NumberPattern::parse("%3d ").unwrap();
    assert_eq!(pattern.render("7"), "  7 ");
    assert_eq!(pattern.render("1234"), "1234 ");

    let pattern = NumberPattern::parse("%-3s|").unwrap();
    assert_eq!(pattern.render("7"), "7  |");

    let pattern = NumberPattern::parse("%03d").unwrap();
    assert_eq!(pattern.render("7"), "007");
    assert_eq!(pattern.render("->"), " ->");

    let pattern = NumberPattern::parse("100%% %d").unwrap();
    assert_eq!(pattern.render("5"), "100% 5");

    assert_eq!(
      NumberPattern::parse("plain"),
      Err(PatternError::MissingDirective)
    );
    assert_eq!(
      NumberPattern::parse("%d%d"),
      Err(PatternError::MultipleDirectives)
    );
    assert_eq!(
      NumberPattern::parse("%x"),
      Err(PatternError::UnsupportedConversion('x'))
    );
    assert_eq!(NumberPattern::parse("%3"), Err(PatternError::Dangling));
  }

  #[test]
  fn field_width_is_bounded() {
    assert!(NumberPattern::parse("%65535d").is_ok());
    assert_eq!(
      NumberPattern::parse("%65536d"),
      Err(PatternError::WidthTooLarge)
    );
    assert_eq!(
      NumberPattern::parse("%999999999999999999999999d"),
      Err(PatternError::WidthTooLarge)
    );
  }

  quickcheck::quickcheck! {
    fn builtin_labels_decode_to_distance(line: u16, cursor: u16, total: u16) -> bool {
      let (line, cursor) = (line as usize + 1, cursor as usize + 1);
      let cx = relative(total as usize);
      let fixed = LabelFormat::Fixed(NumberPattern::parse("%4d").unwrap());
      [LabelFormat::Dynamic, fixed].iter().all(|format| {
        let label = format_label(line, cursor, format, &cx).unwrap();
        label.text.trim().parse::<usize>().ok() == Some(line.abs_diff(cursor))
      })
    }
  }
}
