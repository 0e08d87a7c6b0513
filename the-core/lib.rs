//! Text primitives shared by the margin engine and its scheduler.

pub mod line_ending;
