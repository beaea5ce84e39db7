//! Sprocket-hole alignment
//!
//! [`TemplateMatcher`] finds a pattern in a grayscale image.
//! [`AlignmentEngine`] restricts that search to a stripe along the left
//! edge of the frame, turns the match into a shift and applies it. It also
//! runs the hole-height probe that sizes stock patterns to the scan and
//! flags a likely wrong film type.

pub mod engine;
pub mod matcher;

pub use engine::{AlignmentEngine, AlignmentResult, FilmTypeSuggestion, HoleProbe};
pub use matcher::{MatchOutcome, TemplateMatcher};
