//! Reference patterns used to find the sprocket hole
//!
//! Stock patterns ship for Super 8 and Regular 8, plus two hole-edge
//! patterns used to measure hole height. A custom pattern captured from the
//! scan itself overrides the stock one when present.

pub mod integrity;
pub mod registry;
pub mod template;

pub use integrity::{compute_hash, verify_integrity, EXPECTED_HASHES};
pub use registry::TemplateRegistry;
pub use template::{
    ExpectedPosition, FilmType, Template, TemplateKind, REFERENCE_HEIGHT, REFERENCE_WIDTH,
};
