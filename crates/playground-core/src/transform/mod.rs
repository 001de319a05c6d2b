//! Bidirectional mapping between plain JSON configuration values and
//! Enhanced value trees.

pub mod forward;
pub mod reverse;

pub use forward::{select_option, Transformer};
pub use reverse::{check_validity, extract_value_by_metadata, should_include_value, to_plain_value};
