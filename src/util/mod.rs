//! Utility functions for common operations.
//!
//! - **URL validation**: feed URLs must be absolute http(s) URLs
//! - **Text processing**: entity unescaping and display truncation

mod text;
mod url_validator;

pub use text::{strip_control_chars, truncate_chars, unescape_html};
pub use url_validator::{validate_url, UrlValidationError};
