//! Utility functions for common operations.
//!
//! - **URL validation**: provider base URLs must be HTTPS (except loopback)
//! - **Text processing**: width-aware truncation and caption sanitizing for
//!   terminal output

mod text;
mod url_validator;

pub use text::{display_width, sanitize_line, truncate_to_width};
pub use url_validator::{validate_base_url, UrlValidationError};
