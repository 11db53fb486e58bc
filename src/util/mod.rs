//! Cross-cutting utility functions shared by the source and scheduler layers.
//!
//! Submodules:
//! - [`file_status`] — file-type queries (`is_reg_file`, `is_directory`)
//! - [`file_size`]   — file size queries (`get_file_size`, `get_open_file_size`)

pub mod file_size;
pub mod file_status;

pub use file_size::{get_file_size, get_open_file_size};
pub use file_status::{is_directory, is_reg_file};
