//! Utility functions.

pub mod html;

pub use html::user_mention;
