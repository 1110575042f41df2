//! Database models.

pub mod simple_option;

pub use simple_option::SimpleOption;
