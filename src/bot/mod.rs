//! Bot module - Core bot functionality.

pub mod api;
pub mod dispatcher;
mod runtime;
mod webhook;

pub use api::{ChatApi, SentMessage};
pub use dispatcher::build_dispatcher;
pub use runtime::run;
