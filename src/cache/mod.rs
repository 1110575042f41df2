//! Cache module - named caches backed by Moka.
//!
//! - `CacheRegistry` - central registry holding all named caches
//! - `TypedCache` - typed, clone-cheap handle to one cache
//! - `CacheConfig` - capacity and expiry settings
//!
//! Repositories ask the registry for their cache by name, so two
//! repositories built from the same registry share entries.

mod config;
mod registry;
mod typed;

pub use config::CacheConfig;
pub use registry::CacheRegistry;
pub use typed::TypedCache;
