//! API implementation submodules.
//!
//! Each submodule contains `impl ShiftApi` blocks that extend the public API
//! with domain-specific methods. The struct definition remains in `lib.rs`.

mod analysis;
mod builder;
mod migration;
mod repair;

pub use builder::ShiftApiBuilder;
