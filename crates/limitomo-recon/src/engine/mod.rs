//! Engine implementations behind the [`limitomo_core::TomographyEngine`]
//! seam.
//!
//! The CPU engine is an in-process reference implementation with the same
//! ref-table ownership semantics a device-backed engine would have: callers
//! only ever hold opaque refs, and every object lives in the engine's table
//! until released.

pub mod cpu;

pub use cpu::CpuEngine;
