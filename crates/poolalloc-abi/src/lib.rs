// All extern "C" ABI exports accept raw pointers from C callers; each one
// documents its own contract at the point of inline unsafe use instead of
// repeating it in a function-level safety section.
#![allow(clippy::missing_safety_doc)]
//! # poolalloc-abi
//!
//! `extern "C"` boundary layer over [`poolalloc_core`].
//!
//! This crate produces a `cdylib` exposing `malloc`, `calloc`, `realloc`,
//! `free`, and `show_alloc_mem` as C symbols backed by one process-wide
//! [`poolalloc_core::Allocator`]. Each export does argument translation only;
//! all allocator logic lives in `poolalloc-core`.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> poolalloc_core::Allocator -> return
//! ```
//!
//! The malloc-family modules are gated behind `cfg(not(test))`: their
//! `#[no_mangle]` symbols would shadow the system allocator inside a test
//! binary, which allocates before `main` ever runs and recurses infinitely
//! into itself.

#[macro_use]
mod macros;

#[cfg(not(test))]
pub mod malloc_abi;

/// The process-wide allocator instance every exported symbol delegates to.
///
/// `const fn`-constructed so it is valid the instant the C runtime starts
/// calling `malloc`, before any Rust initializer would otherwise run.
pub static GLOBAL: poolalloc_core::Allocator = poolalloc_core::Allocator::new();
