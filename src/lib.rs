//! Arena-backed memory core: a lock-free bump allocator and the
//! grow-only sequences built on top of it.
//!
//! # Scope
//!
//! This crate hosts the allocation machinery for index-building
//! workloads that create many small objects with one coarse lifetime:
//! allocate freely while building, read the result, reclaim everything
//! in one sweep. There is no per-object free, and no destructor runs at
//! reclamation; the element types are constrained so that nothing can
//! rely on one.
//!
//! # Design themes
//!
//! - Coarse lifetimes: [`ArenaPool::rewind`] is the only deallocation.
//! - Lock-free hot paths: allocation and append retry only on
//!   compare-exchange contention; iteration is wait-free.
//! - Structural safety: sequences borrow the pool, so the borrow checker
//!   rejects rewinding while anything built on the pool is still alive.
//!
//! # Module map
//!
//! - [`pool`]: thread-safe chunk-stack bump allocator with bulk rewind.
//! - [`append_vec`]: generic grow-only sequence of `Copy` elements.
//! - [`varint`]: little-endian base-128 codec for `u32`.
//! - [`varint_vec`]: grow-only `u32` sequence stored as varint bytes.
//!
//! # Safety
//!
//! The pool and both sequences use `unsafe` internally and rely on
//! invariants called out in their module docs. Read those before
//! extending the internals.

pub mod append_vec;
pub mod pool;
pub mod varint;
pub mod varint_vec;

pub use append_vec::AppendVec;
pub use pool::{ArenaError, ArenaPool};
pub use varint_vec::VarintVec;
