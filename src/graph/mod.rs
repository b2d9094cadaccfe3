//! Linked-data graph boundary
//!
//! The dispatch loop reaches the resource graph only through [`GraphClient`].
//! [`MemoryGraph`] is an in-process implementation used for replays and tests.

mod client;
mod memory;

pub use client::{Attributes, FindFilter, GraphClient, GraphError, Relation};
pub use memory::{GraphResource, GraphSnapshot, MemoryGraph, DEFAULT_NAMESPACE};
