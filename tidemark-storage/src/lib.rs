//! Tidemark Storage - Graph, Invalidation and Store Adapters
//!
//! Declares which entities depend on which, turns entity changes into
//! batched, cascading invalidations against a reactive query store, and
//! provides in-memory and LMDB adapters for the store seams.

pub mod cache;
pub mod dependency_graph;
pub mod invalidation;

pub use cache::{
    InMemoryDurableStore, InMemoryQueryStore, LmdbDurableStore, LmdbStoreError, QueryEntry,
};
pub use dependency_graph::{DependencyGraph, EntityNode, DEFAULT_PREFETCH_DEPTH};
pub use invalidation::{dedupe_batch, EngineState, InvalidationEngine};
