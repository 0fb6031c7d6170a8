//! World Kernel: world parameters and the authoritative entity table.
//!
//! # Invariants
//! - All entity mutations flow through explicit operations and are logged.
//! - Iteration order is deterministic (BTreeMap).

pub mod world;

pub use world::{EntityData, World, WorldEvent, WorldParams, splitmix64};
