//! Per-scene frame computation and scheduling.
//!
//! A [`frame::FramePipeline`] describes how to compute each frame of one scene; an
//! [`executor::ExecutionContext`] runs those frame nodes on a local pool or on cluster workers,
//! and [`executor::run_scene`] streams their results into a sink in ascending time order.

/// Scheduling backends and the scene runner.
pub mod executor;
/// Frame type and per-scene frame producer.
pub mod frame;
/// Completion re-ordering.
pub mod reorder;
