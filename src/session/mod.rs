//! Run-level orchestration: configuration, scene selection, and per-movie reporting.
//!
//! A [`run::MovieSession`] renders one movie per selected (scene, channel) pair and collects a
//! [`run::SceneResult`] for each; a failed movie never prevents the others from being written.

/// Serializable run and pipeline configuration.
pub mod config;
/// Session driver and run report.
pub mod run;
