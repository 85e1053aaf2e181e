//! Distributed execution over TCP.
//!
//! A `timelapse worker` process answers frame requests: each request names the source path,
//! the (scene, channel, time) coordinate and the frame stages, and the worker replies with the
//! normalized frame. Workers and the coordinating process must see the source at the same path.

/// Coordinator side.
pub mod client;
/// Wire format.
pub mod protocol;
/// Worker side.
pub mod worker;
