#![forbid(unsafe_code)]

//! Public entry point for the StreamTrim crate.
//!
//! The library holds the resolve→materialize pipeline; the `backend` binary
//! wraps it in a small HTTP surface and owns the artifact clean-up schedule.

pub mod config;
pub mod error;
pub mod janitor;
pub mod logging;
pub mod materializer;
pub mod media;
pub mod resolver;
pub mod security;
pub mod timecode;
pub mod tools;
pub mod video_id;

#[cfg(test)]
pub(crate) mod testing;
