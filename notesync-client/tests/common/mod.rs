//! Shared integration test helpers.

#![allow(dead_code)]

mod fixtures;
mod relay;

pub use fixtures::{wait_for, wait_for_state, RecordingStore, RecordingSurface, Write};
pub use relay::RelayHarness;
