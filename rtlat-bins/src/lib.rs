//! Binaries for the round-trip latency benchmark

pub mod common;
