//! OpenRadio service: browse tree, play queue and playback session of an
//! internet radio player, driven by a single-owner event loop.

pub mod backup;
pub mod commands;
pub mod core;
pub mod engine;
pub mod error;
pub mod focus;
pub mod handle;
pub mod http;
pub mod logging;
pub mod metadata;
pub mod provider;
pub mod queue;
pub mod recovery;
pub mod session;
pub mod socket;
pub mod storage;
pub mod worker;
