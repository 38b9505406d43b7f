//! Types shared between the OpenRadio service and its clients: the station
//! model, browse tree ids, the framed wire protocol and configuration.

pub mod config;
pub mod media_id;
pub mod platform;
pub mod protocol;
pub mod station;
