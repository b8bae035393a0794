// Real-time ride location tracking client

pub mod config;
pub mod error;
pub mod feed;
pub mod net;
pub mod normalizer;
pub mod tracker;
