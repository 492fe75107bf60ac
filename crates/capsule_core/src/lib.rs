pub mod capsule_api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod message;
pub mod model;
pub mod reminder;
pub mod storage;
pub mod sweep;
