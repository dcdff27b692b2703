//! Placement agent: hosts one placement engine behind a small HTTP surface

pub mod api;
pub mod config;
