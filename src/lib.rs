// src/lib.rs
pub mod config;
pub mod errors;
pub mod models;
pub mod normalizer;
pub mod poller;
pub mod client;
pub mod assessment;
pub mod payment;
pub mod pending;
pub mod banner;
pub mod api;
