pub mod api;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod storage;
pub mod tracking;
