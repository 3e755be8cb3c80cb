// Library exports for testing and modular access

pub mod api;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod jobs;
pub mod keycloak;
pub mod models;
pub mod sync;
