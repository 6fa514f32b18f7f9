//! Storm control plane library
//!
//! Builds uploaded executables into container images and reconciles them
//! into cluster services.

pub mod app;
pub mod authn;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod filesys;
pub mod image;
pub mod logs;
pub mod models;
pub mod server;
pub mod sync;
pub mod utils;
