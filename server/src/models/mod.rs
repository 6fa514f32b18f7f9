//! Domain models

pub mod app;

pub use app::AppName;
