//! Server configuration

pub mod secret;
pub mod settings;

pub use secret::SecretValue;
pub use settings::Settings;
