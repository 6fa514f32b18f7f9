//! Registry authentication

pub mod registry;
