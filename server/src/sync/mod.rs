//! Synchronization primitives

pub mod keyed;
