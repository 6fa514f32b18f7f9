//! Process lifecycle

pub mod run;
