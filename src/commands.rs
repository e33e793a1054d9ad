//! Implementation of the command line commands.

pub mod config;
pub mod run;
pub mod uploads;
