//! Runs batch jobs on LSF clusters and streams their output back to the
//! terminal.
//!
//! The heavy lifting happens in [`lsfrun_engine`]; this crate supplies the
//! configuration, the store of files sent along with every job, and the
//! command line front end.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod commands;
pub mod config;
pub mod console;
pub mod uploads;
