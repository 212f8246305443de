//! CLI command implementations.

pub mod init;
pub mod validate;
pub mod run;
pub mod network;
pub mod compare;
