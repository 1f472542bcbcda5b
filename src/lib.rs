pub mod config;
pub mod crypto;
pub mod fs;
pub mod history;
pub mod import;
pub mod paths;
pub mod query;
pub mod remote;
pub mod sync_core;
