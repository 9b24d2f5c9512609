pub mod config;
pub mod error;
pub mod fs;
pub mod shutdown;
pub mod tree;
