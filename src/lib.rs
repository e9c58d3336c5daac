pub mod batch;
pub mod cli;
pub mod config;
pub mod remote;

pub use cli::run;
