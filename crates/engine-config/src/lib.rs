pub mod env;
pub mod error;
pub mod job;
pub mod settings;
