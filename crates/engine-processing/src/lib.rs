pub mod batcher;
pub mod collector;
pub mod error;
