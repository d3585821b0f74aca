pub mod batch;
pub mod raw;
