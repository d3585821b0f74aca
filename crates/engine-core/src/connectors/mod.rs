pub mod fetcher;
pub mod http;
pub mod json;
pub mod query;
pub mod sink;
pub mod splitter;
pub mod total_pages;
