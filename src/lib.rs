pub mod config;
pub mod digest;
pub mod enrichment;
pub mod errors;
pub mod feed;
pub mod logging;
pub mod pipeline;
pub mod scoring;
pub mod store;
