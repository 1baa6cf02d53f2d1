pub mod aggregate;
pub mod analyzer;
pub mod config;
pub mod gcp;
pub mod gcs;
pub mod ingest;
pub mod normalize;
pub mod notion;
pub mod report;
pub mod store;
pub mod tickers;
