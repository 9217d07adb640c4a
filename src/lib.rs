pub mod catalog;
pub mod config;
pub mod correlate;
pub mod db;
pub mod domain;
pub mod ingest;
pub mod mqtt;
pub mod publish;
pub mod reports;
pub mod scheduler;
pub mod shift;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod time;

#[cfg(test)]
pub mod test_support;
