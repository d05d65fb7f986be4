pub mod assemble;
pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod openai_types;
pub mod routes;
pub mod transcode;
pub mod validate;
