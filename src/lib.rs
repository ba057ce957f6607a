pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod contributors;
pub mod error;
pub mod external;
pub mod graphql;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod owners;
pub mod search;
pub mod store;
pub mod token_pool;
