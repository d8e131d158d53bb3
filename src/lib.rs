pub mod config;
pub mod credential;
pub mod dialect;
pub mod error;
pub mod model_catalog;
pub mod pool;
pub mod quota;
pub mod relay;
pub mod server;
pub mod upstream;
