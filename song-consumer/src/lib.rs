pub mod aggregate;
pub mod app_context;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod metrics_consts;
pub mod sink;
pub mod source;
pub mod store;
pub mod test_utils;
pub mod types;
pub mod validator;
