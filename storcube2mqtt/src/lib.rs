// externally visible interfaces
pub mod codec;
pub mod error;
pub mod link;
pub mod metric_collector;
pub mod metrics;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod rest;
pub mod session;
pub mod simple_mqtt;
pub mod status_mqtt;
pub mod value_cache;
