pub mod capture_hardware;
pub mod device_provider;
pub mod engine_delegate;
pub mod preference_store;
