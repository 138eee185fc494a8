pub mod device_discovery;
