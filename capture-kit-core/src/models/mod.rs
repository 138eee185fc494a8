pub mod analysis;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod sample_buffer;
pub mod status;
