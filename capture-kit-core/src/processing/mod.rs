pub mod level_meter;
pub mod monitor;
pub mod pcm;
pub mod pipeline;
pub mod spectrum;
