pub mod manager;
pub mod registry;
pub mod transaction;
