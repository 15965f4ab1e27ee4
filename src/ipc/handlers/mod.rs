pub mod attendance;
pub mod builder;
pub mod catalog;
pub mod core;
pub mod setup;
