pub mod api;
pub mod cleanup;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod registry;
pub mod sandbox;
pub mod shutdown;
pub mod sweeper;
pub mod template;
