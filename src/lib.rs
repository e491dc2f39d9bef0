pub mod server;
pub mod config;
pub mod error;
pub mod roles;
pub mod directory;
pub mod token;
pub mod accounts;
pub mod inventory;
