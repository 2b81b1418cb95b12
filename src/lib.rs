pub mod aws;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod freeze;
pub mod hdb;
pub mod process;
pub mod remote;
pub mod session;
pub mod version;
pub mod volumes;
pub mod waiter;
