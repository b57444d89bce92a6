// cloudfs-lib: cloud storage connections behind one virtual filesystem

pub mod auth;
pub mod cli;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod errors;
pub mod fileops;
pub mod http_client;
pub mod logger;
pub mod output;
pub mod platform;
pub mod vfs;
