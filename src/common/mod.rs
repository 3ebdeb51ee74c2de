pub mod auth;
pub mod commands;
pub mod config;
pub mod logger;
pub mod observer;
pub mod utils;
