pub mod auth;
pub mod config;
pub mod engine;
pub mod formatter;
pub mod history;
pub mod models;
pub mod notify;
pub mod process;
pub mod providers;
