pub mod cache;
pub mod config;
mod config_env;
pub mod conversation;
pub mod engine;
pub mod llm;
pub mod models;
pub mod repos;
pub mod service;
pub mod tenant;
