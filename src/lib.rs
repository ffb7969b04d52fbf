pub mod alerts;
pub mod api;
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod retention;
pub mod sensors;
pub mod status;
pub mod store;
pub mod window;
