pub mod catalog;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod tools;
pub mod utils;

pub mod router;

pub use config::{Settings, SettingsHandle};
pub use state::AppState;
