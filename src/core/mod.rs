pub mod api;
pub mod config;
pub mod model;
pub mod monitor;
pub mod offhours;
pub mod params;
pub mod preferences;
pub mod terminal;
