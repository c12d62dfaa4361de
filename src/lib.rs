pub mod admin;
pub mod config;
pub mod impression;
pub mod plugin;
pub mod providers;
pub mod relay;
pub mod state;
pub mod traits;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

pub use plugin::RapportPlugin;
