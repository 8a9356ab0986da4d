//! Mod manager core for Hollow Knight: catalog cache, verified installs,
//! installed-mods ledger, packs, assembly switching and launch.

pub mod assembly;
pub mod catalog;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod installer;
pub mod launch;
pub mod ledger;
pub mod library;
pub mod manager;
pub mod modlinks;
pub mod packs;
pub mod payload;
pub mod reconcile;
pub mod store;

pub use error::{Error, Result};
pub use manager::ModManager;
