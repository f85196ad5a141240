//! Mod management core for Project DIVA Mega Mix+ running DivaModLoader:
//! remote mod databases (origins) with process-lifetime metadata caches,
//! archive installs with staged extraction, load-priority bookkeeping, loader
//! install/upgrade, and save-data backups.

pub mod api;
pub mod backup;
pub mod cli;
pub mod config;
pub mod divamod;
pub mod divamodarchive;
pub mod error;
pub mod extract;
pub mod game;
pub mod gamebanana;
pub mod loader;
pub mod manager;

#[cfg(test)]
mod testutil;
