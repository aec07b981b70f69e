//! Supabase Project Backup/Restore Tool
//!
//! Backs up and restores a project's database, storage objects and edge
//! functions between Supabase projects.

// storagetool/src/lib.rs
pub mod archive;
pub mod backup;
pub mod config;
pub mod database;
pub mod errors;
pub mod functions;
pub mod restore;
pub mod storage;
pub mod utils;
