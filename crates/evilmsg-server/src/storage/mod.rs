//! `SQLite` storage for evilmsg.
//!
//! Provides persistence for projects and the hits their beacons report.

mod db;
mod models;
mod queries_hits;
mod queries_projects;


pub use db::{AppDatabase, DatabaseError, ProjectError};
pub use models::*;
