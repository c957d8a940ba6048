//! evilmsg server library.
//!
//! Project and hit storage, the hit ingestion gate, the on-demand beacon
//! builder and the HTTP API that fronts them.

pub mod api_error;
pub mod builder;
pub mod gate;
pub mod project_id;
pub mod routes;
pub mod storage;
