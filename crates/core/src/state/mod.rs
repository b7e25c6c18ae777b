pub mod db;
pub mod run_status;

pub use db::RunDb;
pub use run_status::{RunRecord, RunStatus, RunStatusStore, SqliteRunStatusStore};
