//! Patient records service: the REST API over the `patients` table and the
//! checkpointed tooling that moves those records between databases.

pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod http;
pub mod migrator;
pub mod models;
pub mod patient;
pub mod seed;
pub mod state;
pub mod telemetry;
