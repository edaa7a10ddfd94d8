pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod session;
pub mod storage;
pub mod trigger;
pub mod txn;
pub mod types;

pub use config::{ConflictPolicy, EngineConfig};
pub use db::{
    CheckExpr, ForeignKeySpec, MergeRow, MergeTemplate, MergeValue, Phase, RowUpdate, TableSpec,
};
pub use engine::Engine;
pub use errors::{ErrorClass, SqlError, classify, sqlstate};
pub use trigger::{TriggerAction, TriggerEvent, TriggerFiring, TriggerLevel};
pub use types::{CellInput, Column, DataType, IdentitySpec, ReferentialAction, Value};
