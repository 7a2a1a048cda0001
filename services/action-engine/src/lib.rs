//! Execution core of the declarative backend engine.
//!
//! [`ActionOrchestrator`] takes a model name, an action and a payload, picks
//! the action's state graph and walks it with the [`StateMachine`]. Task
//! states call into the [`TaskRegistry`]; the `database.*` tasks turn caller
//! filters, scopes and relationship paths into canonical operations through
//! the [`QueryEngine`] and hand them to a [`shared::db::DatabaseOperator`].

pub mod action;
pub mod choice;
pub mod context;
pub mod database;
pub mod expander;
pub mod filter;
pub mod graphs;
pub mod model;
pub mod orchestrator;
pub mod query;
pub mod relationship;
pub mod resolver;
pub mod state_machine;
pub mod tasks;
pub mod validation;

pub use action::Action;
pub use context::ExecutionContext;
pub use model::{ModelDefinition, ModelRegistry, ModelSpec};
pub use orchestrator::ActionOrchestrator;
pub use query::{QueryEngine, SelectRequest};
pub use state_machine::{StateFlowPacket, StateGraph, StateMachine};
pub use tasks::{FnTask, TaskHandler, TaskRegistry};
