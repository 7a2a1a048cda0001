//! Re-exports the pieces shared by the action engine and any database
//! operator: configuration handling, error types, the canonical operation
//! wire shapes, the operator contract and naming helpers.

pub mod config;
pub mod db;
pub mod dto;
pub mod error;
pub mod predicate;
pub mod utils;
