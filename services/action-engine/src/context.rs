use std::sync::Arc;

use serde_json::Value;
use shared::config::Settings;
use shared::db::DatabaseOperator;
use shared::utils::lookup_path;

use crate::model::{ModelDefinition, ModelRegistry};
use crate::query::QueryEngine;

/// Read-only context handed to every task of one action run.
#[derive(Clone)]
pub struct ExecutionContext {
    pub model: Arc<ModelDefinition>,
    pub action: String,
    pub registry: Arc<ModelRegistry>,
    pub operator: Arc<dyn DatabaseOperator>,
    pub settings: Arc<Settings>,
    /// `{model, action, config, schema}`, the document Choice rules see as `$$`.
    pub document: Value,
}

impl ExecutionContext {
    pub fn new(
        model: Arc<ModelDefinition>,
        action: impl Into<String>,
        registry: Arc<ModelRegistry>,
        operator: Arc<dyn DatabaseOperator>,
        settings: Arc<Settings>,
    ) -> Self {
        let action = action.into();
        let document = model.context_document(&action);
        Self {
            model,
            action,
            registry,
            operator,
            settings,
            document,
        }
    }

    /// Dotted lookup into the context document, e.g. `config.softDelete`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.document, path)
    }

    pub fn query(&self) -> QueryEngine {
        QueryEngine::new(
            self.registry.clone(),
            self.operator.clone(),
            self.settings.clone(),
        )
    }
}
