//! Turns caller select requests into canonical select operations and runs
//! them: filters and scopes are normalized and merged, relationship paths are
//! pushed down into `in` conditions, the soft-delete guard is added, and
//! after the operator answers, requested expand paths are attached.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::config::Settings;
use shared::db::DatabaseOperator;
use shared::dto::{DatabaseOperation, FilterGroup, Pagination, SelectOperation, SelectResponse, Sort};
use shared::error::{AppError, Result};
use tracing::debug;

use crate::expander::RelationshipExpander;
use crate::filter::{self, ScopeResolver};
use crate::model::{ModelDefinition, ModelRegistry};
use crate::resolver::RelationshipResolver;

/// Pagination as callers send it; `per_page` falls back to the configured
/// default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    /// Any accepted filter shape; normalized when the operation is built.
    #[serde(default)]
    pub filters: Value,
    #[serde(default)]
    pub scopes: Option<Value>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub pagination: Option<PageRequest>,
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
    #[serde(default)]
    pub expand: Vec<String>,
    /// Relationship names to join.
    #[serde(default)]
    pub joins: Vec<String>,
    /// View whose scope table backs up bare scope names.
    #[serde(default)]
    pub view: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
}

impl SelectRequest {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| AppError::validation("request", e.to_string()))
    }
}

#[derive(Clone)]
pub struct QueryEngine {
    pub(crate) registry: Arc<ModelRegistry>,
    pub(crate) operator: Arc<dyn DatabaseOperator>,
    pub(crate) settings: Arc<Settings>,
}

impl QueryEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        operator: Arc<dyn DatabaseOperator>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            registry,
            operator,
            settings,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Normalizes, resolves and guards `filters` for `model`, issuing the
    /// push-down subqueries relationship paths need.
    pub async fn resolve_filters(
        &self,
        model: &ModelDefinition,
        filters: Option<FilterGroup>,
    ) -> Result<Option<FilterGroup>> {
        let resolved = match filters {
            Some(group) => Some(RelationshipResolver::new(self).resolve(model, group).await?),
            None => None,
        };
        Ok(model.guard(resolved))
    }

    /// Same as [`resolve_filters`](Self::resolve_filters) for a tree that is
    /// known to exist, as update and delete conditions are.
    pub async fn resolve_conditions(
        &self,
        model: &ModelDefinition,
        conditions: FilterGroup,
    ) -> Result<FilterGroup> {
        let resolved = RelationshipResolver::new(self).resolve(model, conditions).await?;
        Ok(model.guard_group(resolved))
    }

    pub async fn build_select(
        &self,
        model: &ModelDefinition,
        request: &SelectRequest,
    ) -> Result<SelectOperation> {
        let filters = filter::parse(&request.filters)?;

        let scoped = match &request.scopes {
            Some(reference) => {
                let view = request
                    .view
                    .as_deref()
                    .map(|name| model.view(name))
                    .transpose()?;
                Some(ScopeResolver::new(&self.registry).resolve(model, reference, view)?)
            }
            None => None,
        };

        let filters = self
            .resolve_filters(model, FilterGroup::conjoin(filters, scoped))
            .await?;

        for path in &request.expand {
            self.check_expand_path(model, path)?;
        }

        let joins = request
            .joins
            .iter()
            .map(|name| {
                let relationship = model.relationship(name)?;
                let related = self.registry.get(relationship.related())?;
                Ok(relationship.join(model.table(), related.table()))
            })
            .collect::<Result<Vec<_>>>()?;

        let pagination = request.pagination.as_ref().map(|p| Pagination {
            page: Some(p.page.unwrap_or(1)),
            per_page: p.per_page.unwrap_or(self.settings.default_per_page),
            cursor: p.cursor.clone(),
        });

        // Expansion matches on the first hop's key, so a projection has to
        // keep that column.
        let attributes = request.attributes.clone().map(|mut attributes| {
            for path in &request.expand {
                let head = path.split('.').next().unwrap_or(path);
                if let Ok(relationship) = model.relationship(head) {
                    let source = relationship.key_mapping().source.to_string();
                    if !attributes.contains(&source) {
                        attributes.push(source);
                    }
                }
            }
            attributes
        });

        Ok(SelectOperation {
            table: model.table().to_string(),
            model_name: model.name.clone(),
            purpose: request.purpose.clone(),
            filters,
            sorts: request.sorts.clone(),
            pagination,
            attributes,
            expand: request.expand.clone(),
            joins,
            scopes: request.scopes.clone(),
        })
    }

    fn check_expand_path(&self, model: &ModelDefinition, path: &str) -> Result<()> {
        let hops: Vec<&str> = path.split('.').collect();
        if hops.iter().any(|h| h.is_empty()) {
            return Err(AppError::validation("expand", format!("malformed path `{path}`")));
        }
        if hops.len() > self.settings.max_expand_depth {
            return Err(AppError::validation(
                "expand",
                format!(
                    "path `{path}` has {} hops, at most {} allowed",
                    hops.len(),
                    self.settings.max_expand_depth
                ),
            ));
        }
        let mut current = self.registry.get(&model.name)?;
        for hop in hops {
            let related = current.relationship(hop)?.related().to_string();
            current = self.registry.get(&related)?;
        }
        Ok(())
    }

    /// Sends one select to the operator and expands the result with the
    /// paths echoed back in the response.
    pub fn execute_select(
        &self,
        model: Arc<ModelDefinition>,
        operation: SelectOperation,
    ) -> BoxFuture<'_, Result<SelectResponse>> {
        async move {
            debug!(
                model = %model.name,
                purpose = operation.purpose.as_deref().unwrap_or("select"),
                "select"
            );
            let response = self
                .operator
                .execute(DatabaseOperation::Select(operation))
                .await?
                .into_select()?;
            if response.operation.expand.is_empty() {
                return Ok(response);
            }
            let expand = response.operation.expand.clone();
            let result = RelationshipExpander::new(self)
                .expand(&model, response.result, &expand)
                .await?;
            Ok(SelectResponse { result, ..response })
        }
        .boxed()
    }

    pub async fn select(&self, model: &str, request: &SelectRequest) -> Result<SelectResponse> {
        let model = self.registry.get(model)?;
        let operation = self.build_select(&model, request).await?;
        self.execute_select(model, operation).await
    }
}
