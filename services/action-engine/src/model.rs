//! Model definitions and the registry that holds them once loaded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::dto::{FilterCondition, FilterGroup, FilterOp, DELETED_AT};
use shared::error::{AppError, Result};
use shared::utils::{pluralize, singularize};
use strum_macros::{Display, EnumString};
use tracing::info;

use crate::filter;
use crate::relationship::{Relationship, RelationshipSpec};
use crate::state_machine::StateGraph;

/// Named filter fragments, keyed by scope name.
pub type ScopeTable = BTreeMap<String, FilterGroup>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttributeType {
    String,
    Text,
    Uuid,
    Date,
    Datetime,
    Integer,
    Number,
    Boolean,
    Json,
    Array,
}

impl AttributeType {
    /// Whether a JSON value fits this attribute. Null fits every type.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            AttributeType::String
            | AttributeType::Text
            | AttributeType::Uuid
            | AttributeType::Date
            | AttributeType::Datetime => value.is_string(),
            AttributeType::Integer => value.is_i64() || value.is_u64(),
            AttributeType::Number => value.is_number(),
            AttributeType::Boolean => value.is_boolean(),
            AttributeType::Array => value.is_array(),
            AttributeType::Json => true,
        }
    }
}

/// Configuration as written; every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigSpec {
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub singular: Option<String>,
    #[serde(default)]
    pub plural: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub primary_key: String,
    pub table: String,
    pub connection: Option<String>,
    pub soft_delete: bool,
    pub timestamps: bool,
    pub singular: String,
    pub plural: String,
}

impl ModelConfig {
    fn from_spec(name: &str, spec: &ModelConfigSpec) -> Self {
        let snake = name.to_case(Case::Snake);
        let singular = spec.singular.clone().unwrap_or_else(|| singularize(&snake));
        let plural = spec.plural.clone().unwrap_or_else(|| pluralize(&singular));
        Self {
            primary_key: spec.primary_key.clone().unwrap_or_else(|| "id".into()),
            table: spec.table.clone().unwrap_or_else(|| plural.clone()),
            connection: spec.connection.clone(),
            soft_delete: spec.soft_delete,
            timestamps: spec.timestamps,
            singular,
            plural,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewSpec {
    #[serde(default)]
    pub scopes: BTreeMap<String, Value>,
}

/// Declarative model specification, as loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub schema: BTreeMap<String, AttributeType>,
    #[serde(default)]
    pub config: ModelConfigSpec,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipSpec>,
    #[serde(default)]
    pub scopes: BTreeMap<String, Value>,
    #[serde(default)]
    pub views: BTreeMap<String, ViewSpec>,
    /// Custom actions, each a state graph.
    #[serde(default)]
    pub actions: BTreeMap<String, StateGraph>,
}

#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub name: String,
    pub schema: BTreeMap<String, AttributeType>,
    pub config: ModelConfig,
    pub relationships: BTreeMap<String, Relationship>,
    pub scopes: ScopeTable,
    pub views: BTreeMap<String, ScopeTable>,
    pub actions: BTreeMap<String, StateGraph>,
}

impl ModelDefinition {
    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn primary_key(&self) -> &str {
        &self.config.primary_key
    }

    pub fn relationship(&self, name: &str) -> Result<&Relationship> {
        self.relationships
            .get(name)
            .ok_or_else(|| AppError::UnknownRelationship {
                model: self.name.clone(),
                relationship: name.to_string(),
            })
    }

    pub fn view(&self, name: &str) -> Result<&ScopeTable> {
        self.views.get(name).ok_or_else(|| AppError::UnknownView {
            model: self.name.clone(),
            view: name.to_string(),
        })
    }

    /// Adds the soft-delete exclusion to `filters` when the model uses soft
    /// deletes.
    pub fn guard(&self, filters: Option<FilterGroup>) -> Option<FilterGroup> {
        match filters {
            Some(group) => Some(self.guard_group(group)),
            None if self.config.soft_delete => Some(live_rows()),
            None => None,
        }
    }

    pub fn guard_group(&self, group: FilterGroup) -> FilterGroup {
        if self.config.soft_delete {
            FilterGroup::and(vec![group.into(), live_rows().into()])
        } else {
            group
        }
    }

    /// Read-only view handed to state graphs under `$$`.
    pub fn context_document(&self, action: &str) -> Value {
        json!({
            "model": self.name,
            "action": action,
            "config": self.config,
            "schema": self.schema,
        })
    }
}

fn live_rows() -> FilterGroup {
    FilterGroup::and(vec![
        FilterCondition::new(DELETED_AT, FilterOp::IsEmpty, Value::Null).into(),
    ])
}

fn parse_scopes(model: &str, raw: &BTreeMap<String, Value>) -> Result<ScopeTable> {
    raw.iter()
        .map(|(name, fragment)| {
            let normalized = filter::normalize(fragment)?;
            let group = filter::validate(&normalized).map_err(|e| match e {
                AppError::Validation { field, message } => AppError::validation(
                    format!("{model}.scopes.{name}.{field}"),
                    message,
                ),
                other => other,
            })?;
            Ok((name.clone(), group))
        })
        .collect()
}

/// All model definitions, immutable once built.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelDefinition>>,
}

impl ModelRegistry {
    /// Builds every model, deriving relationship keys against the related
    /// models' primary keys. A relationship naming a model that is not part
    /// of `specs` is rejected.
    pub fn from_specs(specs: Vec<ModelSpec>) -> Result<Self> {
        let configs: HashMap<String, ModelConfig> = specs
            .iter()
            .map(|s| (s.name.clone(), ModelConfig::from_spec(&s.name, &s.config)))
            .collect();

        let mut models = HashMap::with_capacity(specs.len());
        for spec in specs {
            let config = configs[&spec.name].clone();

            let mut relationships = BTreeMap::new();
            for (rel_name, rel_spec) in &spec.relationships {
                let related = configs
                    .get(&rel_spec.model)
                    .ok_or_else(|| AppError::UnknownModel(rel_spec.model.clone()))?;
                relationships.insert(
                    rel_name.clone(),
                    Relationship::from_spec(
                        rel_name,
                        &spec.name,
                        &config.primary_key,
                        &related.primary_key,
                        rel_spec,
                    ),
                );
            }

            let scopes = parse_scopes(&spec.name, &spec.scopes)?;
            let views = spec
                .views
                .iter()
                .map(|(view, v)| Ok((view.clone(), parse_scopes(&spec.name, &v.scopes)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;

            info!(
                model = %spec.name,
                table = %config.table,
                relationships = relationships.len(),
                scopes = scopes.len(),
                "model loaded"
            );
            let definition = ModelDefinition {
                name: spec.name.clone(),
                schema: spec.schema,
                config,
                relationships,
                scopes,
                views,
                actions: spec.actions,
            };
            models.insert(spec.name, Arc::new(definition));
        }
        Ok(Self { models })
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let specs: Vec<ModelSpec> = serde_json::from_value(value)
            .map_err(|e| AppError::validation("models", e.to_string()))?;
        Self::from_specs(specs)
    }

    pub fn get(&self, name: &str) -> Result<Arc<ModelDefinition>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownModel(name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDefinition>> {
        self.models.values()
    }
}
