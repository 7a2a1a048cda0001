//! Relationship metadata: which model a relationship points at and which
//! columns tie the two sides together.

use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};
use shared::dto::{Join, JoinCondition, JoinType};
use shared::utils::singularize;
use strum_macros::{Display, EnumString};

/// Declared variant of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
    HasOne,
}

/// Relationship as written in a model specification; unset keys are derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSpec {
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    /// Name of the related model.
    pub model: String,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub owner_key: Option<String>,
    #[serde(default)]
    pub local_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Relationship {
    /// The current model holds `foreign_key`, pointing at `owner_key` on the
    /// related model.
    BelongsTo {
        name: String,
        model: String,
        related: String,
        foreign_key: String,
        owner_key: String,
    },
    /// The related model holds `foreign_key`, pointing at `local_key` here.
    HasMany {
        name: String,
        model: String,
        related: String,
        foreign_key: String,
        local_key: String,
    },
    HasOne {
        name: String,
        model: String,
        related: String,
        foreign_key: String,
        local_key: String,
    },
}

/// Column pair joining the current model (`source`) to the related model
/// (`target`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMapping<'a> {
    pub source: &'a str,
    pub target: &'a str,
}

/// `author` → `author_id`, `comments` → `comment_id`.
pub fn derive_foreign_key(name: &str) -> String {
    format!("{}_id", singularize(&name.to_case(Case::Snake)))
}

impl Relationship {
    /// Builds a relationship owned by `model`, filling unset keys: a
    /// belongs-to foreign key derives from the relationship name, a
    /// has-many/has-one foreign key from the owning model's name, and the
    /// remaining key defaults to the relevant primary key.
    pub fn from_spec(
        name: &str,
        model: &str,
        model_primary_key: &str,
        related_primary_key: &str,
        spec: &RelationshipSpec,
    ) -> Self {
        let name = name.to_string();
        let owner = model.to_string();
        let related = spec.model.clone();
        match spec.kind {
            RelationshipKind::BelongsTo => Relationship::BelongsTo {
                foreign_key: spec
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| derive_foreign_key(&name)),
                owner_key: spec
                    .owner_key
                    .clone()
                    .unwrap_or_else(|| related_primary_key.to_string()),
                name,
                model: owner,
                related,
            },
            RelationshipKind::HasMany | RelationshipKind::HasOne => {
                let foreign_key = spec
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| derive_foreign_key(model));
                let local_key = spec
                    .local_key
                    .clone()
                    .unwrap_or_else(|| model_primary_key.to_string());
                if spec.kind == RelationshipKind::HasMany {
                    Relationship::HasMany {
                        name,
                        model: owner,
                        related,
                        foreign_key,
                        local_key,
                    }
                } else {
                    Relationship::HasOne {
                        name,
                        model: owner,
                        related,
                        foreign_key,
                        local_key,
                    }
                }
            }
        }
    }

    pub fn kind(&self) -> RelationshipKind {
        match self {
            Relationship::BelongsTo { .. } => RelationshipKind::BelongsTo,
            Relationship::HasMany { .. } => RelationshipKind::HasMany,
            Relationship::HasOne { .. } => RelationshipKind::HasOne,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Relationship::BelongsTo { name, .. }
            | Relationship::HasMany { name, .. }
            | Relationship::HasOne { name, .. } => name,
        }
    }

    /// Name of the model that declares this relationship.
    pub fn model(&self) -> &str {
        match self {
            Relationship::BelongsTo { model, .. }
            | Relationship::HasMany { model, .. }
            | Relationship::HasOne { model, .. } => model,
        }
    }

    pub fn related(&self) -> &str {
        match self {
            Relationship::BelongsTo { related, .. }
            | Relationship::HasMany { related, .. }
            | Relationship::HasOne { related, .. } => related,
        }
    }

    pub fn key_mapping(&self) -> KeyMapping<'_> {
        match self {
            Relationship::BelongsTo {
                foreign_key,
                owner_key,
                ..
            } => KeyMapping {
                source: foreign_key,
                target: owner_key,
            },
            Relationship::HasMany {
                foreign_key,
                local_key,
                ..
            }
            | Relationship::HasOne {
                foreign_key,
                local_key,
                ..
            } => KeyMapping {
                source: local_key,
                target: foreign_key,
            },
        }
    }

    /// Whether the relationship attaches a list rather than a single row.
    pub fn is_collection(&self) -> bool {
        matches!(self, Relationship::HasMany { .. })
    }

    pub fn join(&self, table: &str, related_table: &str) -> Join {
        let keys = self.key_mapping();
        Join {
            table: related_table.to_string(),
            join_type: JoinType::Left,
            conditions: vec![JoinCondition {
                left: format!("{table}.{}", keys.source),
                right: format!("{related_table}.{}", keys.target),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: RelationshipKind, model: &str) -> RelationshipSpec {
        RelationshipSpec {
            kind,
            model: model.into(),
            foreign_key: None,
            owner_key: None,
            local_key: None,
        }
    }

    #[test]
    fn belongs_to_derives_keys() {
        let rel = Relationship::from_spec(
            "author",
            "post",
            "id",
            "user_id",
            &spec(RelationshipKind::BelongsTo, "user"),
        );
        assert_eq!(
            rel.key_mapping(),
            KeyMapping {
                source: "author_id",
                target: "user_id"
            }
        );
        assert!(!rel.is_collection());
    }

    #[test]
    fn has_many_derives_keys_from_owner() {
        let rel = Relationship::from_spec(
            "comments",
            "post",
            "id",
            "id",
            &spec(RelationshipKind::HasMany, "comment"),
        );
        assert_eq!(rel.kind(), RelationshipKind::HasMany);
        assert_eq!(
            rel.key_mapping(),
            KeyMapping {
                source: "id",
                target: "post_id"
            }
        );
        assert!(rel.is_collection());
    }

    #[test]
    fn explicit_keys_win() {
        let mut s = spec(RelationshipKind::HasOne, "profile");
        s.foreign_key = Some("owner".into());
        s.local_key = Some("uuid".into());
        let rel = Relationship::from_spec("profile", "user", "id", "id", &s);
        assert_eq!(
            rel.key_mapping(),
            KeyMapping {
                source: "uuid",
                target: "owner"
            }
        );
    }

    #[test]
    fn foreign_key_derivation_is_total() {
        assert_eq!(derive_foreign_key("comments"), "comment_id");
        assert_eq!(derive_foreign_key("BlogPost"), "blog_post_id");
        assert_eq!(derive_foreign_key("statuses"), "status_id");
        assert_eq!(derive_foreign_key("s"), "s_id");
    }

    #[test]
    fn join_columns() {
        let rel = Relationship::from_spec(
            "author",
            "post",
            "id",
            "id",
            &spec(RelationshipKind::BelongsTo, "user"),
        );
        let join = rel.join("posts", "users");
        assert_eq!(join.table, "users");
        assert_eq!(join.conditions[0].left, "posts.author_id");
        assert_eq!(join.conditions[0].right, "users.id");
    }

    #[test]
    fn kind_parses_from_wire_name() {
        assert_eq!("hasMany".parse::<RelationshipKind>().unwrap(), RelationshipKind::HasMany);
        let s: RelationshipSpec =
            serde_json::from_value(serde_json::json!({"type": "belongsTo", "model": "user"})).unwrap();
        assert_eq!(s.kind, RelationshipKind::BelongsTo);
    }
}
