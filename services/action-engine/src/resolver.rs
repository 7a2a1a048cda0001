//! Relationship filter push-down.
//!
//! A leaf such as `comments.author.name is "ada"` on `post` is rewritten
//! hop by hop: the remaining path `author.name is "ada"` is resolved on
//! `comment` (recursing while it still crosses relationships), the matching
//! comment keys are fetched with one select, and the leaf becomes
//! `id in [...]` on `post`.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use shared::dto::{
    DatabaseOperation, FilterCondition, FilterGroup, FilterNode, FilterOp, SelectOperation,
};
use shared::error::Result;
use shared::predicate::distinct_values;
use tracing::debug;

use crate::model::ModelDefinition;
use crate::query::QueryEngine;

pub struct RelationshipResolver<'a> {
    engine: &'a QueryEngine,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(engine: &'a QueryEngine) -> Self {
        Self { engine }
    }

    /// Rewrites every relationship-path leaf of `group`. Leaves on plain
    /// attributes, including dotted paths into a schema attribute, are kept.
    pub fn resolve<'s>(
        &'s self,
        model: &'s ModelDefinition,
        group: FilterGroup,
    ) -> BoxFuture<'s, Result<FilterGroup>> {
        async move {
            let mut conditions = Vec::with_capacity(group.conditions.len());
            for node in group.conditions {
                let node = match node {
                    FilterNode::Group(inner) => FilterNode::Group(self.resolve(model, inner).await?),
                    FilterNode::Condition(leaf) => {
                        FilterNode::Condition(self.resolve_condition(model, leaf).await?)
                    }
                };
                conditions.push(node);
            }
            Ok(FilterGroup {
                op: group.op,
                conditions,
            })
        }
        .boxed()
    }

    async fn resolve_condition(
        &self,
        model: &ModelDefinition,
        leaf: FilterCondition,
    ) -> Result<FilterCondition> {
        let Some((head, rest)) = leaf.attribute.split_once('.') else {
            return Ok(leaf);
        };
        if model.schema.contains_key(head) {
            return Ok(leaf);
        }

        let relationship = model.relationship(head)?;
        let related = self.engine.registry.get(relationship.related())?;
        let keys = relationship.key_mapping();

        let inner = FilterGroup::and(vec![
            FilterCondition::new(rest, leaf.op, leaf.value.clone()).into(),
        ]);
        let inner = self.resolve(&related, inner).await?;

        let operation = SelectOperation {
            table: related.table().to_string(),
            model_name: related.name.clone(),
            purpose: Some("subquery".into()),
            filters: related.guard(Some(inner)),
            attributes: Some(vec![keys.target.to_string()]),
            ..Default::default()
        };
        let rows = self
            .engine
            .operator
            .execute(DatabaseOperation::Select(operation))
            .await?
            .into_rows();

        let values = distinct_values(rows.iter().filter_map(|row| row.get(keys.target)));
        debug!(
            model = %model.name,
            relationship = head,
            keys = values.len(),
            "relationship filter pushed down"
        );

        Ok(FilterCondition::new(keys.source, FilterOp::In, Value::Array(values)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use shared::config::Settings;
    use shared::db::MemoryOperator;

    use super::*;
    use crate::model::ModelRegistry;

    async fn fixture() -> (Arc<MemoryOperator>, QueryEngine) {
        let registry = ModelRegistry::from_json(json!([
            {
                "name": "post",
                "schema": {"id": "integer", "meta": "json", "author_id": "integer"},
                "relationships": {
                    "author": {"type": "belongsTo", "model": "user"},
                    "comments": {"type": "hasMany", "model": "comment"}
                }
            },
            {
                "name": "comment",
                "relationships": {"author": {"type": "belongsTo", "model": "user"}}
            },
            {"name": "user", "config": {"softDelete": true}}
        ]))
        .unwrap();
        let db = Arc::new(MemoryOperator::new());
        db.seed(
            "users",
            vec![
                json!({"id": 1, "name": "ada"}),
                json!({"id": 2, "name": "bob"}),
                json!({"id": 3, "name": "ada", "deleted_at": 5}),
            ],
        )
        .await;
        db.seed(
            "comments",
            vec![
                json!({"id": 10, "post_id": 100, "author_id": 1}),
                json!({"id": 11, "post_id": 100, "author_id": 1}),
                json!({"id": 12, "post_id": 200, "author_id": 2}),
            ],
        )
        .await;
        let engine = QueryEngine::new(Arc::new(registry), db.clone(), Arc::new(Settings::default()));
        (db, engine)
    }

    fn leaf(attribute: &str, value: Value) -> FilterGroup {
        FilterGroup::and(vec![FilterCondition::new(attribute, FilterOp::Is, value).into()])
    }

    #[tokio::test]
    async fn belongs_to_filters_foreign_key_by_owner_keys() {
        let (db, engine) = fixture().await;
        let post = engine.registry().get("post").unwrap();
        let out = RelationshipResolver::new(&engine)
            .resolve(&post, leaf("author.name", json!("ada")))
            .await
            .unwrap();
        assert_eq!(
            out.leaves()[0],
            &FilterCondition::new("author_id", FilterOp::In, json!([1]))
        );
        let sub = &db.selects_on("users").await[0];
        assert_eq!(sub.purpose.as_deref(), Some("subquery"));
        assert_eq!(sub.attributes, Some(vec!["id".to_string()]));
    }

    #[tokio::test]
    async fn has_many_filters_local_key_by_distinct_foreign_keys() {
        let (_db, engine) = fixture().await;
        let post = engine.registry().get("post").unwrap();
        let out = RelationshipResolver::new(&engine)
            .resolve(&post, leaf("comments.author_id", json!(1)))
            .await
            .unwrap();
        assert_eq!(out.leaves()[0], &FilterCondition::new("id", FilterOp::In, json!([100])));
    }

    #[tokio::test]
    async fn multi_hop_paths_recurse() {
        let (db, engine) = fixture().await;
        let post = engine.registry().get("post").unwrap();
        let out = RelationshipResolver::new(&engine)
            .resolve(&post, leaf("comments.author.name", json!("bob")))
            .await
            .unwrap();
        assert_eq!(out.leaves()[0], &FilterCondition::new("id", FilterOp::In, json!([200])));
        assert_eq!(db.selects_on("users").await.len(), 1);
        assert_eq!(db.selects_on("comments").await.len(), 1);
    }

    #[tokio::test]
    async fn schema_paths_and_plain_leaves_are_untouched() {
        let (db, engine) = fixture().await;
        let post = engine.registry().get("post").unwrap();
        let group = FilterGroup::or(vec![
            FilterCondition::new("meta.lang", FilterOp::Is, json!("de")).into(),
            FilterCondition::new("id", FilterOp::Is, json!(1)).into(),
        ]);
        let out = RelationshipResolver::new(&engine).resolve(&post, group.clone()).await.unwrap();
        assert_eq!(out, group);
        assert!(db.operations().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_relationship_is_reported() {
        let (_db, engine) = fixture().await;
        let post = engine.registry().get("post").unwrap();
        let err = RelationshipResolver::new(&engine)
            .resolve(&post, leaf("tags.name", json!("x")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            shared::error::AppError::UnknownRelationship { relationship, .. } if relationship == "tags"
        ));
    }
}
