//! The fixed state graphs behind the built-in actions.

use std::collections::BTreeMap;

use shared::error::{AppError, Result};

use crate::action::Action;
use crate::choice::{Comparison, Predicate};
use crate::model::ModelDefinition;
use crate::state_machine::{ChoiceRule, ChoiceState, StateDef, StateGraph, TaskState};

fn task(resource: &str, next: &str) -> StateDef {
    StateDef::Task(TaskState {
        resource: resource.into(),
        next: Some(next.into()),
        end: false,
    })
}

fn end(resource: &str) -> StateDef {
    StateDef::Task(TaskState {
        resource: resource.into(),
        next: None,
        end: true,
    })
}

fn choice(variable: &str, comparison: Comparison, next: &str, default: &str) -> StateDef {
    StateDef::Choice(ChoiceState {
        choices: vec![ChoiceRule {
            predicate: Predicate::Test {
                variable: variable.into(),
                comparison,
            },
            next: next.into(),
        }],
        default: Some(default.into()),
    })
}

fn graph(comment: &str, start_at: &str, states: Vec<(&str, StateDef)>) -> StateGraph {
    StateGraph {
        comment: Some(comment.into()),
        start_at: start_at.into(),
        states: states
            .into_iter()
            .map(|(name, def)| (name.to_string(), def))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn create() -> StateGraph {
    graph(
        "create",
        "CleanInput",
        vec![
            ("CleanInput", task("clean_input", "ValidateInput")),
            ("ValidateInput", task("validate", "GenerateAttributes")),
            ("GenerateAttributes", task("generate_attributes", "DatabaseInsert")),
            ("DatabaseInsert", task("database.insert", "DatabaseRead")),
            ("DatabaseRead", end("database.read")),
        ],
    )
}

pub fn read_one() -> StateGraph {
    graph(
        "readOne",
        "ValidateInput",
        vec![
            ("ValidateInput", task("validate", "DatabaseRead")),
            ("DatabaseRead", task("database.read", "CheckFound")),
            (
                "CheckFound",
                choice("$", Comparison::IsNull(true), "NotFound", "Success"),
            ),
            ("NotFound", end("handle_not_found")),
            ("Success", end("transform_result")),
        ],
    )
}

pub fn read_list() -> StateGraph {
    graph(
        "readList",
        "ValidateInput",
        vec![
            ("ValidateInput", task("validate", "CheckPagination")),
            (
                "CheckPagination",
                choice(
                    "$.pagination",
                    Comparison::IsPresent(true),
                    "DatabasePaginate",
                    "DatabaseSelect",
                ),
            ),
            ("DatabasePaginate", task("database.paginate", "TransformResults")),
            ("DatabaseSelect", task("database.select", "TransformResults")),
            ("TransformResults", end("transform_results")),
        ],
    )
}

pub fn update() -> StateGraph {
    graph(
        "update",
        "ValidateInput",
        vec![
            ("ValidateInput", task("validate", "DatabaseUpdate")),
            ("DatabaseUpdate", task("database.update", "DatabaseRead")),
            ("DatabaseRead", end("database.read")),
        ],
    )
}

pub fn delete() -> StateGraph {
    graph(
        "delete",
        "ValidateInput",
        vec![
            ("ValidateInput", task("validate", "CheckSoftDelete")),
            (
                "CheckSoftDelete",
                choice(
                    "$$.config.softDelete",
                    Comparison::BooleanEquals(true),
                    "SoftDelete",
                    "HardDelete",
                ),
            ),
            ("SoftDelete", end("database.soft_delete")),
            ("HardDelete", end("database.hard_delete")),
        ],
    )
}

/// Graph driving `action` on `model`; custom actions come from the model's
/// own `actions` table.
pub fn for_action(action: &Action, model: &ModelDefinition) -> Result<StateGraph> {
    Ok(match action {
        Action::Create => create(),
        Action::ReadOne => read_one(),
        Action::ReadList => read_list(),
        Action::Update => update(),
        Action::Delete => delete(),
        Action::Custom(name) => model.actions.get(name).cloned().ok_or_else(|| {
            AppError::validation(
                "action",
                format!("model `{}` has no action `{name}`", model.name),
            )
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskRegistry;

    #[test]
    fn builtin_graphs_are_well_formed() {
        let tasks = TaskRegistry::with_builtins();
        for g in [create(), read_one(), read_list(), update(), delete()] {
            g.validate(Some(&tasks)).unwrap();
        }
    }

    #[test]
    fn delete_graph_serializes_to_wire_shape() {
        let v = serde_json::to_value(delete()).unwrap();
        assert_eq!(v["StartAt"], "ValidateInput");
        assert_eq!(
            v["States"]["CheckSoftDelete"],
            serde_json::json!({
                "Type": "Choice",
                "Choices": [{"Variable": "$$.config.softDelete", "BooleanEquals": true, "Next": "SoftDelete"}],
                "Default": "HardDelete"
            })
        );
    }
}
