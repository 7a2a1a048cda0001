//! Generic interpreter for declarative Task/Choice state graphs.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::error::{AppError, Result};
use strum_macros::Display;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::choice::Predicate;
use crate::context::ExecutionContext;
use crate::tasks::TaskRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateGraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub start_at: String,
    pub states: BTreeMap<String, StateDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum StateDef {
    Task(TaskState),
    Choice(ChoiceState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default)]
    pub end: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    pub choices: Vec<ChoiceRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    #[serde(flatten)]
    pub predicate: Predicate,
    #[serde(rename = "Next")]
    pub next: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum StateKind {
    Task,
    Choice,
}

impl StateDef {
    pub fn kind(&self) -> StateKind {
        match self {
            StateDef::Task(_) => StateKind::Task,
            StateDef::Choice(_) => StateKind::Choice,
        }
    }
}

impl StateGraph {
    /// Checks every transition target and, when `tasks` is given, every task
    /// resource. A Choice without `Default` passes here and can still fail at
    /// runtime when no rule matches.
    pub fn validate(&self, tasks: Option<&TaskRegistry>) -> Result<()> {
        if !self.states.contains_key(&self.start_at) {
            return Err(AppError::UndefinedState {
                state: "StartAt".into(),
                target: self.start_at.clone(),
            });
        }
        let target_exists = |state: &str, target: &str| -> Result<()> {
            if self.states.contains_key(target) {
                Ok(())
            } else {
                Err(AppError::UndefinedState {
                    state: state.to_string(),
                    target: target.to_string(),
                })
            }
        };

        for (name, def) in &self.states {
            match def {
                StateDef::Task(task) => {
                    match (&task.next, task.end) {
                        (Some(_), true) => {
                            return Err(AppError::InvalidGraph(format!(
                                "state `{name}` sets both `Next` and `End`"
                            )))
                        }
                        (Some(next), false) => target_exists(name, next)?,
                        (None, true) => {}
                        (None, false) => {
                            return Err(AppError::MissingTransition {
                                state: name.clone(),
                            })
                        }
                    }
                    if let Some(tasks) = tasks {
                        tasks.get(&task.resource)?;
                    }
                }
                StateDef::Choice(choice) => {
                    if choice.choices.is_empty() {
                        return Err(AppError::InvalidGraph(format!(
                            "choice state `{name}` has no rules"
                        )));
                    }
                    for rule in &choice.choices {
                        target_exists(name, &rule.next)?;
                    }
                    if let Some(default) = &choice.default {
                        target_exists(name, default)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Input/output snapshot kept when tracing is on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTrace {
    pub input: Value,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateRecord {
    pub seq_no: usize,
    pub state: String,
    pub kind: StateKind,
    #[serde(with = "time::serde::rfc3339")]
    pub entered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub exited_at: OffsetDateTime,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<StateTrace>,
}

/// Execution token for one action run.
#[derive(Debug, Clone, Serialize)]
pub struct StateFlowPacket {
    pub id: Uuid,
    pub input: Value,
    pub output: Value,
    /// Context document, read by Choice rules through `$$`.
    pub context: Value,
    pub history: Vec<StateRecord>,
}

impl StateFlowPacket {
    pub fn new(input: Value, context: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            output: Value::Null,
            context,
            history: Vec::new(),
        }
    }

    /// State names in the order they ran.
    pub fn visited(&self) -> Vec<&str> {
        self.history.iter().map(|r| r.state.as_str()).collect()
    }
}

pub struct StateMachine<'a> {
    graph: &'a StateGraph,
    tasks: &'a TaskRegistry,
    trace: bool,
}

impl<'a> StateMachine<'a> {
    pub fn new(graph: &'a StateGraph, tasks: &'a TaskRegistry) -> Self {
        Self {
            graph,
            tasks,
            trace: false,
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Walks the graph from `StartAt` until a terminal state. Each state's
    /// output becomes the next state's input; the final output stays in
    /// `packet.output`.
    pub async fn run(&self, packet: &mut StateFlowPacket, ctx: &ExecutionContext) -> Result<()> {
        let mut current = self.graph.start_at.clone();
        let mut previous = String::from("StartAt");

        loop {
            let Some(def) = self.graph.states.get(&current) else {
                warn!(state = %previous, target = %current, "transition to undefined state");
                return Err(AppError::UndefinedState {
                    state: previous,
                    target: current,
                });
            };

            let entered_at = OffsetDateTime::now_utc();
            let started = Instant::now();
            let input_snapshot = self.trace.then(|| packet.input.clone());
            debug!(run = %packet.id, state = %current, kind = %def.kind(), "state entered");

            let next = match def {
                StateDef::Task(task) => {
                    let handler = self.tasks.get(&task.resource)?;
                    packet.output = handler.run(packet.input.clone(), ctx).await?;
                    match (&task.next, task.end) {
                        (_, true) => None,
                        (Some(next), false) => Some(next.clone()),
                        (None, false) => {
                            warn!(state = %current, "task state has neither Next nor End");
                            return Err(AppError::MissingTransition { state: current });
                        }
                    }
                }
                StateDef::Choice(choice) => {
                    packet.output = packet.input.clone();
                    let chosen = choice
                        .choices
                        .iter()
                        .find(|rule| rule.predicate.evaluate(&packet.input, &packet.context))
                        .map(|rule| rule.next.clone())
                        .or_else(|| choice.default.clone());
                    match chosen {
                        Some(next) => Some(next),
                        None => {
                            warn!(state = %current, "no choice matched and no Default");
                            return Err(AppError::MissingTransition { state: current });
                        }
                    }
                }
            };

            let duration = started.elapsed();
            debug!(run = %packet.id, state = %current, ?duration, "state exited");
            packet.history.push(StateRecord {
                seq_no: packet.history.len() + 1,
                state: current.clone(),
                kind: def.kind(),
                entered_at,
                exited_at: entered_at + duration,
                duration,
                trace: input_snapshot.map(|input| StateTrace {
                    input,
                    output: packet.output.clone(),
                }),
            });

            match next {
                None => return Ok(()),
                Some(next) => {
                    packet.input = packet.output.clone();
                    previous = std::mem::replace(&mut current, next);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(v: Value) -> StateGraph {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn wire_shape_parses() {
        let g = graph(json!({
            "StartAt": "Check",
            "States": {
                "Check": {
                    "Type": "Choice",
                    "Choices": [{"Variable": "$.flag", "BooleanEquals": true, "Next": "Yes"}],
                    "Default": "No"
                },
                "Yes": {"Type": "Task", "Resource": "transform_result", "End": true},
                "No": {"Type": "Task", "Resource": "handle_not_found", "End": true}
            }
        }));
        assert_eq!(g.start_at, "Check");
        let StateDef::Choice(choice) = &g.states["Check"] else {
            panic!("expected a choice state");
        };
        assert_eq!(choice.choices[0].next, "Yes");
        assert_eq!(choice.default.as_deref(), Some("No"));
        assert!(g.validate(Some(&TaskRegistry::with_builtins())).is_ok());
    }

    #[test]
    fn validation_catches_broken_transitions() {
        let dangling = graph(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Task", "Resource": "validate", "Next": "B"}}
        }));
        assert!(matches!(
            dangling.validate(None),
            Err(AppError::UndefinedState { state, target }) if state == "A" && target == "B"
        ));

        let stuck = graph(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Task", "Resource": "validate"}}
        }));
        assert!(matches!(stuck.validate(None), Err(AppError::MissingTransition { .. })));

        let missing_start = graph(json!({
            "StartAt": "Z",
            "States": {"A": {"Type": "Task", "Resource": "validate", "End": true}}
        }));
        assert!(matches!(missing_start.validate(None), Err(AppError::UndefinedState { .. })));
    }

    #[test]
    fn validation_checks_resources_when_given_a_registry() {
        let g = graph(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Task", "Resource": "does.not.exist", "End": true}}
        }));
        assert!(g.validate(None).is_ok());
        assert!(matches!(
            g.validate(Some(&TaskRegistry::with_builtins())),
            Err(AppError::UnknownTask(r)) if r == "does.not.exist"
        ));
    }

    #[test]
    fn graph_round_trips_through_wire_names() {
        let v = json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Task", "Resource": "validate", "End": true}}
        });
        assert_eq!(serde_json::to_value(graph(v.clone())).unwrap(), v);
    }
}
