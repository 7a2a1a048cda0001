use std::sync::Arc;

use serde_json::Value;
use shared::config::Settings;
use shared::db::DatabaseOperator;
use shared::error::Result;
use tracing::info;

use crate::action::Action;
use crate::context::ExecutionContext;
use crate::graphs;
use crate::model::ModelRegistry;
use crate::state_machine::{StateFlowPacket, StateGraph, StateMachine};
use crate::tasks::TaskRegistry;
use crate::validation;

/// Entry point: looks up the model, picks the action's graph and drives it
/// with the task registry and operator.
///
/// Registries are fixed at construction and shared read-only by every run.
#[derive(Clone)]
pub struct ActionOrchestrator {
    registry: Arc<ModelRegistry>,
    tasks: Arc<TaskRegistry>,
    operator: Arc<dyn DatabaseOperator>,
    settings: Arc<Settings>,
}

impl ActionOrchestrator {
    pub fn new(
        registry: ModelRegistry,
        operator: Arc<dyn DatabaseOperator>,
        settings: Settings,
    ) -> Result<Self> {
        Self::with_tasks(registry, TaskRegistry::with_builtins(), operator, settings)
    }

    /// Like [`new`](Self::new) with a caller-supplied task registry. With
    /// `eager_graph_validation` every built-in and custom graph is checked
    /// against the registry here instead of failing mid-run.
    pub fn with_tasks(
        registry: ModelRegistry,
        tasks: TaskRegistry,
        operator: Arc<dyn DatabaseOperator>,
        settings: Settings,
    ) -> Result<Self> {
        if settings.eager_graph_validation {
            for graph in [
                graphs::create(),
                graphs::read_one(),
                graphs::read_list(),
                graphs::update(),
                graphs::delete(),
            ] {
                graph.validate(Some(&tasks))?;
            }
            for model in registry.models() {
                for graph in model.actions.values() {
                    graph.validate(Some(&tasks))?;
                }
            }
        }
        info!(
            models = registry.models().count(),
            eager = settings.eager_graph_validation,
            "action orchestrator ready"
        );
        Ok(Self {
            registry: Arc::new(registry),
            tasks: Arc::new(tasks),
            operator,
            settings: Arc::new(settings),
        })
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Runs `action` on `model` and returns its result payload.
    pub async fn execute(&self, model: &str, action: &str, input: Value) -> Result<Value> {
        Ok(self.run(model, action, input).await?.output)
    }

    /// Runs `action` on `model` and returns the completed packet, history
    /// included.
    pub async fn run(&self, model: &str, action: &str, input: Value) -> Result<StateFlowPacket> {
        let definition = self.registry.get(model)?;
        let action = Action::parse_name(action);
        let input = validation::validate_input(&action, input, &self.settings)?;
        let graph = graphs::for_action(&action, &definition)?;
        self.drive(model, action.as_str(), &graph, input).await
    }

    /// Runs an arbitrary graph against `model`, e.g. one assembled by the
    /// caller at runtime.
    pub async fn execute_graph(
        &self,
        model: &str,
        graph: &StateGraph,
        input: Value,
    ) -> Result<StateFlowPacket> {
        if self.settings.eager_graph_validation {
            graph.validate(Some(&self.tasks))?;
        }
        let name = graph.comment.clone().unwrap_or_else(|| "graph".into());
        self.drive(model, &name, graph, input).await
    }

    async fn drive(
        &self,
        model: &str,
        action: &str,
        graph: &StateGraph,
        input: Value,
    ) -> Result<StateFlowPacket> {
        let definition = self.registry.get(model)?;
        let ctx = ExecutionContext::new(
            definition,
            action,
            self.registry.clone(),
            self.operator.clone(),
            self.settings.clone(),
        );
        let mut packet = StateFlowPacket::new(input, ctx.document.clone());
        info!(run = %packet.id, model, action, "action started");

        StateMachine::new(graph, &self.tasks)
            .with_trace(self.settings.debug_trace)
            .run(&mut packet, &ctx)
            .await?;

        info!(
            run = %packet.id,
            model,
            action,
            states = packet.history.len(),
            "action finished"
        );
        Ok(packet)
    }
}
