//! Workflow catalog.
//!
//! The catalog holds the statically known workflow templates.  Registration
//! is where templates are validated: a template is planned (see
//! [`crate::planner`]) and checked for well-formed ids and output mappings
//! before it is admitted.  A rejected template never enters the catalog, so
//! every template reachable at run time is known to be acyclic.

use std::collections::HashMap;
use std::sync::Arc;

use flowmate_kernel::StepExecutorRegistry;
use tracing::info;

use crate::error::{IntentError, Result};
use crate::planner::{self, ExecutionPlan};
use crate::template::WorkflowTemplate;

/// A validated template together with its execution plan.
#[derive(Debug, Clone)]
pub struct RegisteredWorkflow {
    pub template: WorkflowTemplate,
    pub plan: ExecutionPlan,
}

impl RegisteredWorkflow {
    pub fn id(&self) -> &str {
        &self.template.id
    }
}

/// Ordered collection of registered workflow templates.
///
/// Declaration order is preserved; the trigger detector uses it to break
/// score ties.
#[derive(Debug, Default)]
pub struct WorkflowCatalog {
    workflows: Vec<Arc<RegisteredWorkflow>>,
    index: HashMap<String, usize>,
}

impl WorkflowCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from templates, failing on the first invalid one.
    pub fn from_templates<I>(templates: I) -> Result<Self>
    where
        I: IntoIterator<Item = WorkflowTemplate>,
    {
        let mut catalog = Self::new();
        for template in templates {
            catalog.register(template)?;
        }
        Ok(catalog)
    }

    /// Validate, plan and add a template.
    pub fn register(&mut self, template: WorkflowTemplate) -> Result<()> {
        if template.id.trim().is_empty() {
            return Err(IntentError::configuration("", "template id is blank"));
        }
        if self.index.contains_key(&template.id) {
            return Err(IntentError::configuration(
                &template.id,
                "a template with this id is already registered",
            ));
        }
        if template.steps.is_empty() {
            return Err(IntentError::configuration(
                &template.id,
                "template has no steps",
            ));
        }
        for step in &template.steps {
            if step.target.plugin.is_empty() || step.target.function.is_empty() {
                return Err(IntentError::configuration(
                    &template.id,
                    format!("step `{}` has an incomplete executor reference", step.id),
                ));
            }
            if let Some((output, _)) = step
                .outputs
                .iter()
                .find(|(o, c)| o.trim().is_empty() || c.trim().is_empty())
            {
                return Err(IntentError::configuration(
                    &template.id,
                    format!("step `{}` has a blank output mapping `{output}`", step.id),
                ));
            }
        }

        let plan = planner::plan(&template)?;

        info!(
            template_id = %template.id,
            steps = template.steps.len(),
            active = template.active,
            "workflow template registered"
        );

        self.index.insert(template.id.clone(), self.workflows.len());
        self.workflows
            .push(Arc::new(RegisteredWorkflow { template, plan }));
        Ok(())
    }

    /// Look up a registered workflow by template id.
    pub fn get(&self, template_id: &str) -> Option<Arc<RegisteredWorkflow>> {
        self.index
            .get(template_id)
            .map(|&i| Arc::clone(&self.workflows[i]))
    }

    /// Iterate over registered workflows in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredWorkflow>> {
        self.workflows.iter()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Check that every step target is served by `registry`.
    ///
    /// Run once at startup, after executors are registered.
    pub fn validate_executors(&self, registry: &StepExecutorRegistry) -> Result<()> {
        for workflow in &self.workflows {
            for step in &workflow.template.steps {
                registry
                    .ensure_function(&step.target.plugin, &step.target.function)
                    .map_err(|e| {
                        IntentError::configuration(
                            &workflow.template.id,
                            format!("step `{}`: {e}", step.id),
                        )
                    })?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
