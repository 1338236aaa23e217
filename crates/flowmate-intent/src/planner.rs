//! Dependency planner.
//!
//! Orders a template's steps so every step comes after all the steps it
//! depends on.  Kahn's algorithm is used with a min-heap of declaration
//! indices as the ready set, so among eligible steps the one declared first
//! always goes first and the plan for a given template is reproducible.
//!
//! Planning runs when a template is registered.  Any structural defect
//! (duplicate or blank ids, unknown or self dependencies, cycles) is a
//! configuration error at that point and can never surface from a run.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::debug;

use crate::error::{IntentError, Result};
use crate::template::WorkflowTemplate;

/// A validated, topologically ordered step plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Step indices (into `template.steps`) in execution order.
    order: Vec<usize>,
    /// For each step index, the indices of its dependencies.
    dependencies: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Step indices in execution order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Direct dependencies of step `index`.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Build the execution plan for `template`.
pub fn plan(template: &WorkflowTemplate) -> Result<ExecutionPlan> {
    let steps = &template.steps;
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(steps.len());

    for (i, step) in steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(IntentError::configuration(
                &template.id,
                format!("step #{i} has a blank id"),
            ));
        }
        if index_of.insert(step.id.as_str(), i).is_some() {
            return Err(IntentError::configuration(
                &template.id,
                format!("duplicate step id `{}`", step.id),
            ));
        }
    }

    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let &d = index_of.get(dep.as_str()).ok_or_else(|| {
                IntentError::configuration(
                    &template.id,
                    format!("step `{}` depends on unknown step `{dep}`", step.id),
                )
            })?;
            if d == i {
                return Err(IntentError::configuration(
                    &template.id,
                    format!("step `{}` depends on itself", step.id),
                ));
            }
            // Repeated entries in `depends_on` count once.
            if !dependencies[i].contains(&d) {
                dependencies[i].push(d);
                dependents[d].push(i);
            }
        }
    }

    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < steps.len() {
        let cyclic: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > 0)
            .map(|(i, _)| steps[i].id.as_str())
            .collect();
        return Err(IntentError::configuration(
            &template.id,
            format!("dependency cycle among steps: {}", cyclic.join(", ")),
        ));
    }

    debug!(
        template_id = %template.id,
        order = ?order.iter().map(|&i| steps[i].id.as_str()).collect::<Vec<_>>(),
        "execution plan built"
    );

    Ok(ExecutionPlan {
        order,
        dependencies,
    })
}

/// Whether `order` lists every step of `template` exactly once, each after
/// all of its dependencies.
pub fn is_valid_order(template: &WorkflowTemplate, order: &[usize]) -> bool {
    if order.len() != template.steps.len() {
        return false;
    }
    let mut position = vec![usize::MAX; template.steps.len()];
    for (pos, &i) in order.iter().enumerate() {
        if i >= position.len() || position[i] != usize::MAX {
            return false;
        }
        position[i] = pos;
    }
    template.steps.iter().enumerate().all(|(i, step)| {
        step.depends_on.iter().all(|dep| {
            template
                .steps
                .iter()
                .position(|s| &s.id == dep)
                .is_some_and(|d| position[d] < position[i])
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
