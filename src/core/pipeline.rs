//! Pipeline definitions and validation.
//!
//! A pipeline is an ordered list of tasks plus the id of the terminal task
//! whose outcome decides the verdict. Tasks run in declaration order; the
//! structure is checked once, before anything executes.

use std::collections::HashSet;

use thiserror::Error;

use super::task::Task;

/// Structural problems in a pipeline definition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline name cannot be empty")]
    EmptyName,

    #[error("Pipeline '{0}' has no tasks")]
    NoTasks(String),

    #[error("Task id '{0}' is declared more than once")]
    DuplicateId(String),

    #[error("Task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Task '{task}' references later task '{dependency}' (forward references not allowed)")]
    ForwardReference { task: String, dependency: String },

    #[error("Terminal task '{0}' is not declared")]
    UnknownTerminal(String),
}

/// A complete pipeline definition
pub struct Pipeline<C> {
    /// Pipeline name (used in logs and the run report)
    pub name: String,

    /// Id of the task whose outcome decides the verdict
    pub terminal: String,

    /// Ordered list of tasks to execute
    pub tasks: Vec<Task<C>>,
}

impl<C> Pipeline<C> {
    pub fn new(name: impl Into<String>, terminal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terminal: terminal.into(),
            tasks: Vec::new(),
        }
    }

    /// Append a task
    pub fn task(mut self, task: Task<C>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Validate the pipeline definition.
    ///
    /// Dependencies may only point at tasks declared earlier, which also
    /// rules out cycles. Ids declared nowhere are allowed here and surface
    /// as unmet dependencies when the task is reached.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.is_empty() {
            return Err(PipelineError::EmptyName);
        }

        if self.tasks.is_empty() {
            return Err(PipelineError::NoTasks(self.name.clone()));
        }

        let all_ids: HashSet<&str> = self.tasks.iter().filter_map(|t| t.id.as_deref()).collect();
        let mut seen: HashSet<&str> = HashSet::new();

        for task in &self.tasks {
            let label = task.id.as_deref().unwrap_or(task.title.as_str());

            for dep in &task.depends_on {
                if task.id.as_deref() == Some(dep.id.as_str()) {
                    return Err(PipelineError::SelfDependency(label.to_string()));
                }
                if !seen.contains(dep.id.as_str()) && all_ids.contains(dep.id.as_str()) {
                    return Err(PipelineError::ForwardReference {
                        task: label.to_string(),
                        dependency: dep.id.clone(),
                    });
                }
            }

            if let Some(id) = task.id.as_deref() {
                if !seen.insert(id) {
                    return Err(PipelineError::DuplicateId(id.to_string()));
                }
            }
        }

        if !all_ids.contains(self.terminal.as_str()) {
            return Err(PipelineError::UnknownTerminal(self.terminal.clone()));
        }

        Ok(())
    }

    /// Get a task by id
    pub fn get_task(&self, id: &str) -> Option<&Task<C>> {
        self.tasks.iter().find(|t| t.id.as_deref() == Some(id))
    }

    /// Whether any task declares this id
    pub fn declares(&self, id: &str) -> bool {
        self.get_task(id).is_some()
    }
}
