//! Flow validator with comprehensive validation rules
//!
//! Validates flow definitions according to the BeemFlow specification,
//! ensuring all required fields are present, step IDs are unique across
//! every nesting level, dependencies are valid, and step-kind-specific
//! constraints are met.

use crate::dsl::DependencyAnalyzer;
use crate::model::StepBody;
use crate::{BeemFlowError, Flow, Result, Step};
use regex::Regex;
use std::collections::HashSet;

pub struct Validator;

impl Validator {
    /// Validate a flow for correctness
    ///
    /// Performs:
    /// - Required fields (name, steps)
    /// - Step-identifier uniqueness across all nesting levels
    /// - Dependency references and cycle detection
    /// - Per-kind step constraints (foreach/await_event/wait)
    /// - Template syntax checks
    pub fn validate(flow: &Flow) -> Result<()> {
        Self::validate_required_fields(flow)?;
        Self::validate_step_ids_unique(flow)?;
        Self::validate_dependencies(flow)?;
        DependencyAnalyzer::new().topological_sort(flow)?; // fails on cycles
        Self::validate_step_constraints(flow)?;
        Ok(())
    }

    fn validate_required_fields(flow: &Flow) -> Result<()> {
        if flow.name.is_empty() {
            return Err(BeemFlowError::validation("Flow name is required"));
        }

        if flow.steps.is_empty() {
            return Err(BeemFlowError::validation(
                "Flow must have at least one step",
            ));
        }

        Ok(())
    }

    /// Step identifiers must be unique across the entire document, not just
    /// within a single nesting level: a parallel block and its parent share
    /// the same namespace.
    fn validate_step_ids_unique(flow: &Flow) -> Result<()> {
        let mut seen = HashSet::new();
        Self::collect_ids(&flow.steps, &mut seen)?;
        if let Some(catch) = &flow.catch {
            Self::collect_ids(catch, &mut seen)?;
        }
        Ok(())
    }

    fn collect_ids<'a>(steps: &'a [Step], seen: &mut HashSet<&'a str>) -> Result<()> {
        for step in steps {
            if !seen.insert(step.id.as_str()) {
                return Err(BeemFlowError::validation(format!(
                    "Duplicate step ID: {}",
                    step.id
                )));
            }
            match &step.body {
                StepBody::Parallel { steps: nested } => Self::collect_ids(nested, seen)?,
                StepBody::Foreach { steps: nested, .. } => Self::collect_ids(nested, seen)?,
                _ => {}
            }
            if let Some(catch) = &step.catch {
                Self::collect_ids(catch, seen)?;
            }
        }
        Ok(())
    }

    fn validate_dependencies(flow: &Flow) -> Result<()> {
        let step_ids: HashSet<_> = flow.steps.iter().map(|s| s.id.as_str()).collect();

        for step in &flow.steps {
            if let Some(deps) = &step.depends_on {
                for dep in deps {
                    if !step_ids.contains(dep.as_str()) {
                        return Err(BeemFlowError::validation(format!(
                            "Step '{}' depends on non-existent step '{}'",
                            step.id, dep
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_step_constraints(flow: &Flow) -> Result<()> {
        for step in &flow.steps {
            Self::validate_single_step(step)?;
        }

        if let Some(catch_steps) = &flow.catch {
            for step in catch_steps {
                Self::validate_single_step(step)?;
            }
        }

        Ok(())
    }

    /// Validate a single step and recurse into any nested step lists it
    /// carries (parallel/foreach bodies, catch blocks).
    fn validate_single_step(step: &Step) -> Result<()> {
        Self::validate_identifier(step.id.as_str())?;

        if let Some(condition) = &step.if_
            && !Self::is_template_syntax(condition)
        {
            return Err(BeemFlowError::validation(format!(
                "Conditional in step '{}' must use template syntax: {{ }}",
                step.id
            )));
        }

        match &step.body {
            StepBody::Exec { use_, .. } => {
                if use_.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Step '{}' must specify a tool in 'use'",
                        step.id
                    )));
                }
            }
            StepBody::Parallel { steps } => {
                if steps.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Parallel step '{}' must have at least one nested step",
                        step.id
                    )));
                }
                for nested in steps {
                    Self::validate_single_step(nested)?;
                }
            }
            StepBody::Foreach {
                list_expr,
                alias,
                steps,
                ..
            } => {
                if list_expr.trim().is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Foreach step '{}' must have a list expression",
                        step.id
                    )));
                }
                Self::validate_identifier(alias)?;
                if steps.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Foreach step '{}' must have at least one nested step in 'do'",
                        step.id
                    )));
                }
                for nested in steps {
                    Self::validate_single_step(nested)?;
                }
            }
            StepBody::AwaitEvent { source, match_, .. } => {
                if source.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Await event in step '{}' must have a 'source' field",
                        step.id
                    )));
                }
                if match_.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Await event in step '{}' must have a 'match' field",
                        step.id
                    )));
                }
            }
            StepBody::Wait { seconds, until } => {
                if seconds.is_none() && until.is_none() {
                    return Err(BeemFlowError::validation(format!(
                        "Wait in step '{}' must have 'seconds' or 'until'",
                        step.id
                    )));
                }
            }
        }

        if let Some(catch) = &step.catch {
            for nested in catch {
                Self::validate_single_step(nested)?;
            }
        }

        Ok(())
    }

    /// Validate that a string is a valid identifier (alphanumeric + underscore)
    fn validate_identifier(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(BeemFlowError::validation("Identifier cannot be empty"));
        }

        // Dynamic IDs (template expressions) are resolved at runtime.
        if id.contains("{{") || id.contains("}}") {
            return Ok(());
        }

        let re = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid identifier regex");
        if !re.is_match(id) {
            return Err(BeemFlowError::validation(format!(
                "Invalid identifier '{}': must start with letter or underscore, contain only alphanumeric and underscore",
                id
            )));
        }

        Ok(())
    }

    /// Check if a string contains template syntax
    fn is_template_syntax(s: &str) -> bool {
        s.contains("{{") && s.contains("}}")
    }
}

#[cfg(test)]
mod validator_test;
