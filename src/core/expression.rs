//! Condition expressions
//!
//! An expression is a Jinja expression (`category`, `x > 0`,
//! `status == "ok" and not draft`, `kind | lower`) evaluated with minijinja.
//! Booleans become `"true"` or `"false"`, any other scalar its rendered
//! text. `{{ ... }}` wrapping is accepted and stripped.

use crate::core::error::{PipeError, PipeResult};
use crate::core::memory::WorkingMemory;
use crate::core::template::{context_for, environment, free_names, TemplateCategory};
use minijinja::value::ValueKind;

/// A condition expression, checked for syntax when parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    body: String,
}

impl Expression {
    /// Parse an expression
    pub fn parse(source: &str) -> PipeResult<Self> {
        let mut body = source.trim();
        if let Some(inner) = body.strip_prefix("{{").and_then(|b| b.strip_suffix("}}")) {
            body = inner.trim();
        }
        if body.is_empty() {
            return Err(PipeError::InvalidExpression {
                expression: source.to_string(),
                reason: "expression is empty".to_string(),
            });
        }

        let env = environment(TemplateCategory::Basic);
        env.compile_expression(body)
            .map_err(|error| PipeError::InvalidExpression {
                expression: source.to_string(),
                reason: error.to_string(),
            })?;

        Ok(Self {
            source: source.to_string(),
            body: body.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root stuff names this expression reads, sorted
    pub fn references(&self) -> Vec<String> {
        let env = environment(TemplateCategory::Basic);
        match env.compile_expression(&self.body) {
            Ok(compiled) => free_names(compiled.undeclared_variables(false)),
            Err(_) => Vec::new(),
        }
    }

    /// Evaluate against memory, producing the branch key
    pub fn evaluate(&self, memory: &WorkingMemory) -> PipeResult<String> {
        let evaluation_error = |reason: String| PipeError::ExpressionEvaluation {
            expression: self.source.clone(),
            reason,
        };

        let env = environment(TemplateCategory::Basic);
        let compiled = env
            .compile_expression(&self.body)
            .map_err(|error| evaluation_error(error.to_string()))?;
        let context = context_for(free_names(compiled.undeclared_variables(false)), memory)?;
        let value = compiled
            .eval(&context)
            .map_err(|error| evaluation_error(error.to_string()))?;

        match value.kind() {
            ValueKind::Bool | ValueKind::Number | ValueKind::String => Ok(value.to_string()),
            ValueKind::Undefined | ValueKind::None => {
                Err(evaluation_error("expression has no value".to_string()))
            }
            _ => Err(evaluation_error(format!(
                "'{}' is not a scalar",
                self.body
            ))),
        }
    }
}
