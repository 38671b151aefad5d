//! Jinja templates for template operators and prompts
//!
//! Templates are rendered with minijinja against the stuffs in working
//! memory: `{{ name }}`, `{{ doc.title | upper }}`, `{% for item in items %}`
//! and the rest of the Jinja syntax. The category decides how each value
//! printed by a `{{ ... }}` block is formatted.

use crate::core::error::{PipeError, PipeResult};
use crate::core::memory::WorkingMemory;
use crate::core::stuff::StuffContent;
use minijinja::value::ValueKind;
use minijinja::{Environment, Error, UndefinedBehavior, Value};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

/// Globals minijinja provides, never stuff names
const BUILTIN_GLOBALS: &[&str] = &["range", "dict", "namespace", "debug", "loop"];

/// How interpolated values are formatted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    /// Values inserted verbatim, list items comma-separated
    #[default]
    Basic,
    /// Lists rendered as markdown bullets, records as `key: value` lines
    Markdown,
    /// Values HTML-escaped unless marked `| safe`
    Html,
    /// Multi-line values fenced with triple quotes
    LlmPrompt,
}

/// A Jinja template and its output category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    category: TemplateCategory,
}

impl Template {
    pub fn new(source: impl Into<String>, category: TemplateCategory) -> Self {
        Self {
            source: source.into(),
            category,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn category(&self) -> TemplateCategory {
        self.category
    }

    /// Root stuff names the template reads, sorted
    ///
    /// Includes names only used inside block tags (`{% if flag %}`); loop
    /// variables and `{% set %}` names are excluded.
    pub fn variables(&self) -> PipeResult<Vec<String>> {
        let env = environment(self.category);
        let template = env
            .template_from_str(&self.source)
            .map_err(invalid_template)?;
        Ok(free_names(template.undeclared_variables(false)))
    }

    /// Render against working memory
    pub fn render(&self, memory: &WorkingMemory) -> PipeResult<String> {
        let env = environment(self.category);
        let template = env
            .template_from_str(&self.source)
            .map_err(invalid_template)?;
        let context = context_for(free_names(template.undeclared_variables(false)), memory)?;
        template
            .render(&context)
            .map_err(|error| PipeError::TemplateRender {
                reason: error.to_string(),
            })
    }
}

/// Environment shared by templates and condition expressions
pub(crate) fn environment<'source>(category: TemplateCategory) -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_formatter(move |out, _state, value| {
        let text = display(value, category);
        let text = match category {
            TemplateCategory::Html if !value.is_safe() => escape_html(&text),
            TemplateCategory::LlmPrompt if text.contains('\n') => {
                format!("\"\"\"\n{}\n\"\"\"", text)
            }
            _ => text,
        };
        write!(out, "{}", text).map_err(Error::from)
    });
    env
}

/// Drop builtins and sort what minijinja reports as undeclared
pub(crate) fn free_names(names: HashSet<String>) -> Vec<String> {
    let mut names: Vec<String> = names
        .into_iter()
        .filter(|name| !BUILTIN_GLOBALS.contains(&name.as_str()))
        .collect();
    names.sort();
    names
}

/// Template context holding the named stuffs
pub(crate) fn context_for(
    names: Vec<String>,
    memory: &WorkingMemory,
) -> PipeResult<BTreeMap<String, Value>> {
    names
        .into_iter()
        .map(|name| {
            let stuff = memory
                .lookup(&name)
                .ok_or_else(|| PipeError::StuffNotFound { name: name.clone() })?;
            let value = Value::from_serialize(ContentValue(&stuff.content));
            Ok((name, value))
        })
        .collect()
}

/// Jinja view of a stuff's content
///
/// Integral numbers become integers so `5.0` prints as `5`; images and
/// pdfs are seen as their rendered text.
struct ContentValue<'a>(&'a StuffContent);

impl Serialize for ContentValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            StuffContent::Text { text } => serializer.serialize_str(text),
            StuffContent::Number { value } if value.fract() == 0.0 && value.abs() < 1e15 => {
                serializer.serialize_i64(*value as i64)
            }
            StuffContent::Number { value } => serializer.serialize_f64(*value),
            StuffContent::Boolean { value } => serializer.serialize_bool(*value),
            StuffContent::Image { .. } | StuffContent::Pdf { .. } => {
                serializer.serialize_str(&self.0.render())
            }
            StuffContent::Structured { fields } => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, &ContentValue(value))?;
                }
                map.end()
            }
            StuffContent::List { items, .. } => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&ContentValue(item))?;
                }
                seq.end()
            }
        }
    }
}

fn display(value: &Value, category: TemplateCategory) -> String {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => String::new(),
        ValueKind::Seq => {
            let items: Vec<String> = match value.try_iter() {
                Ok(iter) => iter.map(|item| display(&item, category)).collect(),
                Err(_) => Vec::new(),
            };
            match category {
                TemplateCategory::Basic => items.join(", "),
                _ => items
                    .iter()
                    .map(|item| format!("- {}", item))
                    .collect::<Vec<_>>()
                    .join("\n"),
            }
        }
        ValueKind::Map => match value.try_iter() {
            Ok(keys) => keys
                .map(|key| {
                    let field = value.get_item(&key).unwrap_or(Value::UNDEFINED);
                    format!("{}: {}", key, display(&field, category))
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(_) => String::new(),
        },
        _ => value.to_string(),
    }
}

fn invalid_template(error: Error) -> PipeError {
    PipeError::InvalidTemplate {
        reason: error.to_string(),
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
