//! Stuff - named, typed runtime values

use crate::core::concept::{Concept, ConceptRegistry, NativeConcept};
use crate::core::error::{PipeError, PipeResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Payload of a stuff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StuffContent {
    Text {
        text: String,
    },
    Number {
        value: f64,
    },
    Boolean {
        value: bool,
    },
    Image {
        url: String,
        #[serde(default)]
        caption: Option<String>,
    },
    Pdf {
        url: String,
    },
    Structured {
        fields: IndexMap<String, StuffContent>,
    },
    /// Homogeneous ordered list of one item concept
    List {
        item_concept: String,
        items: Vec<StuffContent>,
    },
}

impl StuffContent {
    pub fn text(text: impl Into<String>) -> Self {
        StuffContent::Text { text: text.into() }
    }

    pub fn number(value: f64) -> Self {
        StuffContent::Number { value }
    }

    pub fn boolean(value: bool) -> Self {
        StuffContent::Boolean { value }
    }

    pub fn image(url: impl Into<String>) -> Self {
        StuffContent::Image {
            url: url.into(),
            caption: None,
        }
    }

    pub fn structured<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, StuffContent)>,
        K: Into<String>,
    {
        StuffContent::Structured {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn list(item_concept: impl Into<String>, items: Vec<StuffContent>) -> Self {
        StuffContent::List {
            item_concept: item_concept.into(),
            items,
        }
    }

    /// Short name of the content shape, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            StuffContent::Text { .. } => "text",
            StuffContent::Number { .. } => "number",
            StuffContent::Boolean { .. } => "boolean",
            StuffContent::Image { .. } => "image",
            StuffContent::Pdf { .. } => "pdf",
            StuffContent::Structured { .. } => "structured",
            StuffContent::List { .. } => "list",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, StuffContent::List { .. })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StuffContent::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Look up a dotted field path (`title`, `author.name`)
    pub fn field(&self, path: &[&str]) -> Option<&StuffContent> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => match self {
                StuffContent::Structured { fields } => fields.get(*head)?.field(rest),
                _ => None,
            },
        }
    }

    /// Render the content as plain text
    pub fn render(&self) -> String {
        match self {
            StuffContent::Text { text } => text.clone(),
            StuffContent::Number { value } => format_number(*value),
            StuffContent::Boolean { value } => value.to_string(),
            StuffContent::Image { url, caption } => match caption {
                Some(caption) => format!("{} ({})", caption, url),
                None => url.clone(),
            },
            StuffContent::Pdf { url } => url.clone(),
            StuffContent::Structured { fields } => fields
                .iter()
                .map(|(name, value)| format!("{}: {}", name, value.render()))
                .collect::<Vec<_>>()
                .join("\n"),
            StuffContent::List { items, .. } => items
                .iter()
                .map(|item| format!("- {}", item.render()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Convert a JSON value returned by a worker into content for `concept`
    pub fn from_json(
        value: &serde_json::Value,
        concept: &Concept,
        registry: &ConceptRegistry,
    ) -> PipeResult<Self> {
        use serde_json::Value;

        let invalid = |reason: String| PipeError::InvalidContent {
            concept: concept.code.clone(),
            reason,
        };

        if let Some(structure) = registry.structure_of(concept) {
            let Value::Object(object) = value else {
                return Err(invalid(format!("expected an object, got {}", value)));
            };
            let mut fields = IndexMap::new();
            for (field, code) in &structure {
                let field_concept = registry.resolve(code)?;
                let raw = object
                    .get(field)
                    .ok_or_else(|| invalid(format!("missing field '{}'", field)))?;
                fields.insert(
                    field.clone(),
                    StuffContent::from_json(raw, &field_concept, registry)?,
                );
            }
            return Ok(StuffContent::Structured { fields });
        }

        let content = match (registry.native_root(concept), value) {
            (Some(NativeConcept::Text), Value::String(s)) => StuffContent::text(s.clone()),
            (Some(NativeConcept::Text), other) => StuffContent::text(other.to_string()),
            (Some(NativeConcept::Number), Value::Number(n)) => {
                StuffContent::number(n.as_f64().unwrap_or_default())
            }
            (Some(NativeConcept::Boolean), Value::Bool(b)) => StuffContent::boolean(*b),
            (Some(NativeConcept::Image), Value::String(url)) => StuffContent::image(url.clone()),
            (Some(NativeConcept::Pdf), Value::String(url)) => StuffContent::Pdf { url: url.clone() },
            (Some(NativeConcept::Anything), Value::String(s)) => StuffContent::text(s.clone()),
            (Some(NativeConcept::Anything), Value::Number(n)) => {
                StuffContent::number(n.as_f64().unwrap_or_default())
            }
            (Some(NativeConcept::Anything), Value::Bool(b)) => StuffContent::boolean(*b),
            (_, other) => {
                return Err(invalid(format!("cannot convert {} into this concept", other)));
            }
        };
        Ok(content)
    }
}

/// Format numbers without a trailing `.0` for integral values
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// A named, typed runtime value
///
/// For list content, `concept` is the item concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stuff {
    pub name: String,
    pub concept: String,
    pub content: StuffContent,
}

impl Stuff {
    /// Create a stuff, checking that the content conforms to the concept
    pub fn new(
        name: impl Into<String>,
        concept: &Concept,
        content: StuffContent,
        registry: &ConceptRegistry,
    ) -> PipeResult<Self> {
        check_conformance(concept, &content, registry, &mut HashSet::new())?;
        Ok(Self {
            name: name.into(),
            concept: concept.code.clone(),
            content,
        })
    }

    /// Same value, bound under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concept: self.concept.clone(),
            content: self.content.clone(),
        }
    }

    pub fn is_list(&self) -> bool {
        self.content.is_list()
    }

    /// List items as individual stuffs named `name[i]`
    pub fn items(&self) -> Option<Vec<Stuff>> {
        match &self.content {
            StuffContent::List { item_concept, items } => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Stuff {
                        name: format!("{}[{}]", self.name, i),
                        concept: item_concept.clone(),
                        content: item.clone(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

fn check_conformance(
    concept: &Concept,
    content: &StuffContent,
    registry: &ConceptRegistry,
    seen: &mut HashSet<String>,
) -> PipeResult<()> {
    let invalid = |reason: String| PipeError::InvalidContent {
        concept: concept.code.clone(),
        reason,
    };

    if let StuffContent::List { item_concept, items } = content {
        let item = registry.resolve(item_concept)?;
        if !registry.is_compatible(&item, concept) {
            return Err(invalid(format!("list items are '{}'", item_concept)));
        }
        for entry in items {
            check_conformance(&item, entry, registry, seen)?;
        }
        return Ok(());
    }

    if concept.is_native(NativeConcept::Anything) {
        return Ok(());
    }

    if let Some(structure) = registry.structure_of(concept) {
        let StuffContent::Structured { fields } = content else {
            return Err(invalid(format!("expected structured content, got {}", content.kind())));
        };
        if !seen.insert(concept.code.clone()) {
            return Err(invalid("recursive structure".to_string()));
        }
        for (field, code) in &structure {
            let value = fields
                .get(field)
                .ok_or_else(|| invalid(format!("missing field '{}'", field)))?;
            let field_concept = registry.resolve(code)?;
            check_conformance(&field_concept, value, registry, seen)?;
        }
        if let Some(extra) = fields.keys().find(|k| !structure.contains_key(*k)) {
            return Err(invalid(format!("unexpected field '{}'", extra)));
        }
        seen.remove(&concept.code);
        return Ok(());
    }

    let expected = match registry.native_root(concept) {
        Some(kind) => kind,
        None => return Err(invalid("concept has no native root or structure".to_string())),
    };
    let ok = matches!(
        (expected, content),
        (NativeConcept::Text, StuffContent::Text { .. })
            | (NativeConcept::Number, StuffContent::Number { .. })
            | (NativeConcept::Boolean, StuffContent::Boolean { .. })
            | (NativeConcept::Image, StuffContent::Image { .. })
            | (NativeConcept::Pdf, StuffContent::Pdf { .. })
    );
    if ok {
        Ok(())
    } else {
        Err(invalid(format!(
            "expected {} content, got {}",
            expected.name().to_lowercase(),
            content.kind()
        )))
    }
}
