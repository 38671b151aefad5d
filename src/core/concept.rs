//! Concepts - the type system for stuff
//!
//! A concept is a named type descriptor. Natives (`Text`, `Number`, ...) are
//! predefined in the `native` domain; domains declare their own concepts,
//! optionally structured (field -> concept) or refining another concept.

use crate::core::error::{PipeError, PipeResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Domain that holds the built-in concepts
pub const NATIVE_DOMAIN: &str = "native";

/// Built-in primitive concepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeConcept {
    Text,
    Number,
    Boolean,
    Image,
    Pdf,
    /// Accepts any content
    Anything,
}

impl NativeConcept {
    pub const ALL: [NativeConcept; 6] = [
        NativeConcept::Text,
        NativeConcept::Number,
        NativeConcept::Boolean,
        NativeConcept::Image,
        NativeConcept::Pdf,
        NativeConcept::Anything,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NativeConcept::Text => "Text",
            NativeConcept::Number => "Number",
            NativeConcept::Boolean => "Boolean",
            NativeConcept::Image => "Image",
            NativeConcept::Pdf => "Pdf",
            NativeConcept::Anything => "Anything",
        }
    }

    /// Fully qualified code, e.g. `native.Text`
    pub fn code(&self) -> String {
        format!("{}.{}", NATIVE_DOMAIN, self.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.name() == name)
    }
}

/// Qualify a concept code relative to `domain`
///
/// `Text` -> `native.Text`, `Draft` -> `domain.Draft`, `other.Draft` unchanged.
pub fn qualify_code(domain: &str, code: &str) -> String {
    if code.contains('.') {
        code.to_string()
    } else if let Some(native) = NativeConcept::from_name(code) {
        native.code()
    } else {
        format!("{}.{}", domain, code)
    }
}

/// A named type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Fully qualified code (`domain.Name`)
    pub code: String,

    /// Owning domain
    pub domain: String,

    /// Short name without the domain prefix
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Structured fields (field name -> fully qualified concept code)
    #[serde(default)]
    pub structure: Option<IndexMap<String, String>>,

    /// Parent concept this one refines (fully qualified code)
    #[serde(default)]
    pub refines: Option<String>,

    /// Set for built-ins
    #[serde(default)]
    pub native: Option<NativeConcept>,
}

impl Concept {
    /// Create a built-in concept
    pub fn native(kind: NativeConcept) -> Self {
        Self {
            code: kind.code(),
            domain: NATIVE_DOMAIN.to_string(),
            name: kind.name().to_string(),
            description: None,
            structure: None,
            refines: None,
            native: Some(kind),
        }
    }

    /// Create a plain domain concept
    pub fn new(domain: &str, name: &str) -> Self {
        Self {
            code: format!("{}.{}", domain, name),
            domain: domain.to_string(),
            name: name.to_string(),
            description: None,
            structure: None,
            refines: None,
            native: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_structure(mut self, structure: IndexMap<String, String>) -> Self {
        self.structure = Some(structure);
        self
    }

    pub fn with_refines(mut self, parent: impl Into<String>) -> Self {
        self.refines = Some(parent.into());
        self
    }

    pub fn is_native(&self, kind: NativeConcept) -> bool {
        self.native == Some(kind)
    }

    pub fn is_structured(&self) -> bool {
        self.structure.is_some()
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// Registry of all concepts known to a library
///
/// Registration is append-only: once a code is registered it is never replaced.
#[derive(Debug, Clone)]
pub struct ConceptRegistry {
    concepts: HashMap<String, Arc<Concept>>,
}

impl ConceptRegistry {
    /// Create a registry holding only the native concepts
    pub fn new() -> Self {
        let concepts = NativeConcept::ALL
            .into_iter()
            .map(|kind| {
                let concept = Concept::native(kind);
                (concept.code.clone(), Arc::new(concept))
            })
            .collect();
        Self { concepts }
    }

    /// Register a domain concept
    pub fn register(&mut self, concept: Concept) -> PipeResult<Arc<Concept>> {
        if concept.domain == NATIVE_DOMAIN || self.concepts.contains_key(&concept.code) {
            return Err(PipeError::DuplicateConcept { code: concept.code });
        }
        let concept = Arc::new(concept);
        self.concepts.insert(concept.code.clone(), concept.clone());
        Ok(concept)
    }

    /// Resolve a concept code
    ///
    /// Accepts fully qualified codes and bare native names (`Text`).
    pub fn resolve(&self, code: &str) -> PipeResult<Arc<Concept>> {
        if let Some(native) = NativeConcept::from_name(code) {
            return Ok(self.native(native));
        }
        self.concepts
            .get(code)
            .cloned()
            .ok_or_else(|| PipeError::UnknownConcept {
                code: code.to_string(),
            })
    }

    /// Resolve a code that may be bare, looking in natives first, then `domain`
    pub fn resolve_in(&self, domain: &str, code: &str) -> PipeResult<Arc<Concept>> {
        self.resolve(&qualify_code(domain, code))
            .map_err(|_| PipeError::UnknownConcept {
                code: code.to_string(),
            })
    }

    /// Get a native concept
    pub fn native(&self, kind: NativeConcept) -> Arc<Concept> {
        match self.concepts.get(&kind.code()) {
            Some(concept) => concept.clone(),
            None => Arc::new(Concept::native(kind)),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.concepts.contains_key(code)
    }

    /// All concepts, sorted by code
    pub fn concepts(&self) -> Vec<&Arc<Concept>> {
        let mut all: Vec<_> = self.concepts.values().collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    /// Whether a value of `producer` can be used where `consumer` is expected
    ///
    /// Nominal rules are checked first (same code, refinement chain, `Anything`),
    /// then structural ones (text reduction, structure subsumption).
    pub fn is_compatible(&self, producer: &Concept, consumer: &Concept) -> bool {
        if producer.code == consumer.code || consumer.is_native(NativeConcept::Anything) {
            return true;
        }
        if self.refines(producer, &consumer.code) {
            return true;
        }
        if consumer.is_native(NativeConcept::Text) {
            return self.reduces_to_text(producer, &mut HashSet::new());
        }
        if let (Some(wanted), Some(offered)) = (&consumer.structure, &producer.structure) {
            return wanted.iter().all(|(field, wanted_code)| {
                let Some(offered_code) = offered.get(field) else {
                    return false;
                };
                match (self.resolve(offered_code), self.resolve(wanted_code)) {
                    (Ok(o), Ok(w)) => o.code == w.code || self.is_compatible(&o, &w),
                    _ => false,
                }
            });
        }
        false
    }

    /// Whether `concept`'s refinement chain reaches `ancestor`
    pub fn refines(&self, concept: &Concept, ancestor: &str) -> bool {
        let mut seen = HashSet::new();
        let mut current = concept.refines.clone();
        while let Some(code) = current {
            if code == ancestor {
                return true;
            }
            if !seen.insert(code.clone()) {
                return false;
            }
            current = self.resolve(&code).ok().and_then(|c| c.refines.clone());
        }
        false
    }

    /// Whether values of this concept can be rendered as text
    pub fn reduces_to_text(&self, concept: &Concept, seen: &mut HashSet<String>) -> bool {
        if concept.is_native(NativeConcept::Text)
            || self.refines(concept, &NativeConcept::Text.code())
        {
            return true;
        }
        if !seen.insert(concept.code.clone()) {
            return false;
        }
        match &concept.structure {
            Some(fields) if !fields.is_empty() => fields.values().all(|code| {
                self.resolve(code)
                    .map(|field| self.reduces_to_text(&field, seen))
                    .unwrap_or(false)
            }),
            _ => false,
        }
    }

    /// The native kind a concept ultimately stores its content as
    ///
    /// Follows the refinement chain; structured and unrooted concepts return `None`.
    pub fn native_root(&self, concept: &Concept) -> Option<NativeConcept> {
        let mut seen = HashSet::new();
        let mut current = Some(Arc::new(concept.clone()));
        while let Some(c) = current {
            if c.native.is_some() {
                return c.native;
            }
            if c.structure.is_some() || !seen.insert(c.code.clone()) {
                return None;
            }
            current = c.refines.as_deref().and_then(|code| self.resolve(code).ok());
        }
        None
    }

    /// Effective structure, inherited through refinement when not declared
    pub fn structure_of(&self, concept: &Concept) -> Option<IndexMap<String, String>> {
        let mut seen = HashSet::new();
        let mut current = Some(Arc::new(concept.clone()));
        while let Some(c) = current {
            if let Some(structure) = &c.structure {
                return Some(structure.clone());
            }
            if !seen.insert(c.code.clone()) {
                return None;
            }
            current = c.refines.as_deref().and_then(|code| self.resolve(code).ok());
        }
        None
    }

    /// Check that every reference resolves and that no concept contains itself
    pub fn validate(&self) -> PipeResult<()> {
        for concept in self.concepts.values() {
            if let Some(parent) = &concept.refines {
                self.resolve(parent)?;
            }
            if let Some(structure) = &concept.structure {
                for code in structure.values() {
                    self.resolve(code)?;
                }
            }
        }

        let mut visited = HashSet::new();
        for code in self.concepts.keys() {
            let mut stack = Vec::new();
            self.check_cycles(code, &mut visited, &mut stack)?;
        }
        Ok(())
    }

    fn check_cycles(
        &self,
        code: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> PipeResult<()> {
        if stack.iter().any(|c| c == code) {
            return Err(PipeError::InvalidContent {
                concept: code.to_string(),
                reason: format!("concept contains itself via {}", stack.join(" -> ")),
            });
        }
        if visited.contains(code) {
            return Ok(());
        }

        stack.push(code.to_string());
        if let Some(concept) = self.concepts.get(code) {
            let children = concept
                .structure
                .iter()
                .flat_map(|s| s.values())
                .chain(concept.refines.iter());
            for child in children {
                self.check_cycles(child, visited, stack)?;
            }
        }
        stack.pop();
        visited.insert(code.to_string());
        Ok(())
    }
}

impl Default for ConceptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
