//! Pipe library - the concepts and blueprints available to the compiler

use crate::core::blueprint::{PipeBlueprint, CONTINUE_PIPE_CODE};
use crate::core::concept::{Concept, ConceptRegistry};
use crate::core::config::DomainConfig;
use crate::core::error::{PipeError, PipeResult};
use anyhow::Context;
use indexmap::IndexMap;
use std::path::Path;
use tracing::debug;

/// Registry of concepts plus every known blueprint, keyed by pipe code
#[derive(Debug, Clone, Default)]
pub struct PipeLibrary {
    registry: ConceptRegistry,
    blueprints: IndexMap<String, PipeBlueprint>,
    domains: Vec<String>,
}

impl PipeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge several domain files
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> anyhow::Result<Self> {
        let mut library = Self::new();
        for path in paths {
            let path = path.as_ref();
            let config = DomainConfig::from_file(path)?;
            library
                .load_domain(&config)
                .with_context(|| format!("Failed to load domain file {}", path.display()))?;
        }
        library.validate()?;
        Ok(library)
    }

    /// Register every concept and blueprint of a domain document
    pub fn load_domain(&mut self, config: &DomainConfig) -> PipeResult<()> {
        for concept in config.to_concepts() {
            self.add_concept(concept)?;
        }
        for blueprint in config.to_blueprints() {
            self.add_blueprint(blueprint)?;
        }
        if !self.domains.contains(&config.domain) {
            self.domains.push(config.domain.clone());
        }
        debug!(
            "Loaded domain '{}' ({} concepts, {} pipes)",
            config.domain,
            config.concepts.len(),
            config.pipes.len()
        );
        Ok(())
    }

    pub fn add_concept(&mut self, concept: Concept) -> PipeResult<()> {
        self.registry.register(concept).map(|_| ())
    }

    /// Add a blueprint; pipe codes are unique across the whole library
    pub fn add_blueprint(&mut self, blueprint: PipeBlueprint) -> PipeResult<()> {
        if blueprint.code == CONTINUE_PIPE_CODE {
            return Err(PipeError::InvalidBlueprint {
                pipe: blueprint.code,
                reason: "code is reserved for the built-in pass-through".to_string(),
            });
        }
        if self.blueprints.contains_key(&blueprint.code) {
            return Err(PipeError::InvalidBlueprint {
                pipe: blueprint.code,
                reason: "pipe code is already declared".to_string(),
            });
        }
        self.blueprints.insert(blueprint.code.clone(), blueprint);
        Ok(())
    }

    /// Check concept references once every domain has been loaded
    pub fn validate(&self) -> PipeResult<()> {
        self.registry.validate()
    }

    pub fn get(&self, code: &str) -> Option<&PipeBlueprint> {
        self.blueprints.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        code == CONTINUE_PIPE_CODE || self.blueprints.contains_key(code)
    }

    /// Pipe codes in declaration order
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.blueprints.keys().map(String::as_str)
    }

    pub fn blueprints(&self) -> impl Iterator<Item = &PipeBlueprint> {
        self.blueprints.values()
    }

    pub fn registry(&self) -> &ConceptRegistry {
        &self.registry
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}
