//! Domain documents loaded from YAML
//!
//! A domain document declares concepts and pipes for one domain. It is the
//! author-facing form; [`DomainConfig::to_blueprints`] converts it into the
//! canonical [`PipeBlueprint`]s the compiler consumes.

use crate::core::blueprint::{
    BlueprintKind, BranchEntry, ConceptRef, ParallelOutputMode, PipeBlueprint, SubPipeCall,
    CONTINUE_PIPE_CODE,
};
use crate::core::concept::{qualify_code, Concept, NativeConcept, NATIVE_DOMAIN};
use crate::core::template::TemplateCategory;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default worker handles used when a pipe does not name one
pub const DEFAULT_LLM_HANDLE: &str = "llm";
pub const DEFAULT_IMG_GEN_HANDLE: &str = "img_gen";
pub const DEFAULT_OCR_HANDLE: &str = "ocr";

/// Top-level domain document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain code; bare concept names are qualified with it
    pub domain: String,

    #[serde(default)]
    pub definition: Option<String>,

    /// Default deadline for operator calls in this domain (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Concept name -> declaration
    #[serde(default)]
    pub concepts: IndexMap<String, ConceptSpec>,

    /// Pipe code -> declaration
    #[serde(default)]
    pub pipes: IndexMap<String, PipeSpec>,
}

/// Concept declaration
///
/// A bare string is a description of a concept that refines `Text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConceptSpec {
    Description(String),
    Detailed(ConceptDetail),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptDetail {
    #[serde(default)]
    pub description: Option<String>,

    /// Field name -> concept code
    #[serde(default)]
    pub structure: Option<IndexMap<String, String>>,

    #[serde(default)]
    pub refines: Option<String>,
}

/// Pipe declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeSpec {
    #[serde(default)]
    pub definition: Option<String>,

    /// Input name -> concept (`Concept` or `Concept[]`)
    #[serde(default)]
    pub inputs: IndexMap<String, String>,

    pub output: String,

    /// Deadline for this pipe's operator call (overrides the domain default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(flatten)]
    pub kind: PipeKindSpec,
}

/// Kind-specific pipe fields, selected by the `type` tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipeKindSpec {
    #[serde(rename = "PipeLLM")]
    Llm {
        prompt: String,
        #[serde(default)]
        system_prompt: Option<String>,
        #[serde(default = "default_llm")]
        llm: String,
    },
    #[serde(rename = "PipeImgGen")]
    ImgGen {
        prompt: String,
        #[serde(default = "default_img_gen")]
        img_gen: String,
        #[serde(default)]
        nb_images: Option<usize>,
    },
    #[serde(rename = "PipeOcr")]
    Ocr {
        #[serde(default = "default_ocr")]
        ocr: String,
    },
    #[serde(rename = "PipeJinja2")]
    Jinja2 {
        jinja2: String,
        #[serde(default)]
        template_category: TemplateCategory,
    },
    #[serde(rename = "PipeCondition")]
    Condition {
        #[serde(alias = "test_expression")]
        expression: String,
        #[serde(default)]
        pipe_map: IndexMap<String, String>,
        #[serde(default)]
        default_pipe_code: Option<String>,
    },
    #[serde(rename = "PipeSequence")]
    Sequence { steps: Vec<SubPipeCall> },
    #[serde(rename = "PipeParallel")]
    Parallel {
        parallels: Vec<SubPipeCall>,
        output_mode: OutputModeSpec,
        #[serde(default)]
        primary_result: Option<String>,
    },
    #[serde(rename = "PipeSubPipe")]
    SubPipe {
        pipe: String,
        result: String,
        #[serde(default)]
        inputs_from: IndexMap<String, String>,
    },
}

/// Parallel output mode as written in YAML
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputModeSpec {
    Primary,
    Aggregate,
}

fn default_llm() -> String {
    DEFAULT_LLM_HANDLE.to_string()
}

fn default_img_gen() -> String {
    DEFAULT_IMG_GEN_HANDLE.to_string()
}

fn default_ocr() -> String {
    DEFAULT_OCR_HANDLE.to_string()
}

impl DomainConfig {
    /// Load a domain document from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read domain file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid domain file {}", path.display()))
    }

    /// Parse a domain document from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DomainConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the document's shape
    ///
    /// Pipe references and concept resolution are left to the compiler, so
    /// that a dangling reference fails only the pipes that use it.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            anyhow::bail!("Domain code must not be empty");
        }
        if self.domain == NATIVE_DOMAIN {
            anyhow::bail!("Domain '{}' is reserved for built-in concepts", NATIVE_DOMAIN);
        }
        if self.domain.contains('.') {
            anyhow::bail!("Domain code '{}' must not contain '.'", self.domain);
        }

        for name in self.concepts.keys() {
            if name.contains('.') {
                anyhow::bail!("Concept name '{}' must not contain '.'", name);
            }
            if NativeConcept::from_name(name).is_some() {
                anyhow::bail!("Concept '{}' shadows a built-in concept", name);
            }
        }

        for (code, pipe) in &self.pipes {
            if code == CONTINUE_PIPE_CODE {
                anyhow::bail!("Pipe code '{}' is reserved", CONTINUE_PIPE_CODE);
            }
            if pipe.output.trim().is_empty() {
                anyhow::bail!("Pipe '{}' has an empty output concept", code);
            }

            match &pipe.kind {
                PipeKindSpec::Sequence { steps } if steps.is_empty() => {
                    anyhow::bail!("Sequence '{}' has no steps", code);
                }
                PipeKindSpec::Parallel {
                    parallels,
                    output_mode,
                    primary_result,
                } => {
                    if parallels.is_empty() {
                        anyhow::bail!("Parallel '{}' has no branches", code);
                    }
                    let mut seen = std::collections::HashSet::new();
                    for branch in parallels {
                        if !seen.insert(&branch.result) {
                            anyhow::bail!(
                                "Parallel '{}' binds result '{}' more than once",
                                code,
                                branch.result
                            );
                        }
                    }
                    if *output_mode == OutputModeSpec::Primary && primary_result.is_none() {
                        anyhow::bail!(
                            "Parallel '{}' uses output_mode 'primary' but no primary_result is set",
                            code
                        );
                    }
                }
                PipeKindSpec::Condition { expression, .. } if expression.trim().is_empty() => {
                    anyhow::bail!("Condition '{}' has an empty expression", code);
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Concept declarations with fully qualified references
    pub fn to_concepts(&self) -> Vec<Concept> {
        self.concepts
            .iter()
            .map(|(name, spec)| {
                let concept = Concept::new(&self.domain, name);
                match spec {
                    ConceptSpec::Description(description) => concept
                        .with_description(description.clone())
                        .with_refines(NativeConcept::Text.code()),
                    ConceptSpec::Detailed(detail) => {
                        let mut concept = concept;
                        if let Some(description) = &detail.description {
                            concept = concept.with_description(description.clone());
                        }
                        if let Some(structure) = &detail.structure {
                            concept = concept.with_structure(
                                structure
                                    .iter()
                                    .map(|(field, code)| {
                                        (field.clone(), qualify_code(&self.domain, code))
                                    })
                                    .collect(),
                            );
                        }
                        if let Some(parent) = &detail.refines {
                            concept = concept.with_refines(qualify_code(&self.domain, parent));
                        }
                        // Neither structure nor parent: plain text-like concept
                        if detail.structure.is_none() && detail.refines.is_none() {
                            concept = concept.with_refines(NativeConcept::Text.code());
                        }
                        concept
                    }
                }
            })
            .collect()
    }

    /// Canonical blueprints for every declared pipe
    pub fn to_blueprints(&self) -> Vec<PipeBlueprint> {
        self.pipes
            .iter()
            .map(|(code, spec)| self.to_blueprint(code, spec))
            .collect()
    }

    fn to_blueprint(&self, code: &str, spec: &PipeSpec) -> PipeBlueprint {
        let kind = match &spec.kind {
            PipeKindSpec::Llm {
                prompt,
                system_prompt,
                llm,
            } => BlueprintKind::Llm {
                prompt: prompt.clone(),
                system_prompt: system_prompt.clone(),
                worker: llm.clone(),
            },
            PipeKindSpec::ImgGen {
                prompt,
                img_gen,
                nb_images,
            } => BlueprintKind::ImageGen {
                prompt: prompt.clone(),
                worker: img_gen.clone(),
                nb_images: *nb_images,
            },
            PipeKindSpec::Ocr { ocr } => BlueprintKind::Ocr { worker: ocr.clone() },
            PipeKindSpec::Jinja2 {
                jinja2,
                template_category,
            } => BlueprintKind::Template {
                template: jinja2.clone(),
                category: *template_category,
            },
            PipeKindSpec::Condition {
                expression,
                pipe_map,
                default_pipe_code,
            } => BlueprintKind::Condition {
                expression: expression.clone(),
                pipe_map: pipe_map
                    .iter()
                    .map(|(key, pipe)| BranchEntry {
                        key: key.clone(),
                        pipe: pipe.clone(),
                    })
                    .collect(),
                default_pipe_code: default_pipe_code.clone(),
            },
            PipeKindSpec::Sequence { steps } => BlueprintKind::Sequence {
                steps: steps.clone(),
            },
            PipeKindSpec::Parallel {
                parallels,
                output_mode,
                primary_result,
            } => BlueprintKind::Parallel {
                branches: parallels.clone(),
                output_mode: match output_mode {
                    OutputModeSpec::Primary => ParallelOutputMode::Primary {
                        result: primary_result.clone().unwrap_or_default(),
                    },
                    OutputModeSpec::Aggregate => ParallelOutputMode::Aggregate,
                },
            },
            PipeKindSpec::SubPipe {
                pipe,
                result,
                inputs_from,
            } => BlueprintKind::SubPipe {
                call: SubPipeCall {
                    pipe: pipe.clone(),
                    result: result.clone(),
                    inputs_from: inputs_from.clone(),
                },
            },
        };

        let mut blueprint =
            PipeBlueprint::new(&self.domain, code, ConceptRef::parse(&spec.output), kind);
        blueprint.definition = spec.definition.clone();
        blueprint.inputs = spec
            .inputs
            .iter()
            .map(|(name, concept)| (name.clone(), ConceptRef::parse(concept)))
            .collect();
        blueprint.timeout_secs = spec.timeout_secs.or(self.default_timeout_secs);
        blueprint
    }
}
