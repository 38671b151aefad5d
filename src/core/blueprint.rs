//! Blueprints - canonical, immutable pipe descriptions
//!
//! A blueprint is what the compiler consumes. It is produced from the
//! author-facing domain document (see [`crate::core::config`]) or built
//! directly in code.

use crate::core::template::TemplateCategory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Built-in no-op branch target for conditions
pub const CONTINUE_PIPE_CODE: &str = "continue";

/// Reference to a concept, possibly a list of it (`Text[]`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptRef {
    /// Concept code as written (may be bare)
    pub code: String,

    /// Whether a list of the concept is expected
    #[serde(default)]
    pub multiple: bool,
}

impl ConceptRef {
    pub fn single(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            multiple: false,
        }
    }

    pub fn list(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            multiple: true,
        }
    }

    /// Parse the `Concept` / `Concept[]` shorthand
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_suffix("[]") {
            Some(code) => Self::list(code.trim()),
            None => Self::single(raw),
        }
    }
}

impl fmt::Display for ConceptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.multiple {
            write!(f, "{}[]", self.code)
        } else {
            write!(f, "{}", self.code)
        }
    }
}

/// Invocation of a child pipe from a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPipeCall {
    /// Code of the pipe to invoke
    pub pipe: String,

    /// Name the child's output is bound under
    pub result: String,

    /// Child input name -> name in the caller's memory; when empty the child
    /// reads its declared inputs under their own names
    #[serde(default)]
    pub inputs_from: IndexMap<String, String>,
}

impl SubPipeCall {
    pub fn new(pipe: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            pipe: pipe.into(),
            result: result.into(),
            inputs_from: IndexMap::new(),
        }
    }

    pub fn with_input(mut self, child_input: impl Into<String>, from: impl Into<String>) -> Self {
        self.inputs_from.insert(child_input.into(), from.into());
        self
    }
}

/// How a parallel controller builds its own output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ParallelOutputMode {
    /// The output of the branch bound under `result`
    Primary { result: String },
    /// A structured record of every branch output, keyed by result name
    Aggregate,
}

/// One `pipe_map` entry of a condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEntry {
    /// Expression value selecting this branch
    pub key: String,

    /// Pipe code to run
    pub pipe: String,
}

/// Kind-specific blueprint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlueprintKind {
    Llm {
        prompt: String,
        system_prompt: Option<String>,
        worker: String,
    },
    ImageGen {
        prompt: String,
        worker: String,
        /// Images requested per call; only meaningful for list outputs
        nb_images: Option<usize>,
    },
    Ocr {
        worker: String,
    },
    Template {
        template: String,
        category: TemplateCategory,
    },
    Sequence {
        steps: Vec<SubPipeCall>,
    },
    Parallel {
        branches: Vec<SubPipeCall>,
        output_mode: ParallelOutputMode,
    },
    Condition {
        expression: String,
        pipe_map: Vec<BranchEntry>,
        default_pipe_code: Option<String>,
    },
    SubPipe {
        call: SubPipeCall,
    },
}

impl BlueprintKind {
    /// Tag used in logs and CLI output
    pub fn type_name(&self) -> &'static str {
        match self {
            BlueprintKind::Llm { .. } => "PipeLLM",
            BlueprintKind::ImageGen { .. } => "PipeImgGen",
            BlueprintKind::Ocr { .. } => "PipeOcr",
            BlueprintKind::Template { .. } => "PipeJinja2",
            BlueprintKind::Sequence { .. } => "PipeSequence",
            BlueprintKind::Parallel { .. } => "PipeParallel",
            BlueprintKind::Condition { .. } => "PipeCondition",
            BlueprintKind::SubPipe { .. } => "PipeSubPipe",
        }
    }

    pub fn is_controller(&self) -> bool {
        matches!(
            self,
            BlueprintKind::Sequence { .. }
                | BlueprintKind::Parallel { .. }
                | BlueprintKind::Condition { .. }
                | BlueprintKind::SubPipe { .. }
        )
    }
}

/// Canonical description of one pipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeBlueprint {
    /// Unique pipe code
    pub code: String,

    /// Domain the pipe belongs to; bare concept codes resolve against it
    pub domain: String,

    #[serde(default)]
    pub definition: Option<String>,

    /// Input name -> required concept
    #[serde(default)]
    pub inputs: IndexMap<String, ConceptRef>,

    /// Declared output concept
    pub output: ConceptRef,

    /// Deadline for a single operator call, overriding engine defaults
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    pub kind: BlueprintKind,
}

impl PipeBlueprint {
    pub fn new(
        domain: impl Into<String>,
        code: impl Into<String>,
        output: ConceptRef,
        kind: BlueprintKind,
    ) -> Self {
        Self {
            code: code.into(),
            domain: domain.into(),
            definition: None,
            inputs: IndexMap::new(),
            output,
            timeout_secs: None,
            kind,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, concept: ConceptRef) -> Self {
        self.inputs.insert(name.into(), concept);
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Codes of every pipe this blueprint references directly
    pub fn child_codes(&self) -> Vec<&str> {
        match &self.kind {
            BlueprintKind::Sequence { steps } => steps.iter().map(|s| s.pipe.as_str()).collect(),
            BlueprintKind::Parallel { branches, .. } => {
                branches.iter().map(|b| b.pipe.as_str()).collect()
            }
            BlueprintKind::Condition {
                pipe_map,
                default_pipe_code,
                ..
            } => pipe_map
                .iter()
                .map(|e| e.pipe.as_str())
                .chain(default_pipe_code.as_deref())
                .collect(),
            BlueprintKind::SubPipe { call } => vec![call.pipe.as_str()],
            _ => Vec::new(),
        }
    }
}
