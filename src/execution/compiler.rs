//! Blueprint compiler
//!
//! Turns [`PipeBlueprint`]s into runnable [`Pipe`]s, resolving concepts and
//! child pipes and checking that the graph is well-typed. Compilation is
//! pure: a failure yields no pipe and touches nothing.

use crate::core::blueprint::{
    BlueprintKind, ConceptRef, ParallelOutputMode, PipeBlueprint, SubPipeCall, CONTINUE_PIPE_CODE,
};
use crate::core::concept::{Concept, ConceptRegistry, NativeConcept};
use crate::core::error::{PipeError, PipeResult};
use crate::core::expression::Expression;
use crate::core::library::PipeLibrary;
use crate::core::template::{Template, TemplateCategory};
use crate::execution::condition::{BranchTarget, Condition};
use crate::execution::operator::{Operator, OperatorKind};
use crate::execution::parallel::{Parallel, ParallelOutput};
use crate::execution::pipe::{ChildCall, InputRequirement, Pipe, PipeHeader};
use crate::execution::sequence::Sequence;
use crate::execution::sub_pipe::SubPipe;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Compiles pipes from one library, memoising every pipe it has built
pub struct PipeCompiler<'a> {
    library: &'a PipeLibrary,
    compiled: HashMap<String, Arc<Pipe>>,
    /// Codes currently being compiled, outermost first
    in_progress: Vec<String>,
}

impl<'a> PipeCompiler<'a> {
    pub fn new(library: &'a PipeLibrary) -> Self {
        Self {
            library,
            compiled: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Compile the pipe declared under `code`
    pub fn compile(&mut self, code: &str) -> PipeResult<Arc<Pipe>> {
        self.compile_reference("<library>", code)
    }

    /// Compile every pipe of the library, stopping at the first failure
    pub fn compile_all(&mut self) -> PipeResult<IndexMap<String, Arc<Pipe>>> {
        let library = self.library;
        library
            .codes()
            .map(|code| Ok((code.to_string(), self.compile(code)?)))
            .collect()
    }

    fn registry(&self) -> &'a ConceptRegistry {
        self.library.registry()
    }

    fn compile_reference(&mut self, from: &str, code: &str) -> PipeResult<Arc<Pipe>> {
        if let Some(pipe) = self.compiled.get(code) {
            return Ok(pipe.clone());
        }
        if let Some(start) = self.in_progress.iter().position(|c| c == code) {
            let mut path = self.in_progress[start..].to_vec();
            path.push(code.to_string());
            return Err(PipeError::CyclicPipeReference { path });
        }

        let library = self.library;
        let blueprint = library
            .get(code)
            .ok_or_else(|| PipeError::UnresolvedPipeReference {
                from: from.to_string(),
                code: code.to_string(),
            })?;

        self.in_progress.push(code.to_string());
        let result = self.compile_blueprint(blueprint);
        self.in_progress.pop();

        let pipe = Arc::new(result?);
        debug!("Compiled {} {}", pipe.kind_name(), code);
        self.compiled.insert(code.to_string(), pipe.clone());
        Ok(pipe)
    }

    fn compile_blueprint(&mut self, blueprint: &'a PipeBlueprint) -> PipeResult<Pipe> {
        let header = self.compile_header(blueprint)?;
        let timeout = blueprint.timeout_secs.map(Duration::from_secs);

        let pipe = match &blueprint.kind {
            BlueprintKind::Llm {
                prompt,
                system_prompt,
                worker,
            } => {
                let prompt = Template::new(prompt.clone(), TemplateCategory::LlmPrompt);
                check_variables(blueprint, "prompt", template_variables(blueprint, &prompt)?)?;
                let system_prompt = match system_prompt {
                    Some(source) => {
                        let template = Template::new(source.clone(), TemplateCategory::LlmPrompt);
                        check_variables(
                            blueprint,
                            "system prompt",
                            template_variables(blueprint, &template)?,
                        )?;
                        Some(template)
                    }
                    None => None,
                };
                Pipe::Operator(Operator {
                    header,
                    kind: OperatorKind::Llm {
                        prompt,
                        system_prompt,
                        worker: worker.clone(),
                    },
                    timeout,
                })
            }

            BlueprintKind::ImageGen {
                prompt,
                worker,
                nb_images,
            } => {
                let prompt = Template::new(prompt.clone(), TemplateCategory::LlmPrompt);
                check_variables(blueprint, "prompt", template_variables(blueprint, &prompt)?)?;
                self.require_root(&header, &[NativeConcept::Image], "an image concept")?;
                let nb_images = nb_images.unwrap_or(1);
                if nb_images == 0 || (nb_images > 1 && !header.output_multiple) {
                    return Err(invalid(
                        blueprint,
                        format!("nb_images = {} does not match output '{}'", nb_images, blueprint.output),
                    ));
                }
                Pipe::Operator(Operator {
                    header,
                    kind: OperatorKind::ImageGen {
                        prompt,
                        worker: worker.clone(),
                        nb_images,
                    },
                    timeout,
                })
            }

            BlueprintKind::Ocr { worker } => {
                let document = match header.inputs.as_slice() {
                    [input] if !input.multiple => input,
                    _ => {
                        return Err(invalid(
                            blueprint,
                            "OCR takes exactly one single document input".to_string(),
                        ))
                    }
                };
                let root = self.registry().native_root(&document.concept);
                if !matches!(root, Some(NativeConcept::Image) | Some(NativeConcept::Pdf)) {
                    return Err(invalid(
                        blueprint,
                        format!("input '{}' must be an image or a pdf", document.name),
                    ));
                }
                let document = document.name.clone();
                self.require_root(&header, &[NativeConcept::Text], "a text concept")?;
                Pipe::Operator(Operator {
                    header,
                    kind: OperatorKind::Ocr {
                        worker: worker.clone(),
                        document,
                    },
                    timeout,
                })
            }

            BlueprintKind::Template { template, category } => {
                let template = Template::new(template.clone(), *category);
                check_variables(blueprint, "template", template_variables(blueprint, &template)?)?;
                self.require_root(
                    &header,
                    &[NativeConcept::Text, NativeConcept::Anything],
                    "a text concept",
                )?;
                if header.output_multiple {
                    return Err(invalid(blueprint, "templates render a single text".to_string()));
                }
                Pipe::Operator(Operator {
                    header,
                    kind: OperatorKind::Template { template },
                    timeout,
                })
            }

            BlueprintKind::Sequence { steps } => {
                if steps.is_empty() {
                    return Err(invalid(blueprint, "sequence has no steps".to_string()));
                }
                let steps = self.compile_calls(blueprint, steps)?;
                if !steps.iter().any(|s| self.produces(&s.pipe, &header)) {
                    return Err(unsatisfiable(blueprint));
                }
                Pipe::Sequence(Sequence { header, steps })
            }

            BlueprintKind::Parallel {
                branches,
                output_mode,
            } => {
                if branches.is_empty() {
                    return Err(invalid(blueprint, "parallel has no branches".to_string()));
                }
                let mut results = HashSet::new();
                for branch in branches {
                    if !results.insert(branch.result.as_str()) {
                        return Err(invalid(
                            blueprint,
                            format!("result '{}' is bound by more than one branch", branch.result),
                        ));
                    }
                }
                let branches = self.compile_calls(blueprint, branches)?;
                let output = self.compile_parallel_output(blueprint, &header, &branches, output_mode)?;
                Pipe::Parallel(Parallel {
                    header,
                    branches,
                    output,
                })
            }

            BlueprintKind::Condition {
                expression,
                pipe_map,
                default_pipe_code,
            } => self.compile_condition(blueprint, header, expression, pipe_map, default_pipe_code)?,

            BlueprintKind::SubPipe { call } => {
                let child = self.compile_child(blueprint, &call.pipe)?;
                self.check_sub_pipe_inputs(blueprint, call, &child)?;
                if !self.produces(&child, &header) {
                    return Err(unsatisfiable(blueprint));
                }
                Pipe::SubPipe(SubPipe {
                    header,
                    call: ChildCall {
                        pipe: child,
                        result: call.result.clone(),
                    },
                    inputs_from: call.inputs_from.clone(),
                })
            }
        };

        Ok(pipe)
    }

    fn compile_header(&self, blueprint: &PipeBlueprint) -> PipeResult<PipeHeader> {
        let inputs = blueprint
            .inputs
            .iter()
            .map(|(name, concept_ref)| {
                Ok(InputRequirement {
                    name: name.clone(),
                    concept: self.resolve(blueprint, concept_ref)?,
                    multiple: concept_ref.multiple,
                })
            })
            .collect::<PipeResult<Vec<_>>>()?;

        Ok(PipeHeader {
            code: blueprint.code.clone(),
            domain: blueprint.domain.clone(),
            definition: blueprint.definition.clone(),
            inputs,
            output: self.resolve(blueprint, &blueprint.output)?,
            output_multiple: blueprint.output.multiple,
        })
    }

    fn resolve(&self, blueprint: &PipeBlueprint, concept: &ConceptRef) -> PipeResult<Arc<Concept>> {
        self.registry().resolve_in(&blueprint.domain, &concept.code)
    }

    fn compile_child(&mut self, blueprint: &PipeBlueprint, code: &str) -> PipeResult<Arc<Pipe>> {
        if code == CONTINUE_PIPE_CODE {
            return Err(invalid(
                blueprint,
                format!("'{}' can only be used as a condition branch", CONTINUE_PIPE_CODE),
            ));
        }
        self.compile_reference(&blueprint.code, code)
    }

    fn compile_calls(
        &mut self,
        blueprint: &PipeBlueprint,
        calls: &[SubPipeCall],
    ) -> PipeResult<Vec<ChildCall>> {
        calls
            .iter()
            .map(|call| {
                Ok(ChildCall {
                    pipe: self.compile_child(blueprint, &call.pipe)?,
                    result: call.result.clone(),
                })
            })
            .collect()
    }

    fn compile_parallel_output(
        &self,
        blueprint: &PipeBlueprint,
        header: &PipeHeader,
        branches: &[ChildCall],
        mode: &ParallelOutputMode,
    ) -> PipeResult<ParallelOutput> {
        let registry = self.registry();
        match mode {
            ParallelOutputMode::Primary { result } => {
                let primary = branches
                    .iter()
                    .find(|b| &b.result == result)
                    .ok_or_else(|| {
                        invalid(
                            blueprint,
                            format!("primary result '{}' is not a branch result", result),
                        )
                    })?;
                if !self.produces(&primary.pipe, header) {
                    return Err(unsatisfiable(blueprint));
                }
                Ok(ParallelOutput::Primary {
                    result: result.clone(),
                })
            }
            ParallelOutputMode::Aggregate => {
                if header.output_multiple {
                    return Err(unsatisfiable(blueprint));
                }
                if header.output.is_native(NativeConcept::Anything) {
                    return Ok(ParallelOutput::Aggregate);
                }
                let structure = registry
                    .structure_of(&header.output)
                    .ok_or_else(|| unsatisfiable(blueprint))?;
                for (field, code) in &structure {
                    let field_concept = registry.resolve(code)?;
                    let covered = branches.iter().any(|b| {
                        &b.result == field
                            && !b.pipe.output_multiple()
                            && registry.is_compatible(b.pipe.output_concept(), &field_concept)
                    });
                    if !covered {
                        return Err(unsatisfiable(blueprint));
                    }
                }
                Ok(ParallelOutput::Aggregate)
            }
        }
    }

    fn compile_condition(
        &mut self,
        blueprint: &PipeBlueprint,
        header: PipeHeader,
        expression: &str,
        pipe_map: &[crate::core::blueprint::BranchEntry],
        default_pipe_code: &Option<String>,
    ) -> PipeResult<Pipe> {
        let branch_map_error = |reason: String| PipeError::InvalidBranchMap {
            pipe: blueprint.code.clone(),
            reason,
        };

        if pipe_map.is_empty() {
            return Err(branch_map_error("pipe_map is empty".to_string()));
        }
        let mut keys = HashSet::new();
        for entry in pipe_map {
            if !keys.insert(entry.key.as_str()) {
                return Err(branch_map_error(format!("key '{}' is mapped twice", entry.key)));
            }
        }
        if let Some(default) = default_pipe_code {
            if !self.library.contains(default) {
                return Err(branch_map_error(format!(
                    "default_pipe_code '{}' is not a known pipe",
                    default
                )));
            }
        }

        let mut targets = IndexMap::new();
        for entry in pipe_map {
            targets.insert(entry.key.clone(), self.compile_target(blueprint, &entry.pipe)?);
        }
        let default = match default_pipe_code {
            Some(code) => Some(self.compile_target(blueprint, code)?),
            None => None,
        };
        for target in targets.values().chain(default.iter()) {
            if let BranchTarget::Pipe(pipe) = target {
                if !self.produces(pipe, &header) {
                    return Err(unsatisfiable(blueprint));
                }
            }
        }

        let expression = Expression::parse(expression)?;
        check_variables(blueprint, "expression", expression.references())?;

        Ok(Pipe::Condition(Condition {
            header,
            expression,
            pipe_map: targets,
            default,
        }))
    }

    fn compile_target(&mut self, blueprint: &PipeBlueprint, code: &str) -> PipeResult<BranchTarget> {
        if code == CONTINUE_PIPE_CODE {
            Ok(BranchTarget::Continue)
        } else {
            Ok(BranchTarget::Pipe(self.compile_reference(&blueprint.code, code)?))
        }
    }

    fn check_sub_pipe_inputs(
        &self,
        blueprint: &PipeBlueprint,
        call: &SubPipeCall,
        child: &Pipe,
    ) -> PipeResult<()> {
        for mapped in call.inputs_from.keys() {
            if !child.input_requirements().iter().any(|i| &i.name == mapped) {
                return Err(invalid(
                    blueprint,
                    format!("'{}' is not an input of '{}'", mapped, child.code()),
                ));
            }
        }
        for input in child.input_requirements() {
            let source = call
                .inputs_from
                .get(&input.name)
                .unwrap_or(&input.name);
            if !blueprint.inputs.contains_key(source) {
                return Err(invalid(
                    blueprint,
                    format!(
                        "child input '{}' is fed from '{}', which is not a declared input",
                        input.name, source
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Whether `child`'s output can stand in for the declared output
    fn produces(&self, child: &Pipe, header: &PipeHeader) -> bool {
        child.output_multiple() == header.output_multiple
            && self
                .registry()
                .is_compatible(child.output_concept(), &header.output)
    }

    fn require_root(
        &self,
        header: &PipeHeader,
        roots: &[NativeConcept],
        what: &str,
    ) -> PipeResult<()> {
        match self.registry().native_root(&header.output) {
            Some(root) if roots.contains(&root) => Ok(()),
            _ => Err(PipeError::InvalidBlueprint {
                pipe: header.code.clone(),
                reason: format!("output '{}' must be {}", header.output.code, what),
            }),
        }
    }
}

fn check_variables(blueprint: &PipeBlueprint, what: &str, names: Vec<String>) -> PipeResult<()> {
    match names.iter().find(|name| !blueprint.inputs.contains_key(*name)) {
        Some(name) => Err(invalid(
            blueprint,
            format!("{} references '{}', which is not a declared input", what, name),
        )),
        None => Ok(()),
    }
}

fn template_variables(blueprint: &PipeBlueprint, template: &Template) -> PipeResult<Vec<String>> {
    template
        .variables()
        .map_err(|error| invalid(blueprint, error.to_string()))
}

fn invalid(blueprint: &PipeBlueprint, reason: String) -> PipeError {
    PipeError::InvalidBlueprint {
        pipe: blueprint.code.clone(),
        reason,
    }
}

fn unsatisfiable(blueprint: &PipeBlueprint) -> PipeError {
    PipeError::UnsatisfiableOutput {
        pipe: blueprint.code.clone(),
        output: blueprint.output.to_string(),
    }
}
