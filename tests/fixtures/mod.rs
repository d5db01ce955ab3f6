//! Shared scenario fixtures: a scripted compiler over a tiny class
//! model, plus a temp-dir project to drive the incremental engine
//! end-to-end.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln::{
    Access, AnalysisCallback, AnalysisStore, Annotations, CancelToken, ClassDefinition, ClassLike,
    CompileFailure, CompileOrder, CompileResult, CompileSetup, Compiler, DefinitionType,
    DependencyContext, DriverError, FileStamper, IncOptions, IncrementalCompile, Lazy, Modifiers,
    NoLookup, Output, SetupOptions, Structure, Type, UseScope, UseScopes,
};

#[derive(Clone, Debug)]
pub struct MemberSpec {
    pub name: String,
    pub tpe: String,
    pub implicit: bool,
}

#[derive(Clone, Debug)]
pub struct RefSpec {
    pub on: String,
    pub name: String,
}

/// One class in the scripted module.
#[derive(Clone, Debug)]
pub struct ClassSpec {
    pub name: String,
    pub members: Vec<MemberSpec>,
    pub parents: Vec<String>,
    pub local_parents: Vec<String>,
    pub refs: Vec<RefSpec>,
    pub sealed_children: Vec<String>,
    pub is_macro: bool,
    /// Implementation detail only: changes the source text without
    /// changing the API.
    pub body: String,
}

impl ClassSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
            parents: Vec::new(),
            local_parents: Vec::new(),
            refs: Vec::new(),
            sealed_children: Vec::new(),
            is_macro: false,
            body: String::new(),
        }
    }

    pub fn val(mut self, name: &str, tpe: &str) -> Self {
        self.members.push(MemberSpec {
            name: name.to_string(),
            tpe: tpe.to_string(),
            implicit: false,
        });
        self
    }

    pub fn implicit_val(mut self, name: &str, tpe: &str) -> Self {
        self.members.push(MemberSpec {
            name: name.to_string(),
            tpe: tpe.to_string(),
            implicit: true,
        });
        self
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.parents.push(parent.to_string());
        self
    }

    pub fn extends_locally(mut self, parent: &str) -> Self {
        self.local_parents.push(parent.to_string());
        self
    }

    /// Reference a member `name` of `on`.
    pub fn uses(mut self, on: &str, name: &str) -> Self {
        self.refs.push(RefSpec {
            on: on.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn sealed_with(mut self, children: &[&str]) -> Self {
        self.sealed_children = children.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_macro(mut self) -> Self {
        self.is_macro = true;
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    fn render(&self, out: &mut String) {
        writeln!(out, "class {} {{", self.name).expect("render");
        for parent in self.parents.iter().chain(&self.local_parents) {
            writeln!(out, "  extends {parent}").expect("render");
        }
        for member in &self.members {
            writeln!(out, "  val {}: {}", member.name, member.tpe).expect("render");
        }
        for reference in &self.refs {
            writeln!(out, "  use {}.{}", reference.on, reference.name).expect("render");
        }
        if !self.body.is_empty() {
            writeln!(out, "  // {}", self.body).expect("render");
        }
        writeln!(out, "}}").expect("render");
    }

    fn to_class_like(&self) -> ClassLike {
        let declared = self
            .members
            .iter()
            .map(|member| ClassDefinition::Val {
                name: Arc::from(member.name.as_str()),
                access: Access::Public,
                modifiers: Modifiers {
                    is_implicit: member.implicit,
                    ..Modifiers::default()
                },
                annotations: Annotations::default(),
                tpe: Type::ParameterRef {
                    id: Arc::from(member.tpe.as_str()),
                },
            })
            .collect();
        let parents = self
            .parents
            .iter()
            .chain(&self.local_parents)
            .map(|parent| Type::ParameterRef {
                id: Arc::from(parent.as_str()),
            })
            .collect();
        ClassLike {
            name: Arc::from(self.name.as_str()),
            access: Access::Public,
            modifiers: Modifiers {
                is_sealed: !self.sealed_children.is_empty(),
                is_macro: self.is_macro,
                ..Modifiers::default()
            },
            annotations: Annotations::default(),
            definition_type: DefinitionType::ClassDef,
            self_type: Lazy::strict(Type::EmptyType),
            structure: Lazy::strict(Structure::strict(parents, declared, Vec::new())),
            saved_annotations: Vec::new(),
            children_of_sealed: self
                .sealed_children
                .iter()
                .map(|child| Type::ParameterRef {
                    id: Arc::from(child.as_str()),
                })
                .collect(),
            type_parameters: Vec::new(),
            top_level: true,
        }
    }
}

/// Scripted compiler: replays the project's class specs as callback
/// events and writes product files under the output directory.
pub struct FakeCompiler {
    specs: BTreeMap<PathBuf, Vec<ClassSpec>>,
    out: PathBuf,
    pub fail_with: Option<String>,
}

impl Compiler for FakeCompiler {
    fn compile(
        &mut self,
        sources: &[PathBuf],
        callback: &mut dyn AnalysisCallback,
    ) -> Result<(), CompileFailure> {
        if let Some(reason) = &self.fail_with {
            return Err(CompileFailure::new(reason.clone()));
        }
        let violation = |err| CompileFailure::new(format!("callback violation: {err}"));

        // First pass: register sources, products, and APIs so that
        // dependency classification sees the whole batch.
        for source in sources {
            callback.start_source(source).map_err(violation)?;
            let Some(specs) = self.specs.get(source) else {
                continue;
            };
            for spec in specs {
                let class_file = self.out.join(format!("{}.class", spec.name));
                let mut rendered = String::new();
                spec.render(&mut rendered);
                fs::write(&class_file, rendered)
                    .map_err(|err| CompileFailure::new(format!("write product: {err}")))?;
                callback
                    .generated_non_local_class(source, &class_file, &spec.name, &spec.name)
                    .map_err(violation)?;
                callback
                    .api(source, spec.to_class_like())
                    .map_err(violation)?;
            }
        }

        // Second pass: dependencies and used names.
        for source in sources {
            callback.start_source(source).map_err(violation)?;
            let Some(specs) = self.specs.get(source) else {
                continue;
            };
            for spec in specs {
                for parent in &spec.parents {
                    callback
                        .class_dependency(parent, &spec.name, DependencyContext::Inheritance)
                        .map_err(violation)?;
                }
                for parent in &spec.local_parents {
                    callback
                        .class_dependency(parent, &spec.name, DependencyContext::LocalInheritance)
                        .map_err(violation)?;
                }
                for reference in &spec.refs {
                    callback
                        .class_dependency(&reference.on, &spec.name, DependencyContext::MemberRef)
                        .map_err(violation)?;
                    callback
                        .used_name(&spec.name, &reference.name, UseScopes::of(UseScope::Default))
                        .map_err(violation)?;
                }
            }
        }
        Ok(())
    }
}

/// A temp-dir project the tests mutate between runs.
pub struct Project {
    dir: tempfile::TempDir,
    out: PathBuf,
    specs: BTreeMap<PathBuf, Vec<ClassSpec>>,
    pub compiler_version: String,
    pub fail_next_compile: Option<String>,
    pub cancel: CancelToken,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        fs::create_dir_all(&out).expect("out dir");
        fs::create_dir_all(dir.path().join("src")).expect("src dir");
        Self {
            dir,
            out,
            specs: BTreeMap::new(),
            compiler_version: "2.12.0".to_string(),
            fail_next_compile: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn source_path(&self, stem: &str) -> PathBuf {
        self.dir.path().join("src").join(format!("{stem}.scala"))
    }

    /// Define (or redefine) the classes of one source file and write
    /// its rendered text to disk.
    pub fn set_source(&mut self, stem: &str, classes: Vec<ClassSpec>) {
        let path = self.source_path(stem);
        let mut rendered = String::new();
        for class in &classes {
            class.render(&mut rendered);
        }
        fs::write(&path, rendered).expect("write source");
        self.specs.insert(path, classes);
    }

    pub fn remove_source(&mut self, stem: &str) {
        let path = self.source_path(stem);
        let _ = fs::remove_file(&path);
        self.specs.remove(&path);
    }

    pub fn delete_product(&self, class: &str) {
        fs::remove_file(self.out.join(format!("{class}.class"))).expect("delete product");
    }

    pub fn sources(&self) -> BTreeSet<PathBuf> {
        self.specs.keys().cloned().collect()
    }

    pub fn store(&self) -> AnalysisStore {
        AnalysisStore::new(self.dir.path().join("analysis.bin"))
    }

    pub fn store_bytes(&self) -> Vec<u8> {
        fs::read(self.dir.path().join("analysis.bin")).expect("store bytes")
    }

    pub fn setup(&self) -> CompileSetup {
        CompileSetup {
            output: Output::Single(self.out.clone()),
            options: SetupOptions::default(),
            compiler_version: self.compiler_version.clone(),
            compile_order: CompileOrder::Mixed,
            store_apis: true,
            extra: Vec::new(),
        }
    }

    pub fn run(&mut self, options: &IncOptions) -> Result<CompileResult, DriverError> {
        let store = self.store();
        let mut compiler = FakeCompiler {
            specs: self.specs.clone(),
            out: self.out.clone(),
            fail_with: self.fail_next_compile.take(),
        };
        IncrementalCompile {
            sources: self.sources(),
            setup: self.setup(),
            options: options.clone(),
            compiler: &mut compiler,
            stamper: &FileStamper,
            lookup: &NoLookup,
            store: &store,
            cancel: self.cancel.clone(),
        }
        .run()
    }

    /// Run and unwrap, asserting the universal invariants afterwards.
    pub fn run_ok(&mut self, options: &IncOptions) -> CompileResult {
        let result = self.run(options).expect("compile succeeds");
        result.analysis.verify().expect("analysis invariants hold");
        result
    }
}

/// Names of the sources the run recompiled, by stem.
pub fn recompiled_stems(project: &Project, result: &CompileResult) -> BTreeSet<String> {
    result
        .recompiled
        .iter()
        .filter_map(|path| {
            path.strip_prefix(project_src_dir(project))
                .ok()
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .collect()
}

fn project_src_dir(project: &Project) -> PathBuf {
    project.source_path("x").parent().expect("src dir").to_path_buf()
}
