//! Analysis encoder. Byte-for-byte symmetric with [`super::read`].

use std::io::Write;
use std::path::Path;

use crc32c::crc32c;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::core::{
    Access, AnalyzedClass, Analysis, Annotation, Annotations, Apis, ClassDefinition, ClassLike,
    Companions, CompileOrder, CompileSetup, Compilation, MethodParameter, Modifiers, ObjectPath,
    Output, ParameterList, ParameterModifier, PathComponent, Problem, Qualifier, Relation,
    Severity, SourceInfo, Stamp, Structure, Type, TypeParameter, Variance,
};

use super::interner::{put_varint, WriteDictionary};
use super::mappers::WriteMapper;
use super::{CodecError, Version, ANALYSIS_MAGIC, APIS_MAGIC};

/// Serializes analyses and apis into framed byte blobs, applying the
/// caller's write mappers on the way.
pub struct AnalysisWriter<'a> {
    mapper: &'a dyn WriteMapper,
}

impl<'a> AnalysisWriter<'a> {
    pub fn new(mapper: &'a dyn WriteMapper) -> Self {
        Self { mapper }
    }

    /// The analysis stream: setup + everything but APIs.
    pub fn write_analysis(
        &self,
        analysis: &Analysis,
        setup: &CompileSetup,
    ) -> Result<Vec<u8>, CodecError> {
        let mut enc = Encoder::new(self.mapper);
        enc.put_u8(1); // setup present
        enc.put_setup(setup)?;
        enc.put_u8(1); // analysis present
        enc.put_stamps(analysis)?;
        enc.put_relations(analysis)?;
        enc.put_source_infos(analysis)?;
        enc.put_compilations(&analysis.compilations)?;
        frame(ANALYSIS_MAGIC, &enc.finish())
    }

    /// The apis stream.
    pub fn write_apis(&self, apis: &Apis) -> Result<Vec<u8>, CodecError> {
        let mut enc = Encoder::new(self.mapper);
        for side in [&apis.internal, &apis.external] {
            enc.put_count(side.len());
            for class in side.values() {
                enc.put_analyzed_class(class);
            }
        }
        frame(APIS_MAGIC, &enc.finish())
    }
}

fn frame(magic: u32, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(payload)?;
    let compressed = gz.finish()?;

    let mut buf = Vec::with_capacity(super::FRAME_HEADER_LEN + compressed.len());
    buf.extend_from_slice(&magic.to_le_bytes());
    buf.extend_from_slice(&(Version::CURRENT as u16).to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32c(&compressed).to_le_bytes());
    buf.extend_from_slice(&compressed);
    Ok(buf)
}

struct Encoder<'a> {
    buf: Vec<u8>,
    dict: WriteDictionary,
    mapper: &'a dyn WriteMapper,
}

impl<'a> Encoder<'a> {
    fn new(mapper: &'a dyn WriteMapper) -> Self {
        Self {
            buf: Vec::new(),
            dict: WriteDictionary::new(),
            mapper,
        }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_count(&mut self, count: usize) {
        put_varint(&mut self.buf, count as u64);
    }

    fn put_str(&mut self, s: &str) {
        self.dict.put_str(&mut self.buf, s);
    }

    fn put_path(&mut self, path: &Path) -> Result<(), CodecError> {
        let s = path.to_str().ok_or_else(|| CodecError::NonUtf8Path {
            path: path.to_path_buf(),
        })?;
        self.put_str(s);
        Ok(())
    }

    fn put_stamp(&mut self, stamp: &Stamp) {
        match stamp {
            Stamp::Empty => self.put_u8(0),
            Stamp::Hash(hash) => {
                self.put_u8(1);
                self.buf.extend_from_slice(&hash.0);
            }
            Stamp::LastModified(millis) => {
                self.put_u8(2);
                self.put_i64(*millis);
            }
        }
    }

    // -- setup ---------------------------------------------------------

    fn put_setup(&mut self, setup: &CompileSetup) -> Result<(), CodecError> {
        self.put_output(&setup.output)?;
        self.put_count(setup.options.classpath_hash.len());
        for entry in &setup.options.classpath_hash {
            let mapped = self.mapper.map_classpath_entry(entry.file.clone());
            self.put_path(&mapped)?;
            self.put_i64(entry.hash);
        }
        self.put_count(setup.options.scalac_options.len());
        for option in &setup.options.scalac_options {
            let mapped = self.mapper.map_scalac_option(option.clone());
            self.put_str(&mapped);
        }
        self.put_count(setup.options.javac_options.len());
        for option in &setup.options.javac_options {
            let mapped = self.mapper.map_javac_option(option.clone());
            self.put_str(&mapped);
        }
        self.put_str(&setup.compiler_version);
        self.put_u8(match setup.compile_order {
            CompileOrder::Mixed => 0,
            CompileOrder::JavaThenScala => 1,
            CompileOrder::ScalaThenJava => 2,
        });
        self.put_bool(setup.store_apis);
        self.put_count(setup.extra.len());
        for (key, value) in &setup.extra {
            self.put_str(key);
            self.put_str(value);
        }
        Ok(())
    }

    fn put_output(&mut self, output: &Output) -> Result<(), CodecError> {
        match output {
            Output::Single(dir) => {
                self.put_u8(0);
                let mapped = self.mapper.map_output_dir(dir.clone());
                self.put_path(&mapped)
            }
            Output::Multiple(groups) => {
                self.put_u8(1);
                self.put_count(groups.len());
                for group in groups {
                    let source = self.mapper.map_source_dir(group.source_dir.clone());
                    self.put_path(&source)?;
                    let target = self.mapper.map_output_dir(group.target_dir.clone());
                    self.put_path(&target)?;
                }
                Ok(())
            }
        }
    }

    // -- stamps --------------------------------------------------------

    fn put_stamps(&mut self, analysis: &Analysis) -> Result<(), CodecError> {
        let stamps = &analysis.stamps;
        self.put_count(stamps.sources.len());
        for (file, stamp) in &stamps.sources {
            let mapped_stamp = self.mapper.map_source_stamp(file, *stamp);
            let mapped = self.mapper.map_source_file(file.clone());
            self.put_path(&mapped)?;
            self.put_stamp(&mapped_stamp);
        }
        self.put_count(stamps.products.len());
        for (file, stamp) in &stamps.products {
            let mapped_stamp = self.mapper.map_product_stamp(file, *stamp);
            let mapped = self.mapper.map_product_file(file.clone());
            self.put_path(&mapped)?;
            self.put_stamp(&mapped_stamp);
        }
        self.put_count(stamps.binaries.len());
        for (file, stamp) in &stamps.binaries {
            let mapped_stamp = self.mapper.map_binary_stamp(file, *stamp);
            let mapped = self.mapper.map_binary_file(file.clone());
            self.put_path(&mapped)?;
            self.put_stamp(&mapped_stamp);
        }
        Ok(())
    }

    // -- relations -----------------------------------------------------

    fn put_relations(&mut self, analysis: &Analysis) -> Result<(), CodecError> {
        let relations = &analysis.relations;
        self.put_path_path_relation(&relations.src_prod, PathRole::Source, PathRole::Product)?;
        self.put_path_path_relation(&relations.library_dep, PathRole::Source, PathRole::Binary)?;
        self.put_path_name_relation(&relations.library_class_name, PathRole::Binary)?;
        self.put_path_name_relation(&relations.classes, PathRole::Source)?;
        self.put_name_name_relation(&relations.product_class_name);
        for deps in [
            &relations.member_ref,
            &relations.inheritance,
            &relations.local_inheritance,
        ] {
            self.put_name_name_relation(&deps.internal);
            self.put_name_name_relation(&deps.external);
        }
        self.put_count(relations.names.len());
        for (class, used) in &relations.names {
            self.put_str(class);
            self.put_count(used.len());
            for (name, scopes) in used {
                self.put_str(name);
                self.put_u8(scopes.to_bits());
            }
        }
        Ok(())
    }

    fn map_role(&self, role: PathRole, path: &Path) -> std::path::PathBuf {
        match role {
            PathRole::Source => self.mapper.map_source_file(path.to_path_buf()),
            PathRole::Product => self.mapper.map_product_file(path.to_path_buf()),
            PathRole::Binary => self.mapper.map_binary_file(path.to_path_buf()),
        }
    }

    fn put_path_path_relation(
        &mut self,
        relation: &Relation<std::path::PathBuf, std::path::PathBuf>,
        key_role: PathRole,
        value_role: PathRole,
    ) -> Result<(), CodecError> {
        self.put_count(relation.forward_map().len());
        for (key, values) in relation.forward_map() {
            let mapped_key = self.map_role(key_role, key);
            self.put_path(&mapped_key)?;
            self.put_count(values.len());
            for value in values {
                let mapped_value = self.map_role(value_role, value);
                self.put_path(&mapped_value)?;
            }
        }
        Ok(())
    }

    fn put_path_name_relation(
        &mut self,
        relation: &Relation<std::path::PathBuf, crate::core::Name>,
        key_role: PathRole,
    ) -> Result<(), CodecError> {
        self.put_count(relation.forward_map().len());
        for (key, values) in relation.forward_map() {
            let mapped_key = self.map_role(key_role, key);
            self.put_path(&mapped_key)?;
            self.put_count(values.len());
            for value in values {
                self.put_str(value);
            }
        }
        Ok(())
    }

    fn put_name_name_relation(&mut self, relation: &Relation<crate::core::Name, crate::core::Name>) {
        self.put_count(relation.forward_map().len());
        for (key, values) in relation.forward_map() {
            self.put_str(key);
            self.put_count(values.len());
            for value in values {
                self.put_str(value);
            }
        }
    }

    // -- source infos --------------------------------------------------

    fn put_source_infos(&mut self, analysis: &Analysis) -> Result<(), CodecError> {
        self.put_count(analysis.source_infos.len());
        for (source, info) in &analysis.source_infos {
            let mapped = self.mapper.map_source_file(source.clone());
            self.put_path(&mapped)?;
            self.put_source_info(info);
        }
        Ok(())
    }

    fn put_source_info(&mut self, info: &SourceInfo) {
        for problems in [&info.reported_problems, &info.unreported_problems] {
            self.put_count(problems.len());
            for problem in problems {
                self.put_problem(problem);
            }
        }
        self.put_count(info.main_classes.len());
        for class in &info.main_classes {
            self.put_str(class);
        }
    }

    fn put_problem(&mut self, problem: &Problem) {
        self.put_str(&problem.category);
        self.put_u8(match problem.severity {
            Severity::Info => 0,
            Severity::Warn => 1,
            Severity::Error => 2,
        });
        self.put_str(&problem.message);
        let position = &problem.position;
        self.put_i32(position.line);
        self.put_i32(position.offset);
        self.put_i32(position.pointer);
        self.put_str(&position.line_content);
        self.put_str(&position.source_path);
    }

    fn put_compilations(&mut self, compilations: &[Compilation]) -> Result<(), CodecError> {
        self.put_count(compilations.len());
        for compilation in compilations {
            self.put_i64(compilation.start_time_ms);
            self.put_output(&compilation.output)?;
        }
        Ok(())
    }

    // -- apis ----------------------------------------------------------

    fn put_analyzed_class(&mut self, class: &AnalyzedClass) {
        self.put_str(&class.name);
        self.put_i64(class.compilation_timestamp);
        self.put_i64(class.api_hash);
        self.put_bool(class.has_macro);
        self.put_count(class.name_hashes.len());
        for hash in &class.name_hashes {
            self.put_str(&hash.name);
            self.put_u8(hash.scope.to_tag());
            self.put_i32(hash.hash);
        }
        // Self-contained companion block with its own dictionary, so
        // the reader can defer it without desynchronising the stream
        // dictionary.
        let block = encode_companions_block(class.api.force());
        self.put_count(block.len());
        self.buf.extend_from_slice(&block);
    }
}

#[derive(Clone, Copy)]
enum PathRole {
    Source,
    Product,
    Binary,
}

/// Encode `Companions` into a self-contained block (fresh dictionary).
pub(super) fn encode_companions_block(companions: &Companions) -> Vec<u8> {
    let mut block = BlockEncoder {
        buf: Vec::new(),
        dict: WriteDictionary::new(),
    };
    block.put_class_like(&companions.class_api);
    block.put_class_like(&companions.object_api);
    block.buf
}

struct BlockEncoder {
    buf: Vec<u8>,
    dict: WriteDictionary,
}

impl BlockEncoder {
    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    fn put_count(&mut self, count: usize) {
        put_varint(&mut self.buf, count as u64);
    }

    fn put_str(&mut self, s: &str) {
        self.dict.put_str(&mut self.buf, s);
    }

    fn put_class_like(&mut self, api: &ClassLike) {
        self.put_str(&api.name);
        self.put_access(&api.access);
        self.put_u8(api.modifiers.to_bits());
        self.put_annotations(&api.annotations);
        self.put_u8(definition_type_tag(api.definition_type));
        self.put_type(api.self_type.force());
        self.put_structure(api.structure.force());
        self.put_count(api.saved_annotations.len());
        for name in &api.saved_annotations {
            self.put_str(name);
        }
        self.put_count(api.children_of_sealed.len());
        for child in &api.children_of_sealed {
            self.put_type(child);
        }
        self.put_type_parameters(&api.type_parameters);
        self.put_bool(api.top_level);
    }

    fn put_structure(&mut self, structure: &Structure) {
        let parents = structure.parents.force();
        self.put_count(parents.len());
        for parent in parents {
            self.put_type(parent);
        }
        for defs in [structure.declared.force(), structure.inherited.force()] {
            self.put_count(defs.len());
            for def in defs {
                self.put_definition(def);
            }
        }
    }

    fn put_access(&mut self, access: &Access) {
        match access {
            Access::Public => self.put_u8(0),
            Access::Protected(qualifier) => {
                self.put_u8(1);
                self.put_qualifier(qualifier);
            }
            Access::Private(qualifier) => {
                self.put_u8(2);
                self.put_qualifier(qualifier);
            }
        }
    }

    fn put_qualifier(&mut self, qualifier: &Qualifier) {
        match qualifier {
            Qualifier::Unqualified => self.put_u8(0),
            Qualifier::ThisQualifier => self.put_u8(1),
            Qualifier::IdQualifier(id) => {
                self.put_u8(2);
                self.put_str(id);
            }
        }
    }

    fn put_annotations(&mut self, annotations: &Annotations) {
        self.put_count(annotations.0.len());
        for annotation in annotations.iter() {
            self.put_annotation(annotation);
        }
    }

    fn put_annotation(&mut self, annotation: &Annotation) {
        self.put_type(&annotation.base);
        self.put_count(annotation.arguments.len());
        for argument in &annotation.arguments {
            self.put_str(&argument.name);
            self.put_str(&argument.value);
        }
    }

    fn put_type(&mut self, tpe: &Type) {
        match tpe {
            Type::ParameterRef { id } => {
                self.put_u8(0);
                self.put_str(id);
            }
            Type::Parameterized {
                base,
                type_arguments,
            } => {
                self.put_u8(1);
                self.put_type(base);
                self.put_count(type_arguments.len());
                for argument in type_arguments {
                    self.put_type(argument);
                }
            }
            Type::Structure(structure) => {
                self.put_u8(2);
                self.put_structure(structure);
            }
            Type::Polymorphic { base, parameters } => {
                self.put_u8(3);
                self.put_type(base);
                self.put_type_parameters(parameters);
            }
            Type::Constant { base, value } => {
                self.put_u8(4);
                self.put_type(base);
                self.put_str(value);
            }
            Type::Existential { base, clause } => {
                self.put_u8(5);
                self.put_type(base);
                self.put_type_parameters(clause);
            }
            Type::Singleton { path } => {
                self.put_u8(6);
                self.put_object_path(path);
            }
            Type::Projection { prefix, id } => {
                self.put_u8(7);
                self.put_type(prefix);
                self.put_str(id);
            }
            Type::Annotated { base, annotations } => {
                self.put_u8(8);
                self.put_type(base);
                self.put_annotations(annotations);
            }
            Type::EmptyType => self.put_u8(9),
        }
    }

    fn put_object_path(&mut self, path: &ObjectPath) {
        self.put_count(path.components.len());
        for component in &path.components {
            match component {
                PathComponent::Id(id) => {
                    self.put_u8(0);
                    self.put_str(id);
                }
                PathComponent::This => self.put_u8(1),
                PathComponent::Super(qualifier) => {
                    self.put_u8(2);
                    self.put_object_path(qualifier);
                }
            }
        }
    }

    fn put_type_parameters(&mut self, parameters: &[TypeParameter]) {
        self.put_count(parameters.len());
        for parameter in parameters {
            self.put_str(&parameter.id);
            self.put_annotations(&parameter.annotations);
            self.put_type_parameters(&parameter.type_parameters);
            self.put_u8(match parameter.variance {
                Variance::Invariant => 0,
                Variance::Covariant => 1,
                Variance::Contravariant => 2,
            });
            self.put_type(&parameter.lower_bound);
            self.put_type(&parameter.upper_bound);
        }
    }

    fn put_parameter_list(&mut self, list: &ParameterList) {
        self.put_bool(list.is_implicit);
        self.put_count(list.parameters.len());
        for parameter in &list.parameters {
            self.put_method_parameter(parameter);
        }
    }

    fn put_method_parameter(&mut self, parameter: &MethodParameter) {
        self.put_str(&parameter.name);
        self.put_type(&parameter.tpe);
        self.put_bool(parameter.has_default);
        self.put_u8(match parameter.modifier {
            ParameterModifier::Plain => 0,
            ParameterModifier::Repeated => 1,
            ParameterModifier::ByName => 2,
        });
    }

    fn put_def_header(
        &mut self,
        name: &str,
        access: &Access,
        modifiers: Modifiers,
        annotations: &Annotations,
    ) {
        self.put_str(name);
        self.put_access(access);
        self.put_u8(modifiers.to_bits());
        self.put_annotations(annotations);
    }

    fn put_definition(&mut self, def: &ClassDefinition) {
        match def {
            ClassDefinition::Def {
                name,
                access,
                modifiers,
                annotations,
                type_parameters,
                value_parameters,
                return_type,
            } => {
                self.put_u8(0);
                self.put_def_header(name, access, *modifiers, annotations);
                self.put_type_parameters(type_parameters);
                self.put_count(value_parameters.len());
                for list in value_parameters {
                    self.put_parameter_list(list);
                }
                self.put_type(return_type);
            }
            ClassDefinition::Val {
                name,
                access,
                modifiers,
                annotations,
                tpe,
            } => {
                self.put_u8(1);
                self.put_def_header(name, access, *modifiers, annotations);
                self.put_type(tpe);
            }
            ClassDefinition::Var {
                name,
                access,
                modifiers,
                annotations,
                tpe,
            } => {
                self.put_u8(2);
                self.put_def_header(name, access, *modifiers, annotations);
                self.put_type(tpe);
            }
            ClassDefinition::TypeAlias {
                name,
                access,
                modifiers,
                annotations,
                type_parameters,
                tpe,
            } => {
                self.put_u8(3);
                self.put_def_header(name, access, *modifiers, annotations);
                self.put_type_parameters(type_parameters);
                self.put_type(tpe);
            }
            ClassDefinition::TypeDeclaration {
                name,
                access,
                modifiers,
                annotations,
                type_parameters,
                lower_bound,
                upper_bound,
            } => {
                self.put_u8(4);
                self.put_def_header(name, access, *modifiers, annotations);
                self.put_type_parameters(type_parameters);
                self.put_type(lower_bound);
                self.put_type(upper_bound);
            }
            ClassDefinition::ClassLikeDef {
                name,
                access,
                modifiers,
                annotations,
                definition_type,
            } => {
                self.put_u8(5);
                self.put_def_header(name, access, *modifiers, annotations);
                self.put_u8(definition_type_tag(*definition_type));
            }
        }
    }
}

pub(super) fn definition_type_tag(definition_type: crate::core::DefinitionType) -> u8 {
    use crate::core::DefinitionType;
    match definition_type {
        DefinitionType::ClassDef => 0,
        DefinitionType::Module => 1,
        DefinitionType::Trait => 2,
        DefinitionType::PackageModule => 3,
    }
}
