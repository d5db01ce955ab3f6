//! Analysis decoder. Byte-for-byte symmetric with [`super::write`].
//!
//! Companion blocks are not decoded here: each `AnalyzedClass.api`
//! becomes a thunk over its payload slice (the block carries its own
//! dictionary, so skipping it cannot desynchronise the stream). The
//! slice is released once forced.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use crc32c::crc32c;
use flate2::read::GzDecoder;

use crate::core::{
    Access, AnalyzedClass, Analysis, Annotation, AnnotationArgument, Annotations, Apis,
    ClassDefinition, ClassLike, Companions, CompileOrder, CompileSetup, Compilation, ContentHash,
    DefinitionType, FileHash, Interner, Lazy, MethodParameter, Modifiers, Name, NameHash,
    ObjectPath, Output, OutputGroup, ParameterList, ParameterModifier, PathComponent, Position,
    Problem, Qualifier, Relation, Relations, Severity, SetupOptions, SourceDependencies,
    SourceInfo, Stamp, Stamps, Structure, Type, TypeParameter, UseScope, UseScopes, Variance,
};

use super::interner::{read_varint, ReadDictionary};
use super::mappers::ReadMapper;
use super::{CodecError, Version, ANALYSIS_MAGIC, APIS_MAGIC, FRAME_HEADER_LEN};

/// Deserializes framed byte blobs, applying the caller's read mappers
/// on the way in.
pub struct AnalysisReader<'a> {
    mapper: &'a dyn ReadMapper,
}

impl<'a> AnalysisReader<'a> {
    pub fn new(mapper: &'a dyn ReadMapper) -> Self {
        Self { mapper }
    }

    /// The analysis stream. APIs come back empty; load them from the
    /// apis stream when needed.
    pub fn read_analysis(&self, bytes: &[u8]) -> Result<(Analysis, CompileSetup), CodecError> {
        let payload = unframe(ANALYSIS_MAGIC, bytes)?;
        let interner = Arc::new(Mutex::new(Interner::new()));
        let mut dec = Decoder::new(Bytes::from(payload), interner);

        if dec.get_u8("setup presence")? == 0 {
            return Err(CodecError::MissingField { field: "setup" });
        }
        let setup = dec.get_setup(self.mapper)?;
        if dec.get_u8("analysis presence")? == 0 {
            return Err(CodecError::MissingField { field: "analysis" });
        }
        let stamps = dec.get_stamps(self.mapper)?;
        let relations = dec.get_relations(self.mapper)?;
        let source_infos = dec.get_source_infos(self.mapper)?;
        let compilations = dec.get_compilations(self.mapper)?;
        dec.expect_end()?;

        Ok((
            Analysis {
                stamps,
                relations,
                apis: Apis::new(),
                source_infos,
                compilations,
            },
            setup,
        ))
    }

    /// The apis stream.
    pub fn read_apis(&self, bytes: &[u8]) -> Result<Apis, CodecError> {
        let payload = unframe(APIS_MAGIC, bytes)?;
        let interner = Arc::new(Mutex::new(Interner::new()));
        let mut dec = Decoder::new(Bytes::from(payload), interner);

        let mut apis = Apis::new();
        for side in [&mut apis.internal, &mut apis.external] {
            let count = dec.get_count("analyzed class count")?;
            for _ in 0..count {
                let class = dec.get_analyzed_class()?;
                side.insert(class.name.clone(), class);
            }
        }
        dec.expect_end()?;
        Ok(apis)
    }
}

fn unframe(magic: u32, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(CodecError::Truncated {
            what: "frame header",
        });
    }
    let got_magic = u32::from_le_bytes(bytes[0..4].try_into().expect("sized slice"));
    if got_magic != magic {
        return Err(CodecError::BadMagic {
            expected: magic,
            got: got_magic,
        });
    }
    let raw_version = u16::from_le_bytes(bytes[4..6].try_into().expect("sized slice"));
    if Version::from_raw(raw_version).is_none() {
        return Err(CodecError::UnsupportedVersion { got: raw_version });
    }
    let reserved = u16::from_le_bytes(bytes[6..8].try_into().expect("sized slice"));
    if reserved != 0 {
        return Err(CodecError::ReservedNonZero { got: reserved });
    }
    let length = u32::from_le_bytes(bytes[8..12].try_into().expect("sized slice")) as usize;
    let expected_crc = u32::from_le_bytes(bytes[12..16].try_into().expect("sized slice"));
    let body = &bytes[FRAME_HEADER_LEN..];
    if body.len() != length {
        return Err(CodecError::Truncated {
            what: "frame payload",
        });
    }
    let actual_crc = crc32c(body);
    if actual_crc != expected_crc {
        return Err(CodecError::CrcMismatch {
            expected: expected_crc,
            got: actual_crc,
        });
    }
    let mut decompressed = Vec::new();
    GzDecoder::new(body).read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

struct Decoder {
    bytes: Bytes,
    pos: usize,
    dict: ReadDictionary,
    interner: Arc<Mutex<Interner>>,
}

impl Decoder {
    fn new(bytes: Bytes, interner: Arc<Mutex<Interner>>) -> Self {
        Self {
            bytes,
            pos: 0,
            dict: ReadDictionary::new(Arc::clone(&interner)),
            interner,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn expect_end(&self) -> Result<(), CodecError> {
        if self.remaining() != 0 {
            return Err(CodecError::Truncated {
                what: "trailing bytes",
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&[u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated { what });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn get_u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, what)?[0])
    }

    fn get_bool(&mut self, what: &'static str) -> Result<bool, CodecError> {
        match self.get_u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            id => Err(CodecError::UnknownEnum { what, id }),
        }
    }

    fn get_i32(&mut self, what: &'static str) -> Result<i32, CodecError> {
        let slice = self.take(4, what)?;
        Ok(i32::from_le_bytes(slice.try_into().expect("sized slice")))
    }

    fn get_i64(&mut self, what: &'static str) -> Result<i64, CodecError> {
        let slice = self.take(8, what)?;
        Ok(i64::from_le_bytes(slice.try_into().expect("sized slice")))
    }

    fn get_count(&mut self, what: &'static str) -> Result<usize, CodecError> {
        let count = read_varint(&self.bytes, &mut self.pos, what)?;
        // Every encoded element occupies at least one byte, so a count
        // beyond the remaining payload is corruption, not data.
        if count > self.remaining() as u64 {
            return Err(CodecError::LengthOverrun { what, len: count });
        }
        Ok(count as usize)
    }

    fn get_name(&mut self, what: &'static str) -> Result<Name, CodecError> {
        self.dict.read_str(&self.bytes, &mut self.pos, what)
    }

    fn get_string(&mut self, what: &'static str) -> Result<String, CodecError> {
        Ok(self.get_name(what)?.to_string())
    }

    fn get_raw_path(&mut self, what: &'static str) -> Result<PathBuf, CodecError> {
        Ok(PathBuf::from(&*self.get_name(what)?))
    }

    fn get_stamp(&mut self, what: &'static str) -> Result<Stamp, CodecError> {
        match self.get_u8(what)? {
            0 => Ok(Stamp::Empty),
            1 => {
                let slice = self.take(32, what)?;
                Ok(Stamp::Hash(ContentHash(
                    slice.try_into().expect("sized slice"),
                )))
            }
            2 => Ok(Stamp::LastModified(self.get_i64(what)?)),
            id => Err(CodecError::UnknownEnum { what, id }),
        }
    }

    // -- setup ---------------------------------------------------------

    fn get_setup(&mut self, mapper: &dyn ReadMapper) -> Result<CompileSetup, CodecError> {
        let output = self.get_output(mapper)?;
        let mut classpath_hash = Vec::new();
        for _ in 0..self.get_count("classpath hash count")? {
            let file = mapper.map_classpath_entry(self.get_raw_path("classpath entry")?);
            let hash = self.get_i64("classpath hash")?;
            classpath_hash.push(FileHash { file, hash });
        }
        let mut scalac_options = Vec::new();
        for _ in 0..self.get_count("scalac option count")? {
            scalac_options.push(mapper.map_scalac_option(self.get_string("scalac option")?));
        }
        let mut javac_options = Vec::new();
        for _ in 0..self.get_count("javac option count")? {
            javac_options.push(mapper.map_javac_option(self.get_string("javac option")?));
        }
        let compiler_version = self.get_string("compiler version")?;
        let compile_order = match self.get_u8("compile order")? {
            0 => CompileOrder::Mixed,
            1 => CompileOrder::JavaThenScala,
            2 => CompileOrder::ScalaThenJava,
            id => {
                return Err(CodecError::UnknownEnum {
                    what: "compile order",
                    id,
                })
            }
        };
        let store_apis = self.get_bool("store apis flag")?;
        let mut extra = Vec::new();
        for _ in 0..self.get_count("extra count")? {
            let key = self.get_string("extra key")?;
            let value = self.get_string("extra value")?;
            extra.push((key, value));
        }
        Ok(CompileSetup {
            output,
            options: SetupOptions {
                classpath_hash,
                scalac_options,
                javac_options,
            },
            compiler_version,
            compile_order,
            store_apis,
            extra,
        })
    }

    fn get_output(&mut self, mapper: &dyn ReadMapper) -> Result<Output, CodecError> {
        match self.get_u8("output kind")? {
            0 => Ok(Output::Single(
                mapper.map_output_dir(self.get_raw_path("output dir")?),
            )),
            1 => {
                let mut groups = Vec::new();
                for _ in 0..self.get_count("output group count")? {
                    let source_dir = mapper.map_source_dir(self.get_raw_path("source dir")?);
                    let target_dir = mapper.map_output_dir(self.get_raw_path("target dir")?);
                    groups.push(OutputGroup {
                        source_dir,
                        target_dir,
                    });
                }
                Ok(Output::Multiple(groups))
            }
            id => Err(CodecError::UnknownEnum {
                what: "output kind",
                id,
            }),
        }
    }

    // -- stamps --------------------------------------------------------

    fn get_stamps(&mut self, mapper: &dyn ReadMapper) -> Result<Stamps, CodecError> {
        let mut stamps = Stamps::new();
        for _ in 0..self.get_count("source stamp count")? {
            let file = mapper.map_source_file(self.get_raw_path("source file")?);
            let stamp = self.get_stamp("source stamp")?;
            stamps.add_source(file.clone(), mapper.map_source_stamp(&file, stamp));
        }
        for _ in 0..self.get_count("product stamp count")? {
            let file = mapper.map_product_file(self.get_raw_path("product file")?);
            let stamp = self.get_stamp("product stamp")?;
            stamps.add_product(file.clone(), mapper.map_product_stamp(&file, stamp));
        }
        for _ in 0..self.get_count("binary stamp count")? {
            let file = mapper.map_binary_file(self.get_raw_path("binary file")?);
            let stamp = self.get_stamp("binary stamp")?;
            stamps.add_binary(file.clone(), mapper.map_binary_stamp(&file, stamp));
        }
        Ok(stamps)
    }

    // -- relations -----------------------------------------------------

    fn get_relations(&mut self, mapper: &dyn ReadMapper) -> Result<Relations, CodecError> {
        let src_prod = self.get_path_path_relation(mapper, PathRole::Source, PathRole::Product)?;
        let library_dep =
            self.get_path_path_relation(mapper, PathRole::Source, PathRole::Binary)?;
        let library_class_name = self.get_path_name_relation(mapper, PathRole::Binary)?;
        let classes = self.get_path_name_relation(mapper, PathRole::Source)?;
        let product_class_name = self.get_name_name_relation()?;
        let mut graphs = Vec::with_capacity(3);
        for _ in 0..3 {
            let internal = self.get_name_name_relation()?;
            let external = self.get_name_name_relation()?;
            graphs.push(SourceDependencies { internal, external });
        }
        let local_inheritance = graphs.pop().expect("three dependency graphs");
        let inheritance = graphs.pop().expect("three dependency graphs");
        let member_ref = graphs.pop().expect("three dependency graphs");

        let mut names: BTreeMap<Name, BTreeMap<Name, UseScopes>> = BTreeMap::new();
        for _ in 0..self.get_count("used name class count")? {
            let class = self.get_name("used name class")?;
            let mut used = BTreeMap::new();
            for _ in 0..self.get_count("used name count")? {
                let name = self.get_name("used name")?;
                let bits = self.get_u8("use scopes")?;
                let scopes = UseScopes::from_bits(bits).ok_or(CodecError::UnknownEnum {
                    what: "use scopes",
                    id: bits,
                })?;
                used.insert(name, scopes);
            }
            names.insert(class, used);
        }

        Ok(Relations {
            src_prod,
            library_dep,
            library_class_name,
            classes,
            product_class_name,
            member_ref,
            inheritance,
            local_inheritance,
            names,
        })
    }

    fn map_role(
        &self,
        mapper: &dyn ReadMapper,
        role: PathRole,
        path: PathBuf,
    ) -> PathBuf {
        match role {
            PathRole::Source => mapper.map_source_file(path),
            PathRole::Product => mapper.map_product_file(path),
            PathRole::Binary => mapper.map_binary_file(path),
        }
    }

    fn get_path_path_relation(
        &mut self,
        mapper: &dyn ReadMapper,
        key_role: PathRole,
        value_role: PathRole,
    ) -> Result<Relation<PathBuf, PathBuf>, CodecError> {
        let mut forward = BTreeMap::new();
        for _ in 0..self.get_count("relation key count")? {
            let raw = self.get_raw_path("relation key")?;
            let key = self.map_role(mapper, key_role, raw);
            let mut values = std::collections::BTreeSet::new();
            for _ in 0..self.get_count("relation value count")? {
                let raw = self.get_raw_path("relation value")?;
                values.insert(self.map_role(mapper, value_role, raw));
            }
            forward.insert(key, values);
        }
        Ok(Relation::reconstruct(forward))
    }

    fn get_path_name_relation(
        &mut self,
        mapper: &dyn ReadMapper,
        key_role: PathRole,
    ) -> Result<Relation<PathBuf, Name>, CodecError> {
        let mut forward = BTreeMap::new();
        for _ in 0..self.get_count("relation key count")? {
            let raw = self.get_raw_path("relation key")?;
            let key = self.map_role(mapper, key_role, raw);
            let mut values = std::collections::BTreeSet::new();
            for _ in 0..self.get_count("relation value count")? {
                values.insert(self.get_name("relation value")?);
            }
            forward.insert(key, values);
        }
        Ok(Relation::reconstruct(forward))
    }

    fn get_name_name_relation(&mut self) -> Result<Relation<Name, Name>, CodecError> {
        let mut forward = BTreeMap::new();
        for _ in 0..self.get_count("relation key count")? {
            let key = self.get_name("relation key")?;
            let mut values = std::collections::BTreeSet::new();
            for _ in 0..self.get_count("relation value count")? {
                values.insert(self.get_name("relation value")?);
            }
            forward.insert(key, values);
        }
        Ok(Relation::reconstruct(forward))
    }

    // -- source infos --------------------------------------------------

    fn get_source_infos(
        &mut self,
        mapper: &dyn ReadMapper,
    ) -> Result<BTreeMap<PathBuf, SourceInfo>, CodecError> {
        let mut infos = BTreeMap::new();
        for _ in 0..self.get_count("source info count")? {
            let source = mapper.map_source_file(self.get_raw_path("source info file")?);
            let info = self.get_source_info()?;
            infos.insert(source, info);
        }
        Ok(infos)
    }

    fn get_source_info(&mut self) -> Result<SourceInfo, CodecError> {
        let mut info = SourceInfo::default();
        for _ in 0..self.get_count("reported problem count")? {
            info.reported_problems.push(self.get_problem()?);
        }
        for _ in 0..self.get_count("unreported problem count")? {
            info.unreported_problems.push(self.get_problem()?);
        }
        for _ in 0..self.get_count("main class count")? {
            info.main_classes.push(self.get_name("main class")?);
        }
        Ok(info)
    }

    fn get_problem(&mut self) -> Result<Problem, CodecError> {
        let category = self.get_string("problem category")?;
        let severity = match self.get_u8("severity")? {
            0 => Severity::Info,
            1 => Severity::Warn,
            2 => Severity::Error,
            id => {
                return Err(CodecError::UnknownEnum {
                    what: "severity",
                    id,
                })
            }
        };
        let message = self.get_string("problem message")?;
        let position = Position {
            line: self.get_i32("position line")?,
            offset: self.get_i32("position offset")?,
            pointer: self.get_i32("position pointer")?,
            line_content: self.get_string("position line content")?,
            source_path: self.get_string("position source path")?,
        };
        Ok(Problem {
            category,
            severity,
            message,
            position,
        })
    }

    fn get_compilations(
        &mut self,
        mapper: &dyn ReadMapper,
    ) -> Result<Vec<Compilation>, CodecError> {
        let mut compilations = Vec::new();
        for _ in 0..self.get_count("compilation count")? {
            let start_time_ms = self.get_i64("compilation start time")?;
            let output = self.get_output(mapper)?;
            compilations.push(Compilation {
                start_time_ms,
                output,
            });
        }
        Ok(compilations)
    }

    // -- apis ----------------------------------------------------------

    fn get_analyzed_class(&mut self) -> Result<AnalyzedClass, CodecError> {
        let name = self.get_name("class name")?;
        let compilation_timestamp = self.get_i64("compilation timestamp")?;
        let api_hash = self.get_i64("api hash")?;
        let has_macro = self.get_bool("has macro flag")?;
        let mut name_hashes = Vec::new();
        for _ in 0..self.get_count("name hash count")? {
            let hash_name = self.get_name("name hash name")?;
            let tag = self.get_u8("use scope")?;
            let scope = UseScope::from_tag(tag).ok_or(CodecError::UnknownEnum {
                what: "use scope",
                id: tag,
            })?;
            let hash = self.get_i32("name hash")?;
            name_hashes.push(NameHash {
                name: hash_name,
                scope,
                hash,
            });
        }

        let block_len = self.get_count("companion block length")?;
        if self.remaining() < block_len {
            return Err(CodecError::Truncated {
                what: "companion block",
            });
        }
        let block = self.bytes.slice(self.pos..self.pos + block_len);
        self.pos += block_len;

        let interner = Arc::clone(&self.interner);
        let thunk_name = name.clone();
        let api = Lazy::new(move || {
            match decode_companions_block(&block, &interner) {
                Ok(companions) => companions,
                Err(err) => {
                    // The payload was crc-verified, so this is a format
                    // bug, not disk corruption.
                    tracing::error!(class = %thunk_name, error = %err, "companion block failed to decode");
                    Companions::empty(thunk_name.clone())
                }
            }
        });

        Ok(AnalyzedClass {
            compilation_timestamp,
            name,
            api,
            api_hash,
            name_hashes,
            has_macro,
        })
    }
}

#[derive(Clone, Copy)]
enum PathRole {
    Source,
    Product,
    Binary,
}

/// Decode one self-contained companion block.
pub(super) fn decode_companions_block(
    block: &[u8],
    interner: &Arc<Mutex<Interner>>,
) -> Result<Companions, CodecError> {
    let mut dec = BlockDecoder {
        bytes: block,
        pos: 0,
        dict: ReadDictionary::new(Arc::clone(interner)),
    };
    let class_api = dec.get_class_like()?;
    let object_api = dec.get_class_like()?;
    if dec.pos != block.len() {
        return Err(CodecError::Truncated {
            what: "companion block trailing bytes",
        });
    }
    Ok(Companions {
        class_api,
        object_api,
    })
}

struct BlockDecoder<'b> {
    bytes: &'b [u8],
    pos: usize,
    dict: ReadDictionary,
}

impl BlockDecoder<'_> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn get_u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        if self.remaining() < 1 {
            return Err(CodecError::Truncated { what });
        }
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn get_bool(&mut self, what: &'static str) -> Result<bool, CodecError> {
        match self.get_u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            id => Err(CodecError::UnknownEnum { what, id }),
        }
    }

    fn get_count(&mut self, what: &'static str) -> Result<usize, CodecError> {
        let count = read_varint(self.bytes, &mut self.pos, what)?;
        if count > self.remaining() as u64 {
            return Err(CodecError::LengthOverrun { what, len: count });
        }
        Ok(count as usize)
    }

    fn get_name(&mut self, what: &'static str) -> Result<Name, CodecError> {
        self.dict.read_str(self.bytes, &mut self.pos, what)
    }

    fn get_string(&mut self, what: &'static str) -> Result<String, CodecError> {
        Ok(self.get_name(what)?.to_string())
    }

    fn get_class_like(&mut self) -> Result<ClassLike, CodecError> {
        let name = self.get_name("class name")?;
        let access = self.get_access()?;
        let modifiers = Modifiers::from_bits(self.get_u8("modifiers")?);
        let annotations = self.get_annotations()?;
        let definition_type = self.get_definition_type()?;
        let self_type = Lazy::strict(self.get_type()?);
        let structure = Lazy::strict(self.get_structure()?);
        let mut saved_annotations = Vec::new();
        for _ in 0..self.get_count("saved annotation count")? {
            saved_annotations.push(self.get_name("saved annotation")?);
        }
        let mut children_of_sealed = Vec::new();
        for _ in 0..self.get_count("sealed child count")? {
            children_of_sealed.push(self.get_type()?);
        }
        let type_parameters = self.get_type_parameters()?;
        let top_level = self.get_bool("top level flag")?;
        Ok(ClassLike {
            name,
            access,
            modifiers,
            annotations,
            definition_type,
            self_type,
            structure,
            saved_annotations,
            children_of_sealed,
            type_parameters,
            top_level,
        })
    }

    fn get_structure(&mut self) -> Result<Structure, CodecError> {
        let mut parents = Vec::new();
        for _ in 0..self.get_count("parent count")? {
            parents.push(self.get_type()?);
        }
        let mut declared = Vec::new();
        for _ in 0..self.get_count("declared def count")? {
            declared.push(self.get_definition()?);
        }
        let mut inherited = Vec::new();
        for _ in 0..self.get_count("inherited def count")? {
            inherited.push(self.get_definition()?);
        }
        Ok(Structure::strict(parents, declared, inherited))
    }

    fn get_definition_type(&mut self) -> Result<DefinitionType, CodecError> {
        match self.get_u8("definition type")? {
            0 => Ok(DefinitionType::ClassDef),
            1 => Ok(DefinitionType::Module),
            2 => Ok(DefinitionType::Trait),
            3 => Ok(DefinitionType::PackageModule),
            id => Err(CodecError::UnknownEnum {
                what: "definition type",
                id,
            }),
        }
    }

    fn get_access(&mut self) -> Result<Access, CodecError> {
        match self.get_u8("access")? {
            0 => Ok(Access::Public),
            1 => Ok(Access::Protected(self.get_qualifier()?)),
            2 => Ok(Access::Private(self.get_qualifier()?)),
            id => Err(CodecError::UnknownEnum { what: "access", id }),
        }
    }

    fn get_qualifier(&mut self) -> Result<Qualifier, CodecError> {
        match self.get_u8("qualifier")? {
            0 => Ok(Qualifier::Unqualified),
            1 => Ok(Qualifier::ThisQualifier),
            2 => Ok(Qualifier::IdQualifier(self.get_name("qualifier id")?)),
            id => Err(CodecError::UnknownEnum {
                what: "qualifier",
                id,
            }),
        }
    }

    fn get_annotations(&mut self) -> Result<Annotations, CodecError> {
        let mut annotations = Vec::new();
        for _ in 0..self.get_count("annotation count")? {
            let base = self.get_type()?;
            let mut arguments = Vec::new();
            for _ in 0..self.get_count("annotation argument count")? {
                let name = self.get_name("annotation argument name")?;
                let value = self.get_string("annotation argument value")?;
                arguments.push(AnnotationArgument { name, value });
            }
            annotations.push(Annotation { base, arguments });
        }
        Ok(Annotations(annotations))
    }

    fn get_type(&mut self) -> Result<Type, CodecError> {
        match self.get_u8("type")? {
            0 => Ok(Type::ParameterRef {
                id: self.get_name("parameter ref id")?,
            }),
            1 => {
                let base = Box::new(self.get_type()?);
                let mut type_arguments = Vec::new();
                for _ in 0..self.get_count("type argument count")? {
                    type_arguments.push(self.get_type()?);
                }
                Ok(Type::Parameterized {
                    base,
                    type_arguments,
                })
            }
            2 => Ok(Type::Structure(self.get_structure()?)),
            3 => Ok(Type::Polymorphic {
                base: Box::new(self.get_type()?),
                parameters: self.get_type_parameters()?,
            }),
            4 => Ok(Type::Constant {
                base: Box::new(self.get_type()?),
                value: self.get_string("constant value")?,
            }),
            5 => Ok(Type::Existential {
                base: Box::new(self.get_type()?),
                clause: self.get_type_parameters()?,
            }),
            6 => Ok(Type::Singleton {
                path: self.get_object_path()?,
            }),
            7 => Ok(Type::Projection {
                prefix: Box::new(self.get_type()?),
                id: self.get_name("projection id")?,
            }),
            8 => Ok(Type::Annotated {
                base: Box::new(self.get_type()?),
                annotations: self.get_annotations()?,
            }),
            9 => Ok(Type::EmptyType),
            id => Err(CodecError::UnknownEnum { what: "type", id }),
        }
    }

    fn get_object_path(&mut self) -> Result<ObjectPath, CodecError> {
        let mut components = Vec::new();
        for _ in 0..self.get_count("path component count")? {
            components.push(match self.get_u8("path component")? {
                0 => PathComponent::Id(self.get_name("path component id")?),
                1 => PathComponent::This,
                2 => PathComponent::Super(Box::new(self.get_object_path()?)),
                id => {
                    return Err(CodecError::UnknownEnum {
                        what: "path component",
                        id,
                    })
                }
            });
        }
        Ok(ObjectPath { components })
    }

    fn get_type_parameters(&mut self) -> Result<Vec<TypeParameter>, CodecError> {
        let mut parameters = Vec::new();
        for _ in 0..self.get_count("type parameter count")? {
            let id = self.get_name("type parameter id")?;
            let annotations = self.get_annotations()?;
            let type_parameters = self.get_type_parameters()?;
            let variance = match self.get_u8("variance")? {
                0 => Variance::Invariant,
                1 => Variance::Covariant,
                2 => Variance::Contravariant,
                id => {
                    return Err(CodecError::UnknownEnum {
                        what: "variance",
                        id,
                    })
                }
            };
            let lower_bound = self.get_type()?;
            let upper_bound = self.get_type()?;
            parameters.push(TypeParameter {
                id,
                annotations,
                type_parameters,
                variance,
                lower_bound,
                upper_bound,
            });
        }
        Ok(parameters)
    }

    fn get_parameter_list(&mut self) -> Result<ParameterList, CodecError> {
        let is_implicit = self.get_bool("implicit list flag")?;
        let mut parameters = Vec::new();
        for _ in 0..self.get_count("method parameter count")? {
            let name = self.get_name("method parameter name")?;
            let tpe = self.get_type()?;
            let has_default = self.get_bool("default flag")?;
            let modifier = match self.get_u8("parameter modifier")? {
                0 => ParameterModifier::Plain,
                1 => ParameterModifier::Repeated,
                2 => ParameterModifier::ByName,
                id => {
                    return Err(CodecError::UnknownEnum {
                        what: "parameter modifier",
                        id,
                    })
                }
            };
            parameters.push(MethodParameter {
                name,
                tpe,
                has_default,
                modifier,
            });
        }
        Ok(ParameterList {
            parameters,
            is_implicit,
        })
    }

    fn get_definition(&mut self) -> Result<ClassDefinition, CodecError> {
        let tag = self.get_u8("definition")?;
        let name = self.get_name("definition name")?;
        let access = self.get_access()?;
        let modifiers = Modifiers::from_bits(self.get_u8("definition modifiers")?);
        let annotations = self.get_annotations()?;
        match tag {
            0 => {
                let type_parameters = self.get_type_parameters()?;
                let mut value_parameters = Vec::new();
                for _ in 0..self.get_count("parameter list count")? {
                    value_parameters.push(self.get_parameter_list()?);
                }
                let return_type = self.get_type()?;
                Ok(ClassDefinition::Def {
                    name,
                    access,
                    modifiers,
                    annotations,
                    type_parameters,
                    value_parameters,
                    return_type,
                })
            }
            1 => Ok(ClassDefinition::Val {
                name,
                access,
                modifiers,
                annotations,
                tpe: self.get_type()?,
            }),
            2 => Ok(ClassDefinition::Var {
                name,
                access,
                modifiers,
                annotations,
                tpe: self.get_type()?,
            }),
            3 => Ok(ClassDefinition::TypeAlias {
                name,
                access,
                modifiers,
                annotations,
                type_parameters: self.get_type_parameters()?,
                tpe: self.get_type()?,
            }),
            4 => Ok(ClassDefinition::TypeDeclaration {
                name,
                access,
                modifiers,
                annotations,
                type_parameters: self.get_type_parameters()?,
                lower_bound: self.get_type()?,
                upper_bound: self.get_type()?,
            }),
            5 => Ok(ClassDefinition::ClassLikeDef {
                name,
                access,
                modifiers,
                annotations,
                definition_type: self.get_definition_type()?,
            }),
            id => Err(CodecError::UnknownEnum {
                what: "definition",
                id,
            }),
        }
    }
}
