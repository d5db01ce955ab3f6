//! Layer 3: canonical API hashing.
//!
//! Every hash in the data model is derived from a canonical byte
//! serialization of API nodes fed through SHA-256: `api_hash` covers a
//! whole `Companions`, a `NameHash` covers every surface definition
//! carrying one simple name in one scope. Canonical means every node
//! is tagged and annotation lists are digest-sorted, so equal APIs
//! hash equal regardless of emission order.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::api::{
    Access, AnalyzedClass, Annotation, Annotations, ClassDefinition, ClassLike, Companions,
    DefinitionType, MethodParameter, Name, NameHash, ObjectPath, ParameterList, ParameterModifier,
    PathComponent, Qualifier, Structure, Type, TypeParameter, UseScope, Variance,
};
use super::lazy::Lazy;

struct CanonicalHasher {
    hasher: Sha256,
}

impl CanonicalHasher {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn tag(&mut self, tag: u8) {
        self.hasher.update([tag]);
    }

    fn put_bool(&mut self, value: bool) {
        self.hasher.update([value as u8]);
    }

    fn put_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    fn put_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    fn put_str(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    fn put_digest(&mut self, digest: &[u8; 32]) {
        self.hasher.update(digest);
    }

    fn finish(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

fn digest_to_i64(digest: [u8; 32]) -> i64 {
    i64::from_le_bytes(digest[..8].try_into().expect("sha256 digest is 32 bytes"))
}

fn digest_to_i32(digest: [u8; 32]) -> i32 {
    i32::from_le_bytes(digest[..4].try_into().expect("sha256 digest is 32 bytes"))
}

/// Deterministic 64-bit hash of a canonical `Companions` serialization.
pub fn api_hash(companions: &Companions) -> i64 {
    let mut hasher = CanonicalHasher::new();
    hash_class_like(&mut hasher, &companions.class_api);
    hash_class_like(&mut hasher, &companions.object_api);
    digest_to_i64(hasher.finish())
}

/// Per-name per-scope hashes over the surface definitions of both
/// companion sides. Forces the structure.
///
/// Scope rules: every definition hashes into `Default`; implicit
/// members additionally into `Implicit`; a sealed class hashes its
/// child list under its own name into `PatternMatchTarget`.
pub fn name_hashes(companions: &Companions) -> Vec<NameHash> {
    let mut groups: BTreeMap<(Name, UseScope), Vec<[u8; 32]>> = BTreeMap::new();

    for api in [&companions.class_api, &companions.object_api] {
        let structure = api.structure.force();
        let declared = structure.declared.force();
        let inherited = structure.inherited.force();
        for def in declared.iter().chain(inherited.iter()) {
            let digest = definition_digest(def);
            groups
                .entry((def.name().clone(), UseScope::Default))
                .or_default()
                .push(digest);
            if def.modifiers().is_implicit {
                groups
                    .entry((def.name().clone(), UseScope::Implicit))
                    .or_default()
                    .push(digest);
            }
        }
        if api.modifiers.is_sealed {
            let mut hasher = CanonicalHasher::new();
            hasher.tag(0xC0);
            hasher.put_u32(api.children_of_sealed.len() as u32);
            for child in &api.children_of_sealed {
                hash_type(&mut hasher, child);
            }
            groups
                .entry((api.name.clone(), UseScope::PatternMatchTarget))
                .or_default()
                .push(hasher.finish());
        }
    }

    groups
        .into_iter()
        .map(|((name, scope), mut digests)| {
            digests.sort_unstable();
            let mut hasher = CanonicalHasher::new();
            for digest in &digests {
                hasher.put_digest(digest);
            }
            NameHash {
                name,
                scope,
                hash: digest_to_i32(hasher.finish()),
            }
        })
        .collect()
}

impl AnalyzedClass {
    /// Snapshot recorded for an external class that resolves nowhere.
    /// Comparing against this tells later runs "still unresolved" from
    /// "vanished".
    pub fn placeholder(name: Name) -> Self {
        let companions = Companions::empty(name.clone());
        AnalyzedClass {
            compilation_timestamp: 0,
            name,
            api_hash: api_hash(&companions),
            name_hashes: name_hashes(&companions),
            has_macro: false,
            api: Lazy::strict(companions),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.compilation_timestamp == 0
            && !self.has_macro
            && self.api_hash == api_hash(&Companions::empty(self.name.clone()))
    }
}

fn definition_digest(def: &ClassDefinition) -> [u8; 32] {
    let mut hasher = CanonicalHasher::new();
    hash_definition(&mut hasher, def);
    hasher.finish()
}

fn hash_class_like(hasher: &mut CanonicalHasher, api: &ClassLike) {
    hasher.tag(0x01);
    hasher.put_str(&api.name);
    hash_access(hasher, &api.access);
    hasher.put_u8(api.modifiers.to_bits());
    hash_annotations(hasher, &api.annotations);
    hash_definition_type(hasher, api.definition_type);
    hash_type(hasher, api.self_type.force());
    hash_structure(hasher, api.structure.force());
    hasher.put_u32(api.saved_annotations.len() as u32);
    for name in &api.saved_annotations {
        hasher.put_str(name);
    }
    hasher.put_u32(api.children_of_sealed.len() as u32);
    for child in &api.children_of_sealed {
        hash_type(hasher, child);
    }
    hash_type_parameters(hasher, &api.type_parameters);
    hasher.put_bool(api.top_level);
}

fn hash_structure(hasher: &mut CanonicalHasher, structure: &Structure) {
    hasher.tag(0x02);
    let parents = structure.parents.force();
    hasher.put_u32(parents.len() as u32);
    for parent in parents {
        hash_type(hasher, parent);
    }
    for defs in [structure.declared.force(), structure.inherited.force()] {
        hasher.put_u32(defs.len() as u32);
        for def in defs {
            hash_definition(hasher, def);
        }
    }
}

fn hash_definition_type(hasher: &mut CanonicalHasher, definition_type: DefinitionType) {
    hasher.put_u8(match definition_type {
        DefinitionType::ClassDef => 0,
        DefinitionType::Module => 1,
        DefinitionType::Trait => 2,
        DefinitionType::PackageModule => 3,
    });
}

fn hash_access(hasher: &mut CanonicalHasher, access: &Access) {
    match access {
        Access::Public => hasher.tag(0x10),
        Access::Protected(qualifier) => {
            hasher.tag(0x11);
            hash_qualifier(hasher, qualifier);
        }
        Access::Private(qualifier) => {
            hasher.tag(0x12);
            hash_qualifier(hasher, qualifier);
        }
    }
}

fn hash_qualifier(hasher: &mut CanonicalHasher, qualifier: &Qualifier) {
    match qualifier {
        Qualifier::Unqualified => hasher.tag(0x00),
        Qualifier::ThisQualifier => hasher.tag(0x01),
        Qualifier::IdQualifier(id) => {
            hasher.tag(0x02);
            hasher.put_str(id);
        }
    }
}

fn hash_annotations(hasher: &mut CanonicalHasher, annotations: &Annotations) {
    // Unordered: digest each annotation, sort, then feed.
    let mut digests: Vec<[u8; 32]> = annotations
        .iter()
        .map(|annotation| {
            let mut sub = CanonicalHasher::new();
            hash_annotation(&mut sub, annotation);
            sub.finish()
        })
        .collect();
    digests.sort_unstable();
    hasher.put_u32(digests.len() as u32);
    for digest in &digests {
        hasher.put_digest(digest);
    }
}

fn hash_annotation(hasher: &mut CanonicalHasher, annotation: &Annotation) {
    hasher.tag(0x20);
    hash_type(hasher, &annotation.base);
    hasher.put_u32(annotation.arguments.len() as u32);
    for argument in &annotation.arguments {
        hasher.put_str(&argument.name);
        hasher.put_str(&argument.value);
    }
}

fn hash_type(hasher: &mut CanonicalHasher, tpe: &Type) {
    match tpe {
        Type::ParameterRef { id } => {
            hasher.tag(0x30);
            hasher.put_str(id);
        }
        Type::Parameterized {
            base,
            type_arguments,
        } => {
            hasher.tag(0x31);
            hash_type(hasher, base);
            hasher.put_u32(type_arguments.len() as u32);
            for argument in type_arguments {
                hash_type(hasher, argument);
            }
        }
        Type::Structure(structure) => {
            hasher.tag(0x32);
            hash_structure(hasher, structure);
        }
        Type::Polymorphic { base, parameters } => {
            hasher.tag(0x33);
            hash_type(hasher, base);
            hash_type_parameters(hasher, parameters);
        }
        Type::Constant { base, value } => {
            hasher.tag(0x34);
            hash_type(hasher, base);
            hasher.put_str(value);
        }
        Type::Existential { base, clause } => {
            hasher.tag(0x35);
            hash_type(hasher, base);
            hash_type_parameters(hasher, clause);
        }
        Type::Singleton { path } => {
            hasher.tag(0x36);
            hash_path(hasher, path);
        }
        Type::Projection { prefix, id } => {
            hasher.tag(0x37);
            hash_type(hasher, prefix);
            hasher.put_str(id);
        }
        Type::Annotated { base, annotations } => {
            hasher.tag(0x38);
            hash_type(hasher, base);
            hash_annotations(hasher, annotations);
        }
        Type::EmptyType => hasher.tag(0x39),
    }
}

fn hash_path(hasher: &mut CanonicalHasher, path: &ObjectPath) {
    hasher.put_u32(path.components.len() as u32);
    for component in &path.components {
        match component {
            PathComponent::Id(id) => {
                hasher.tag(0x00);
                hasher.put_str(id);
            }
            PathComponent::This => hasher.tag(0x01),
            PathComponent::Super(qualifier) => {
                hasher.tag(0x02);
                hash_path(hasher, qualifier);
            }
        }
    }
}

fn hash_type_parameters(hasher: &mut CanonicalHasher, parameters: &[TypeParameter]) {
    hasher.put_u32(parameters.len() as u32);
    for parameter in parameters {
        hasher.tag(0x40);
        hasher.put_str(&parameter.id);
        hash_annotations(hasher, &parameter.annotations);
        hash_type_parameters(hasher, &parameter.type_parameters);
        hasher.put_u8(match parameter.variance {
            Variance::Invariant => 0,
            Variance::Covariant => 1,
            Variance::Contravariant => 2,
        });
        hash_type(hasher, &parameter.lower_bound);
        hash_type(hasher, &parameter.upper_bound);
    }
}

fn hash_parameter_list(hasher: &mut CanonicalHasher, list: &ParameterList) {
    hasher.tag(0x50);
    hasher.put_bool(list.is_implicit);
    hasher.put_u32(list.parameters.len() as u32);
    for parameter in &list.parameters {
        hash_method_parameter(hasher, parameter);
    }
}

fn hash_method_parameter(hasher: &mut CanonicalHasher, parameter: &MethodParameter) {
    hasher.put_str(&parameter.name);
    hash_type(hasher, &parameter.tpe);
    hasher.put_bool(parameter.has_default);
    hasher.put_u8(match parameter.modifier {
        ParameterModifier::Plain => 0,
        ParameterModifier::Repeated => 1,
        ParameterModifier::ByName => 2,
    });
}

fn hash_definition(hasher: &mut CanonicalHasher, def: &ClassDefinition) {
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
            hasher.tag(0x60);
            hasher.put_str(name);
            hash_access(hasher, access);
            hasher.put_u8(modifiers.to_bits());
            hash_annotations(hasher, annotations);
            hash_type_parameters(hasher, type_parameters);
            hasher.put_u32(value_parameters.len() as u32);
            for list in value_parameters {
                hash_parameter_list(hasher, list);
            }
            hash_type(hasher, return_type);
        }
        ClassDefinition::Val {
            name,
            access,
            modifiers,
            annotations,
            tpe,
        } => {
            hasher.tag(0x61);
            hasher.put_str(name);
            hash_access(hasher, access);
            hasher.put_u8(modifiers.to_bits());
            hash_annotations(hasher, annotations);
            hash_type(hasher, tpe);
        }
        ClassDefinition::Var {
            name,
            access,
            modifiers,
            annotations,
            tpe,
        } => {
            hasher.tag(0x62);
            hasher.put_str(name);
            hash_access(hasher, access);
            hasher.put_u8(modifiers.to_bits());
            hash_annotations(hasher, annotations);
            hash_type(hasher, tpe);
        }
        ClassDefinition::TypeAlias {
            name,
            access,
            modifiers,
            annotations,
            type_parameters,
            tpe,
        } => {
            hasher.tag(0x63);
            hasher.put_str(name);
            hash_access(hasher, access);
            hasher.put_u8(modifiers.to_bits());
            hash_annotations(hasher, annotations);
            hash_type_parameters(hasher, type_parameters);
            hash_type(hasher, tpe);
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
            hasher.tag(0x64);
            hasher.put_str(name);
            hash_access(hasher, access);
            hasher.put_u8(modifiers.to_bits());
            hash_annotations(hasher, annotations);
            hash_type_parameters(hasher, type_parameters);
            hash_type(hasher, lower_bound);
            hash_type(hasher, upper_bound);
        }
        ClassDefinition::ClassLikeDef {
            name,
            access,
            modifiers,
            annotations,
            definition_type,
        } => {
            hasher.tag(0x65);
            hasher.put_str(name);
            hash_access(hasher, access);
            hasher.put_u8(modifiers.to_bits());
            hash_annotations(hasher, annotations);
            hash_definition_type(hasher, *definition_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::api::{Annotations, Modifiers};
    use crate::core::lazy::Lazy;
    use std::sync::Arc;

    fn val(name: &str, tpe: Type) -> ClassDefinition {
        ClassDefinition::Val {
            name: Arc::from(name),
            access: Access::Public,
            modifiers: Modifiers::default(),
            annotations: Annotations::default(),
            tpe,
        }
    }

    fn class_with(defs: Vec<ClassDefinition>) -> Companions {
        let mut companions = Companions::empty(Arc::from("A"));
        companions.class_api.structure =
            Lazy::strict(Structure::strict(Vec::new(), defs, Vec::new()));
        companions
    }

    fn ref_type(id: &str) -> Type {
        Type::ParameterRef { id: Arc::from(id) }
    }

    #[test]
    fn equal_apis_hash_equal() {
        let a = class_with(vec![val("x", ref_type("Int"))]);
        let b = class_with(vec![val("x", ref_type("Int"))]);
        assert_eq!(api_hash(&a), api_hash(&b));
    }

    #[test]
    fn different_member_type_changes_hash() {
        let a = class_with(vec![val("x", ref_type("Int"))]);
        let b = class_with(vec![val("x", ref_type("Long"))]);
        assert_ne!(api_hash(&a), api_hash(&b));
    }

    #[test]
    fn annotation_order_does_not_change_hash() {
        let make = |order: [&str; 2]| {
            let mut companions = Companions::empty(Arc::from("A"));
            companions.class_api.annotations = Annotations(
                order
                    .iter()
                    .map(|value| Annotation {
                        base: Type::Constant {
                            base: Box::new(Type::EmptyType),
                            value: value.to_string(),
                        },
                        arguments: vec![],
                    })
                    .collect(),
            );
            companions
        };
        assert_eq!(
            api_hash(&make(["a", "b"])),
            api_hash(&make(["b", "a"]))
        );
    }

    #[test]
    fn name_hashes_cover_each_surface_name() {
        let companions = class_with(vec![
            val("x", ref_type("Int")),
            val("y", ref_type("Int")),
        ]);
        let hashes = name_hashes(&companions);
        let names: Vec<&str> = hashes.iter().map(|h| &*h.name).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert!(hashes.iter().all(|h| h.scope == UseScope::Default));
    }

    #[test]
    fn implicit_member_hashes_into_both_scopes() {
        let def = ClassDefinition::Val {
            name: Arc::from("conv"),
            access: Access::Public,
            modifiers: Modifiers {
                is_implicit: true,
                ..Modifiers::default()
            },
            annotations: Annotations::default(),
            tpe: ref_type("Int"),
        };
        let hashes = name_hashes(&class_with(vec![def]));
        let scopes: Vec<UseScope> = hashes.iter().map(|h| h.scope).collect();
        assert_eq!(scopes, vec![UseScope::Default, UseScope::Implicit]);
    }

    #[test]
    fn sealed_class_hashes_children_for_pattern_matching() {
        let mut companions = class_with(vec![]);
        companions.class_api.modifiers.is_sealed = true;
        companions.class_api.children_of_sealed = vec![ref_type("B")];
        let hashes = name_hashes(&companions);
        assert!(hashes
            .iter()
            .any(|h| h.scope == UseScope::PatternMatchTarget && &*h.name == "A"));

        let mut other = class_with(vec![]);
        other.class_api.modifiers.is_sealed = true;
        other.class_api.children_of_sealed = vec![ref_type("C")];
        let other_hashes = name_hashes(&other);
        assert_ne!(
            hashes[0].hash, other_hashes[0].hash,
            "child list changes the pattern-match hash"
        );
    }

    #[test]
    fn unchanged_name_keeps_its_hash_when_sibling_changes() {
        let before = name_hashes(&class_with(vec![
            val("x", ref_type("Int")),
            val("y", ref_type("Int")),
        ]));
        let after = name_hashes(&class_with(vec![
            val("x", ref_type("Int")),
            val("y", ref_type("Long")),
        ]));
        let find = |hashes: &[NameHash], name: &str| {
            hashes
                .iter()
                .find(|h| &*h.name == name)
                .map(|h| h.hash)
                .expect("name present")
        };
        assert_eq!(find(&before, "x"), find(&after, "x"));
        assert_ne!(find(&before, "y"), find(&after, "y"));
    }
}
