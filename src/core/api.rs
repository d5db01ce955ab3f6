//! Layer 2: structural class APIs.
//!
//! Pure data describing the externally visible shape of a class:
//! access, modifiers, members, parents, type parameters. Classes
//! reference each other by name, never by pointer; the graph is
//! navigated through the `Apis` maps. Structure nodes are lazy because
//! most stored APIs are never walked in a given run.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::lazy::Lazy;

/// Interned class or member name. `Arc<str>` so thousands of relation
/// entries and API nodes share one allocation per distinct string.
pub type Name = Arc<str>;

/// Name deduplication. Both the callback builder and the codec reader
/// route every string through one of these.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    names: HashSet<Name>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(existing) = self.names.get(s) {
            return existing.clone();
        }
        let name: Name = Arc::from(s);
        self.names.insert(name.clone());
        name
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Syntactic context in which a name is referenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UseScope {
    Default,
    Implicit,
    PatternMatchTarget,
}

impl UseScope {
    pub const ALL: [UseScope; 3] = [
        UseScope::Default,
        UseScope::Implicit,
        UseScope::PatternMatchTarget,
    ];

    pub fn to_tag(self) -> u8 {
        match self {
            UseScope::Default => 0,
            UseScope::Implicit => 1,
            UseScope::PatternMatchTarget => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(UseScope::Default),
            1 => Some(UseScope::Implicit),
            2 => Some(UseScope::PatternMatchTarget),
            _ => None,
        }
    }
}

/// Set of use scopes, flag-struct style.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UseScopes {
    pub default: bool,
    pub implicit: bool,
    pub pattern_match: bool,
}

impl UseScopes {
    pub const DEFAULT: UseScopes = UseScopes {
        default: true,
        implicit: false,
        pattern_match: false,
    };

    pub fn of(scope: UseScope) -> Self {
        let mut scopes = Self::default();
        scopes.insert(scope);
        scopes
    }

    pub fn insert(&mut self, scope: UseScope) {
        match scope {
            UseScope::Default => self.default = true,
            UseScope::Implicit => self.implicit = true,
            UseScope::PatternMatchTarget => self.pattern_match = true,
        }
    }

    pub fn contains(&self, scope: UseScope) -> bool {
        match scope {
            UseScope::Default => self.default,
            UseScope::Implicit => self.implicit,
            UseScope::PatternMatchTarget => self.pattern_match,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.default || self.implicit || self.pattern_match)
    }

    pub fn iter(&self) -> impl Iterator<Item = UseScope> + '_ {
        UseScope::ALL
            .into_iter()
            .filter(move |scope| self.contains(*scope))
    }

    pub fn to_bits(self) -> u8 {
        let mut bits = 0u8;
        if self.default {
            bits |= 1 << 0;
        }
        if self.implicit {
            bits |= 1 << 1;
        }
        if self.pattern_match {
            bits |= 1 << 2;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !0b111 != 0 {
            return None;
        }
        Some(Self {
            default: bits & (1 << 0) != 0,
            implicit: bits & (1 << 1) != 0,
            pattern_match: bits & (1 << 2) != 0,
        })
    }
}

/// Hash of every surface definition carrying one simple name in one
/// scope. The unit of member-reference pruning.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct NameHash {
    pub name: Name,
    pub scope: UseScope,
    pub hash: i32,
}

/// Access qualifier target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Qualifier {
    Unqualified,
    ThisQualifier,
    IdQualifier(Name),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected(Qualifier),
    Private(Qualifier),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefinitionType {
    ClassDef,
    Module,
    Trait,
    PackageModule,
}

impl DefinitionType {
    /// Whether this definition occupies the object (companion) slot.
    pub fn is_module(self) -> bool {
        matches!(self, DefinitionType::Module | DefinitionType::PackageModule)
    }
}

/// Definition modifier flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub is_abstract: bool,
    pub is_override: bool,
    pub is_final: bool,
    pub is_sealed: bool,
    pub is_implicit: bool,
    pub is_lazy: bool,
    pub is_macro: bool,
    pub is_superaccessor: bool,
}

impl Modifiers {
    pub fn to_bits(self) -> u8 {
        let mut bits = 0u8;
        if self.is_abstract {
            bits |= 1 << 0;
        }
        if self.is_override {
            bits |= 1 << 1;
        }
        if self.is_final {
            bits |= 1 << 2;
        }
        if self.is_sealed {
            bits |= 1 << 3;
        }
        if self.is_implicit {
            bits |= 1 << 4;
        }
        if self.is_lazy {
            bits |= 1 << 5;
        }
        if self.is_macro {
            bits |= 1 << 6;
        }
        if self.is_superaccessor {
            bits |= 1 << 7;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            is_abstract: bits & (1 << 0) != 0,
            is_override: bits & (1 << 1) != 0,
            is_final: bits & (1 << 2) != 0,
            is_sealed: bits & (1 << 3) != 0,
            is_implicit: bits & (1 << 4) != 0,
            is_lazy: bits & (1 << 5) != 0,
            is_macro: bits & (1 << 6) != 0,
            is_superaccessor: bits & (1 << 7) != 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variance {
    Invariant,
    Covariant,
    Contravariant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterModifier {
    Plain,
    Repeated,
    ByName,
}

/// Annotation argument, e.g. `@deprecated(message = "...")`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationArgument {
    pub name: Name,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub base: Type,
    pub arguments: Vec<AnnotationArgument>,
}

/// Annotation list compared as an unordered multiset: compilers do not
/// guarantee a stable emission order and reordering is not an API
/// change.
#[derive(Clone, Debug, Default, Eq)]
pub struct Annotations(pub Vec<Annotation>);

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Annotation> {
        self.0.iter()
    }
}

impl From<Vec<Annotation>> for Annotations {
    fn from(annotations: Vec<Annotation>) -> Self {
        Self(annotations)
    }
}

impl PartialEq for Annotations {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        let mut used = vec![false; other.0.len()];
        'outer: for ann in &self.0 {
            for (i, candidate) in other.0.iter().enumerate() {
                if !used[i] && ann == candidate {
                    used[i] = true;
                    continue 'outer;
                }
            }
            return false;
        }
        true
    }
}

/// Term path for singleton types, e.g. `a.b.this.type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectPath {
    pub components: Vec<PathComponent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathComponent {
    Id(Name),
    This,
    Super(Box<ObjectPath>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    /// Reference to a type parameter by id.
    ParameterRef { id: Name },
    Parameterized {
        base: Box<Type>,
        type_arguments: Vec<Type>,
    },
    Structure(Structure),
    Polymorphic {
        base: Box<Type>,
        parameters: Vec<TypeParameter>,
    },
    Constant {
        base: Box<Type>,
        value: String,
    },
    Existential {
        base: Box<Type>,
        clause: Vec<TypeParameter>,
    },
    Singleton { path: ObjectPath },
    Projection {
        prefix: Box<Type>,
        id: Name,
    },
    Annotated {
        base: Box<Type>,
        annotations: Annotations,
    },
    EmptyType,
}

/// Parents and members of a class, all lazy: the codec hands out
/// thunks over the payload slice that decode on first touch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Structure {
    pub parents: Lazy<Vec<Type>>,
    pub declared: Lazy<Vec<ClassDefinition>>,
    pub inherited: Lazy<Vec<ClassDefinition>>,
}

impl Structure {
    pub fn strict(
        parents: Vec<Type>,
        declared: Vec<ClassDefinition>,
        inherited: Vec<ClassDefinition>,
    ) -> Self {
        Self {
            parents: Lazy::strict(parents),
            declared: Lazy::strict(declared),
            inherited: Lazy::strict(inherited),
        }
    }

    pub fn empty() -> Self {
        Self::strict(Vec::new(), Vec::new(), Vec::new())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeParameter {
    pub id: Name,
    pub annotations: Annotations,
    pub type_parameters: Vec<TypeParameter>,
    pub variance: Variance,
    pub lower_bound: Type,
    pub upper_bound: Type,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodParameter {
    pub name: Name,
    pub tpe: Type,
    pub has_default: bool,
    pub modifier: ParameterModifier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterList {
    pub parameters: Vec<MethodParameter>,
    pub is_implicit: bool,
}

/// A member definition at the class surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassDefinition {
    Def {
        name: Name,
        access: Access,
        modifiers: Modifiers,
        annotations: Annotations,
        type_parameters: Vec<TypeParameter>,
        value_parameters: Vec<ParameterList>,
        return_type: Type,
    },
    Val {
        name: Name,
        access: Access,
        modifiers: Modifiers,
        annotations: Annotations,
        tpe: Type,
    },
    Var {
        name: Name,
        access: Access,
        modifiers: Modifiers,
        annotations: Annotations,
        tpe: Type,
    },
    TypeAlias {
        name: Name,
        access: Access,
        modifiers: Modifiers,
        annotations: Annotations,
        type_parameters: Vec<TypeParameter>,
        tpe: Type,
    },
    TypeDeclaration {
        name: Name,
        access: Access,
        modifiers: Modifiers,
        annotations: Annotations,
        type_parameters: Vec<TypeParameter>,
        lower_bound: Type,
        upper_bound: Type,
    },
    ClassLikeDef {
        name: Name,
        access: Access,
        modifiers: Modifiers,
        annotations: Annotations,
        definition_type: DefinitionType,
    },
}

impl ClassDefinition {
    pub fn name(&self) -> &Name {
        match self {
            ClassDefinition::Def { name, .. }
            | ClassDefinition::Val { name, .. }
            | ClassDefinition::Var { name, .. }
            | ClassDefinition::TypeAlias { name, .. }
            | ClassDefinition::TypeDeclaration { name, .. }
            | ClassDefinition::ClassLikeDef { name, .. } => name,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        match self {
            ClassDefinition::Def { modifiers, .. }
            | ClassDefinition::Val { modifiers, .. }
            | ClassDefinition::Var { modifiers, .. }
            | ClassDefinition::TypeAlias { modifiers, .. }
            | ClassDefinition::TypeDeclaration { modifiers, .. }
            | ClassDefinition::ClassLikeDef { modifiers, .. } => *modifiers,
        }
    }
}

/// Structural description of one class or module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassLike {
    pub name: Name,
    pub access: Access,
    pub modifiers: Modifiers,
    pub annotations: Annotations,
    pub definition_type: DefinitionType,
    pub self_type: Lazy<Type>,
    pub structure: Lazy<Structure>,
    /// Annotation names retained even when annotation bodies are not
    /// part of the stored structure.
    pub saved_annotations: Vec<Name>,
    pub children_of_sealed: Vec<Type>,
    pub type_parameters: Vec<TypeParameter>,
    pub top_level: bool,
}

impl ClassLike {
    /// Placeholder for a missing companion side.
    pub fn empty(name: Name, definition_type: DefinitionType) -> Self {
        Self {
            name,
            access: Access::Public,
            modifiers: Modifiers::default(),
            annotations: Annotations::default(),
            definition_type,
            self_type: Lazy::strict(Type::EmptyType),
            structure: Lazy::strict(Structure::empty()),
            saved_annotations: Vec::new(),
            children_of_sealed: Vec::new(),
            type_parameters: Vec::new(),
            top_level: true,
        }
    }
}

/// Class and companion-object sides of one class name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Companions {
    pub class_api: ClassLike,
    pub object_api: ClassLike,
}

impl Companions {
    pub fn empty(name: Name) -> Self {
        Self {
            class_api: ClassLike::empty(name.clone(), DefinitionType::ClassDef),
            object_api: ClassLike::empty(name, DefinitionType::Module),
        }
    }

    /// True when any surface definition (or either side itself) is a
    /// macro provider. Forces the structure.
    pub fn has_macro(&self) -> bool {
        [&self.class_api, &self.object_api].into_iter().any(|api| {
            if api.modifiers.is_macro {
                return true;
            }
            let structure = api.structure.force();
            structure
                .declared
                .force()
                .iter()
                .chain(structure.inherited.force().iter())
                .any(|def| def.modifiers().is_macro)
        })
    }
}

/// Summarized API of one class plus its hashed names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyzedClass {
    pub compilation_timestamp: i64,
    pub name: Name,
    pub api: Lazy<Companions>,
    pub api_hash: i64,
    pub name_hashes: Vec<NameHash>,
    pub has_macro: bool,
}

impl fmt::Display for AnalyzedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (api hash {:#x})", self.name, self.api_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(value: &str) -> Annotation {
        Annotation {
            base: Type::EmptyType,
            arguments: vec![AnnotationArgument {
                name: Arc::from("value"),
                value: value.to_string(),
            }],
        }
    }

    #[test]
    fn interner_shares_allocations() {
        let mut interner = Interner::new();
        let a = interner.intern("com.example.A");
        let b = interner.intern("com.example.A");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn use_scopes_bits_roundtrip() {
        for bits in 0u8..8 {
            let scopes = UseScopes::from_bits(bits).expect("valid bits");
            assert_eq!(scopes.to_bits(), bits);
        }
        assert_eq!(UseScopes::from_bits(0b1000), None);
    }

    #[test]
    fn use_scopes_iter_lists_members() {
        let mut scopes = UseScopes::of(UseScope::Default);
        scopes.insert(UseScope::PatternMatchTarget);
        let listed: Vec<_> = scopes.iter().collect();
        assert_eq!(listed, vec![UseScope::Default, UseScope::PatternMatchTarget]);
    }

    #[test]
    fn modifiers_bits_roundtrip() {
        for bits in [0u8, 1, 0b0100_0001, 0xFF] {
            assert_eq!(Modifiers::from_bits(bits).to_bits(), bits);
        }
    }

    #[test]
    fn annotations_compare_unordered() {
        let left = Annotations(vec![ann("a"), ann("b")]);
        let right = Annotations(vec![ann("b"), ann("a")]);
        assert_eq!(left, right);
        assert_ne!(left, Annotations(vec![ann("a")]));
        // Multiset, not set: duplicates count.
        assert_ne!(
            Annotations(vec![ann("a"), ann("a")]),
            Annotations(vec![ann("a"), ann("b")])
        );
    }

    #[test]
    fn empty_class_like_is_inert() {
        let empty = ClassLike::empty(Arc::from("A"), DefinitionType::ClassDef);
        assert_eq!(*empty.self_type.force(), Type::EmptyType);
        assert!(empty.structure.force().declared.force().is_empty());
    }

    #[test]
    fn has_macro_sees_surface_defs() {
        let mut companions = Companions::empty(Arc::from("A"));
        assert!(!companions.has_macro());
        let def = ClassDefinition::Def {
            name: Arc::from("expand"),
            access: Access::Public,
            modifiers: Modifiers {
                is_macro: true,
                ..Modifiers::default()
            },
            annotations: Annotations::default(),
            type_parameters: Vec::new(),
            value_parameters: Vec::new(),
            return_type: Type::EmptyType,
        };
        companions.class_api.structure =
            Lazy::strict(Structure::strict(Vec::new(), vec![def], Vec::new()));
        assert!(companions.has_macro());
    }
}
