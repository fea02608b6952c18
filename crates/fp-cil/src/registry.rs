//! Lookup services consumed by the emitter.
//!
//! The emitter never owns metadata tables. It asks three narrow services for
//! tokens, scope layouts and program-level declarations, all passed in through
//! [`CompilerServices`]. [`SharedRegistry`] is a concurrent in-memory
//! implementation of all three that a driver can pre-populate and share between
//! compilations.

use dashmap::DashMap;
use fp_core::metadata::{FieldRef, MethodRef, TableKind, Token, TypeRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Interns symbolic metadata descriptions into binary tokens.
pub trait MetadataTokens: Send + Sync {
    fn type_token(&self, ty: &TypeRef) -> Token;
    fn method_token(&self, method: &MethodRef) -> Token;
    fn field_token(&self, field: &FieldRef) -> Token;
    fn string_token(&self, value: &str) -> Token;
    fn signature_token(&self, blob: &[u8]) -> Token;
}

pub trait ScopeRegistry: Send + Sync {
    fn scope_type(&self, scope: &str) -> Option<TypeRef>;
    fn scope_field(&self, scope: &str, field: &str) -> Option<FieldRef>;
}

/// Program-level declarations visible to call sites.
pub trait ProgramRegistry: Send + Sync {
    fn class(&self, name: &str) -> Option<Arc<ClassInfo>>;
    fn function(&self, name: &str) -> Option<Arc<FunctionInfo>>;
}

/// Read-only service handles for one compilation run.
#[derive(Clone, Copy)]
pub struct CompilerServices<'a> {
    pub tokens: &'a dyn MetadataTokens,
    pub scopes: &'a dyn ScopeRegistry,
    pub program: &'a dyn ProgramRegistry,
}

impl<'a> CompilerServices<'a> {
    pub fn new(
        tokens: &'a dyn MetadataTokens,
        scopes: &'a dyn ScopeRegistry,
        program: &'a dyn ProgramRegistry,
    ) -> Self {
        Self {
            tokens,
            scopes,
            program,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorInfo {
    pub min_args: usize,
    pub max_args: usize,
    /// Takes the enclosing scopes array ahead of its declared parameters.
    pub captures_scopes: bool,
    /// Declared parameter representations, `max_args` long.
    pub params: Vec<TypeRef>,
}

impl ConstructorInfo {
    /// A constructor whose parameters are all optional `object`s.
    pub fn optional(max_args: usize) -> Self {
        Self {
            min_args: 0,
            max_args,
            captures_scopes: false,
            params: vec![TypeRef::Object; max_args],
        }
    }

    pub fn with_min_args(mut self, min_args: usize) -> Self {
        self.min_args = min_args;
        self
    }

    pub fn with_captured_scopes(mut self, captures: bool) -> Self {
        self.captures_scopes = captures;
        self
    }

    pub fn method_ref(&self, class: &TypeRef) -> MethodRef {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        if self.captures_scopes {
            params.push(TypeRef::ObjectArray);
        }
        params.extend(self.params.iter().cloned());
        MethodRef::constructor(class.clone(), params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMethodInfo {
    pub params: Vec<TypeRef>,
    pub returns: Option<TypeRef>,
}

impl ClassMethodInfo {
    pub fn new(params: Vec<TypeRef>, returns: Option<TypeRef>) -> Self {
        Self { params, returns }
    }
}

/// A user class as seen from call sites and field accesses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub ty: TypeRef,
    pub constructor: ConstructorInfo,
    pub fields: HashMap<String, TypeRef>,
    pub methods: HashMap<String, ClassMethodInfo>,
    /// Hidden field a constructor writes when it returns an explicit value.
    pub return_override_field: Option<String>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            constructor: ConstructorInfo::optional(0),
            fields: HashMap::new(),
            methods: HashMap::new(),
            return_override_field: None,
        }
    }

    pub fn with_constructor(mut self, constructor: ConstructorInfo) -> Self {
        self.constructor = constructor;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn with_method(mut self, name: impl Into<String>, method: ClassMethodInfo) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn with_return_override(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.fields.insert(field.clone(), TypeRef::Object);
        self.return_override_field = Some(field);
        self
    }

    pub fn field_ref(&self, name: &str) -> Option<FieldRef> {
        self.fields
            .get(name)
            .map(|ty| FieldRef::new(self.ty.clone(), name, ty.clone()))
    }

    pub fn method_ref(&self, name: &str) -> Option<MethodRef> {
        self.methods.get(name).map(|method| {
            MethodRef::new(
                self.ty.clone(),
                name,
                fp_core::metadata::MethodSig::instance(
                    method.params.clone(),
                    method.returns.clone(),
                ),
            )
        })
    }
}

/// A top-level function compiled as a static method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub owner: TypeRef,
    pub params: Vec<TypeRef>,
    pub returns: TypeRef,
    pub takes_scopes: bool,
}

impl FunctionInfo {
    pub fn new(name: impl Into<String>, owner: TypeRef, params: Vec<TypeRef>) -> Self {
        Self {
            name: name.into(),
            owner,
            params,
            returns: TypeRef::Object,
            takes_scopes: true,
        }
    }

    pub fn method_ref(&self) -> MethodRef {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        if self.takes_scopes {
            params.push(TypeRef::ObjectArray);
        }
        params.extend(self.params.iter().cloned());
        MethodRef::new(
            self.owner.clone(),
            self.name.as_str(),
            fp_core::metadata::MethodSig::static_fn(params, Some(self.returns.clone())),
        )
    }
}

/// What a token handed out by [`SharedRegistry`] stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEntry {
    Type(TypeRef),
    Method(MethodRef),
    Field(FieldRef),
    String(String),
    Signature(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
struct ScopeLayout {
    ty: Option<TypeRef>,
    fields: HashMap<String, TypeRef>,
}

/// Concurrent interning registry.
///
/// Interning is idempotent: the same description always yields the same token.
/// Rows are numbered per table in first-request order.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    types: DashMap<TypeRef, Token>,
    methods: DashMap<MethodRef, Token>,
    fields: DashMap<FieldRef, Token>,
    strings: DashMap<String, Token>,
    signatures: DashMap<Vec<u8>, Token>,
    entries: DashMap<Token, MetadataEntry>,
    rows: DashMap<u8, AtomicU32>,
    scopes: DashMap<String, ScopeLayout>,
    classes: DashMap<String, Arc<ClassInfo>>,
    functions: DashMap<String, Arc<FunctionInfo>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> CompilerServices<'_> {
        CompilerServices::new(self, self, self)
    }

    /// Registers a scope type and its captured-variable fields.
    pub fn register_scope(
        &self,
        scope: impl Into<String>,
        ty: TypeRef,
        fields: impl IntoIterator<Item = (String, TypeRef)>,
    ) {
        let mut layout = self.scopes.entry(scope.into()).or_default();
        layout.ty = Some(ty);
        layout.fields.extend(fields);
    }

    pub fn register_class(&self, class: ClassInfo) -> Arc<ClassInfo> {
        let class = Arc::new(class);
        self.classes.insert(class.name.clone(), class.clone());
        class
    }

    pub fn register_function(&self, function: FunctionInfo) -> Arc<FunctionInfo> {
        let function = Arc::new(function);
        self.functions
            .insert(function.name.clone(), function.clone());
        function
    }

    /// Reverse lookup of a token this registry handed out.
    pub fn resolve(&self, token: Token) -> Option<MetadataEntry> {
        self.entries.get(&token).map(|entry| entry.value().clone())
    }

    pub fn token_count(&self) -> usize {
        self.entries.len()
    }

    fn allocate(&self, table: TableKind, entry: MetadataEntry) -> Token {
        let row = self
            .rows
            .entry(table as u8)
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        let token = Token::new(table, row);
        self.entries.insert(token, entry);
        token
    }
}

impl MetadataTokens for SharedRegistry {
    fn type_token(&self, ty: &TypeRef) -> Token {
        if let Some(token) = self.types.get(ty) {
            return *token;
        }
        let table = match ty {
            TypeRef::ObjectArray => TableKind::TypeSpec,
            _ => TableKind::TypeRef,
        };
        *self
            .types
            .entry(ty.clone())
            .or_insert_with(|| self.allocate(table, MetadataEntry::Type(ty.clone())))
    }

    fn method_token(&self, method: &MethodRef) -> Token {
        if let Some(token) = self.methods.get(method) {
            return *token;
        }
        *self.methods.entry(method.clone()).or_insert_with(|| {
            self.allocate(TableKind::MemberRef, MetadataEntry::Method(method.clone()))
        })
    }

    fn field_token(&self, field: &FieldRef) -> Token {
        if let Some(token) = self.fields.get(field) {
            return *token;
        }
        *self.fields.entry(field.clone()).or_insert_with(|| {
            self.allocate(TableKind::MemberRef, MetadataEntry::Field(field.clone()))
        })
    }

    fn string_token(&self, value: &str) -> Token {
        if let Some(token) = self.strings.get(value) {
            return *token;
        }
        *self.strings.entry(value.to_string()).or_insert_with(|| {
            self.allocate(
                TableKind::UserString,
                MetadataEntry::String(value.to_string()),
            )
        })
    }

    fn signature_token(&self, blob: &[u8]) -> Token {
        if let Some(token) = self.signatures.get(blob) {
            return *token;
        }
        *self.signatures.entry(blob.to_vec()).or_insert_with(|| {
            self.allocate(
                TableKind::StandAloneSig,
                MetadataEntry::Signature(blob.to_vec()),
            )
        })
    }
}

impl ScopeRegistry for SharedRegistry {
    fn scope_type(&self, scope: &str) -> Option<TypeRef> {
        self.scopes.get(scope).and_then(|layout| layout.ty.clone())
    }

    fn scope_field(&self, scope: &str, field: &str) -> Option<FieldRef> {
        let layout = self.scopes.get(scope)?;
        let owner = layout.ty.clone()?;
        let ty = layout.fields.get(field)?.clone();
        Some(FieldRef::new(owner, field, ty))
    }
}

impl ProgramRegistry for SharedRegistry {
    fn class(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.classes.get(name).map(|class| class.value().clone())
    }

    fn function(&self, name: &str) -> Option<Arc<FunctionInfo>> {
        self.functions
            .get(name)
            .map(|function| function.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_core::metadata::MethodSig;

    #[test]
    fn interning_is_idempotent_and_numbered_per_table() {
        let registry = SharedRegistry::new();
        let point = registry.type_token(&TypeRef::named("Classes.Point"));
        let array = registry.type_token(&TypeRef::ObjectArray);
        assert_eq!(point, Token::new(TableKind::TypeRef, 1));
        assert_eq!(array, Token::new(TableKind::TypeSpec, 1));
        assert_eq!(registry.type_token(&TypeRef::named("Classes.Point")), point);

        let hello = registry.string_token("hello");
        assert_eq!(hello.table(), Some(TableKind::UserString));
        assert_eq!(
            registry.resolve(hello),
            Some(MetadataEntry::String("hello".to_string()))
        );
    }

    #[test]
    fn methods_and_fields_share_the_member_ref_table() {
        let registry = SharedRegistry::new();
        let method = MethodRef::new(
            TypeRef::named("Runtime.Operators"),
            "Add",
            MethodSig::static_fn(vec![TypeRef::Object, TypeRef::Object], Some(TypeRef::Object)),
        );
        let field = FieldRef::new(TypeRef::named("Scopes.f"), "x", TypeRef::Object);
        assert_eq!(registry.method_token(&method).row(), 1);
        assert_eq!(registry.field_token(&field).row(), 2);
    }

    #[test]
    fn scope_fields_resolve_against_registered_layouts() {
        let registry = SharedRegistry::new();
        registry.register_scope(
            "outer",
            TypeRef::named("Scopes.outer"),
            [("count".to_string(), TypeRef::Number)],
        );
        let field = registry.scope_field("outer", "count").expect("registered");
        assert_eq!(field.owner, TypeRef::named("Scopes.outer"));
        assert_eq!(field.ty, TypeRef::Number);
        assert!(registry.scope_field("outer", "missing").is_none());
        assert!(registry.scope_field("inner", "count").is_none());
    }
}
