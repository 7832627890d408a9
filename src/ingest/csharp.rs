//! C# extraction using tree-sitter-c-sharp.
//!
//! Namespaces are scopes without nodes of their own, so a class `Foo` in
//! `namespace App.Models` is named `App.Models.Foo`. `using` directives bind
//! aliases and add namespaces to the search list used for names declared in
//! other files.
//!
//! Classifying `: A, B` into base class and interfaces needs to know what `A`
//! and `B` are. [`CSharpSemantics`] answers that from the types declared in
//! the file, alias directives, and the `I`-prefix convention, in that order.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use tree_sitter::Node as SyntaxNode;

use super::builder::{props, CallTarget, Emission, GraphBuilder, ScopeKind};
use super::external::{classify_csharp, ImportTarget};
use super::{node_text, parse_checked, ExtractContext, ExtractError, Extractor, FileGraph, Grammar, Language};
use crate::model::NodeKind;

lazy_static! {
    static ref XML_TAG: Regex = Regex::new(r"<[^>]+>").expect("valid xml tag regex");
}

const TYPE_DECLARATIONS: &[&str] = &[
    "class_declaration",
    "struct_declaration",
    "record_declaration",
    "record_struct_declaration",
    "interface_declaration",
    "enum_declaration",
];

/// C# front-end.
#[derive(Debug, Default, Clone, Copy)]
pub struct CSharpExtractor;

impl CSharpExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for CSharpExtractor {
    fn language(&self) -> Language {
        Language::CSharp
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["cs"]
    }

    fn extract(&self, ctx: &ExtractContext<'_>, source: &[u8]) -> Result<FileGraph, ExtractError> {
        let tree = parse_checked(Grammar::CSharp, source, ctx.parse_timeout)?;
        let root = tree.root_node();
        let mut walker = CSharpWalker {
            ctx,
            builder: GraphBuilder::new(ctx, Language::CSharp, source, "")
                .with_class_members_visible(true),
            semantics: CSharpSemantics::collect(root, source),
            namespaces: Vec::new(),
            locals: vec![HashMap::new()],
        };
        walker.visit_children(root);
        Ok(walker.builder.finish())
    }
}

/// What a type declaration declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Struct,
    Record,
    Interface,
    Enum,
}

impl TypeKind {
    fn from_syntax(kind: &str) -> Option<Self> {
        match kind {
            "class_declaration" => Some(TypeKind::Class),
            "struct_declaration" | "record_struct_declaration" => Some(TypeKind::Struct),
            "record_declaration" => Some(TypeKind::Record),
            "interface_declaration" => Some(TypeKind::Interface),
            "enum_declaration" => Some(TypeKind::Enum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Struct => "struct",
            TypeKind::Record => "record",
            TypeKind::Interface => "interface",
            TypeKind::Enum => "enum",
        }
    }

    /// Graph node kind; everything but interfaces is stored as a Class.
    pub fn node_kind(&self) -> NodeKind {
        match self {
            TypeKind::Interface => NodeKind::Interface,
            _ => NodeKind::Class,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub full_name: String,
    pub kind: TypeKind,
    /// False when the kind was inferred from naming alone.
    pub declared_here: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("type '{0}' is not declared in this file")]
    Unknown(String),

    #[error("type '{name}' matches several declarations: {candidates:?}")]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },
}

/// Type facts for one C# file, collected before extraction starts.
#[derive(Debug, Default, Clone)]
pub struct CSharpSemantics {
    declared: HashMap<String, TypeKind>,
    /// Simple name -> qualified names declared with it.
    by_simple: HashMap<String, Vec<String>>,
    aliases: HashMap<String, String>,
}

impl CSharpSemantics {
    pub fn collect(root: SyntaxNode<'_>, source: &[u8]) -> Self {
        let mut semantics = Self::default();
        let mut scope = Vec::new();
        semantics.collect_into(root, source, &mut scope);
        semantics
    }

    fn collect_into(&mut self, node: SyntaxNode<'_>, source: &[u8], scope: &mut Vec<String>) {
        let mut cursor = node.walk();
        let children: Vec<SyntaxNode<'_>> = node.named_children(&mut cursor).collect();
        let mut file_scoped = 0;
        for child in children {
            match child.kind() {
                "namespace_declaration" => {
                    let name = field_text(child, "name", source);
                    scope.push(name.to_string());
                    if let Some(body) = child.child_by_field_name("body") {
                        self.collect_into(body, source, scope);
                    }
                    scope.pop();
                }
                "file_scoped_namespace_declaration" => {
                    scope.push(field_text(child, "name", source).to_string());
                    file_scoped += 1;
                    self.collect_into(child, source, scope);
                }
                "using_directive" => {
                    if let Some(Using::Alias { alias, target }) = parse_using(child, source) {
                        self.aliases.insert(alias, target);
                    }
                }
                kind => {
                    let Some(type_kind) = TypeKind::from_syntax(kind) else {
                        continue;
                    };
                    let name = field_text(child, "name", source);
                    if name.is_empty() {
                        continue;
                    }
                    scope.push(name.to_string());
                    let full_name = scope.join(".");
                    self.declared.insert(full_name.clone(), type_kind);
                    self.by_simple
                        .entry(name.to_string())
                        .or_default()
                        .push(full_name);
                    if let Some(body) = child.child_by_field_name("body") {
                        self.collect_into(body, source, scope);
                    }
                    scope.pop();
                }
            }
        }
        for _ in 0..file_scoped {
            scope.pop();
        }
    }

    /// Resolve a type reference seen inside `scope` (outermost first).
    pub fn resolve_type(&self, name: &str, scope: &[String]) -> Result<ResolvedType, ResolveError> {
        let mut name = base_type_name(name);
        if name.is_empty() {
            return Err(ResolveError::Unknown(name.to_string()));
        }
        if let Some(target) = self.aliases.get(name) {
            name = base_type_name(target);
        }

        let simple = name.rsplit('.').next().unwrap_or(name);
        let suffix = format!(".{}", name);
        let matches: Vec<&String> = self
            .by_simple
            .get(simple)
            .into_iter()
            .flatten()
            .filter(|full| full.as_str() == name || full.ends_with(&suffix))
            .collect();

        match matches.len() {
            0 => {}
            1 => return Ok(self.declared_type(matches[0])),
            _ => {
                let here = scope.join(".");
                let mut best: Vec<(usize, &String)> = matches
                    .iter()
                    .filter_map(|full| {
                        let container = full[..full.len() - name.len()].trim_end_matches('.');
                        let encloses = container.is_empty()
                            || here == container
                            || here.starts_with(&format!("{}.", container));
                        encloses.then(|| (container.len(), *full))
                    })
                    .collect();
                best.sort_by(|a, b| b.0.cmp(&a.0));
                match best.as_slice() {
                    [(depth, full), rest @ ..] if rest.first().map_or(true, |(d, _)| d < depth) => {
                        return Ok(self.declared_type(full));
                    }
                    _ => {
                        return Err(ResolveError::Ambiguous {
                            name: name.to_string(),
                            candidates: matches.into_iter().cloned().collect(),
                        })
                    }
                }
            }
        }

        if looks_like_interface(simple) {
            return Ok(ResolvedType {
                full_name: name.to_string(),
                kind: TypeKind::Interface,
                declared_here: false,
            });
        }
        Err(ResolveError::Unknown(name.to_string()))
    }

    fn declared_type(&self, full_name: &str) -> ResolvedType {
        ResolvedType {
            full_name: full_name.to_string(),
            kind: self.declared.get(full_name).copied().unwrap_or(TypeKind::Class),
            declared_here: true,
        }
    }
}

enum Using {
    Namespace(String),
    Static(String),
    Alias { alias: String, target: String },
}

fn parse_using(node: SyntaxNode<'_>, source: &[u8]) -> Option<Using> {
    let mut is_static = false;
    let mut seen_equals = false;
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut alias = None;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "static" => is_static = true,
            "=" => seen_equals = true,
            "name_equals" => {
                let mut inner = child.walk();
                alias = child
                    .named_children(&mut inner)
                    .find(|c| c.kind() == "identifier")
                    .map(|c| node_text(&c, source).to_string());
            }
            "identifier" | "qualified_name" | "generic_name" | "alias_qualified_name" => {
                let text = node_text(&child, source).to_string();
                if seen_equals {
                    after.push(text);
                } else {
                    before.push(text);
                }
            }
            _ => {}
        }
    }

    if let Some(alias) = alias {
        let target = before.pop().or_else(|| after.pop())?;
        return Some(Using::Alias { alias, target });
    }
    if seen_equals {
        let alias = before.into_iter().next()?;
        let target = after.pop()?;
        return Some(Using::Alias { alias, target });
    }
    let name = before.pop()?;
    Some(if is_static {
        Using::Static(name)
    } else {
        Using::Namespace(name)
    })
}

struct CSharpWalker<'a> {
    ctx: &'a ExtractContext<'a>,
    builder: GraphBuilder<'a>,
    semantics: CSharpSemantics,
    namespaces: Vec<String>,
    /// Name -> declared type, `None` when unknown. One frame per type body
    /// (fields and properties) and per callable (parameters and locals).
    locals: Vec<HashMap<String, Option<String>>>,
}

struct Param<'t> {
    name: String,
    syntax: SyntaxNode<'t>,
    type_name: Option<String>,
    default: Option<String>,
    modifier: Option<String>,
    predefined: bool,
}

impl<'a> CSharpWalker<'a> {
    fn text(&self, node: SyntaxNode<'_>) -> &'a str {
        self.builder.text(&node)
    }

    fn visit_children(&mut self, node: SyntaxNode<'_>) {
        let mut cursor = node.walk();
        let children: Vec<SyntaxNode<'_>> = node.named_children(&mut cursor).collect();
        let mut file_scoped = 0;
        for child in children {
            if child.kind() == "file_scoped_namespace_declaration" {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| self.text(n))
                    .unwrap_or("");
                self.builder.enter_scope(name, ScopeKind::Namespace);
                self.namespaces.push(name.to_string());
                file_scoped += 1;
                self.visit_children(child);
            } else {
                self.visit(child);
            }
        }
        for _ in 0..file_scoped {
            self.namespaces.pop();
            self.builder.exit();
        }
    }

    fn visit(&mut self, node: SyntaxNode<'_>) {
        match node.kind() {
            "namespace_declaration" => self.namespace(node),
            "using_directive" => self.using(node),
            kind if TYPE_DECLARATIONS.contains(&kind) => self.type_declaration(node),
            "method_declaration" | "constructor_declaration" | "local_function_statement" => {
                self.method(node)
            }
            "property_declaration" => self.property(node),
            "field_declaration" => self.field(node),
            "local_declaration_statement" => self.local_declaration(node),
            "invocation_expression" => {
                self.invocation(node);
                self.visit_children(node);
            }
            "object_creation_expression" => {
                if let Some(ty) = node.child_by_field_name("type") {
                    let name = base_type_name(self.text(ty)).to_string();
                    if !name.is_empty() {
                        self.builder.call(CallTarget::New(name));
                    }
                }
                self.visit_children(node);
            }
            _ => self.visit_children(node),
        }
    }

    fn namespace(&mut self, node: SyntaxNode<'_>) {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n))
            .unwrap_or("");
        self.builder.enter_scope(name, ScopeKind::Namespace);
        self.namespaces.push(name.to_string());
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body);
        }
        self.namespaces.pop();
        self.builder.exit();
    }

    fn using(&mut self, node: SyntaxNode<'_>) {
        let Some(using) = parse_using(node, self.builder.source()) else {
            return;
        };
        let (module, alias, is_static) = match using {
            Using::Namespace(ns) => (ns, None, false),
            Using::Static(ty) => (ty, None, true),
            Using::Alias { alias, target } => (target, Some(alias), false),
        };
        let module = module.trim_start_matches("global::").to_string();
        let target = classify_csharp(&module, &self.ctx.run.manifests, &self.ctx.run.project);

        match &alias {
            Some(alias) => self.builder.bind_import(alias, vec![module.clone()], false),
            None if is_static || target == ImportTarget::Local => {
                self.builder.add_search_namespace(&module)
            }
            None => {}
        }

        let is_global = has_token(node, "global");
        let properties = props([
            ("alias", alias.map(Value::from).unwrap_or(Value::Null)),
            ("is_static", Value::from(is_static)),
            ("is_global", Value::from(is_global)),
        ]);
        self.builder.import(&module, &target, &node, properties);
    }

    fn type_declaration(&mut self, node: SyntaxNode<'_>) {
        let Some(type_kind) = TypeKind::from_syntax(node.kind()) else {
            return;
        };
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let modifiers = self.modifiers(node);
        let (base_classes, interfaces) = match type_kind {
            TypeKind::Enum => (Vec::new(), Vec::new()),
            _ => self.bases(node, type_kind),
        };
        let type_parameters = child_of_kind(node, "type_parameter_list")
            .map(|t| Value::from(self.text(t)))
            .unwrap_or(Value::Null);

        let properties = props([
            ("namespace", Value::from(self.namespaces.join("."))),
            ("kind", Value::from(type_kind.as_str())),
            ("visibility", Value::from(visibility(&modifiers, "internal"))),
            ("modifiers", json!(modifiers)),
            ("is_static", Value::from(has(&modifiers, "static"))),
            ("is_abstract", Value::from(has(&modifiers, "abstract"))),
            ("is_sealed", Value::from(has(&modifiers, "sealed"))),
            ("is_partial", Value::from(has(&modifiers, "partial"))),
            ("base_classes", json!(base_classes)),
            ("interfaces", json!(interfaces)),
            ("type_parameters", type_parameters),
            ("docstring", self.xml_doc(node)),
        ]);
        let emission = self
            .builder
            .emit(type_kind.node_kind(), name, Some(&node), properties);
        for base in base_classes.iter().chain(interfaces.iter()) {
            self.builder.base(&emission, base);
        }

        self.builder.enter(name, ScopeKind::Type, &emission);
        let body = node.child_by_field_name("body");
        let members = body.map(|b| self.member_types(b)).unwrap_or_default();
        self.locals.push(members);
        if let (Some(body), false) = (body, type_kind == TypeKind::Enum) {
            self.visit_children(body);
        }
        self.locals.pop();
        self.builder.exit();
    }

    /// Split a base list into the base class and implemented interfaces.
    fn bases(&self, node: SyntaxNode<'_>, type_kind: TypeKind) -> (Vec<String>, Vec<String>) {
        let mut classes = Vec::new();
        let mut interfaces = Vec::new();
        let Some(list) = child_of_kind(node, "base_list") else {
            return (classes, interfaces);
        };
        let scope = self.builder.scope_path();

        let mut cursor = list.walk();
        let names: Vec<String> = list
            .named_children(&mut cursor)
            .filter(|c| c.kind() != "argument_list")
            .map(|c| base_type_name(self.text(c)).to_string())
            .filter(|n| !n.is_empty())
            .collect();

        for (position, base) in names.into_iter().enumerate() {
            // Only classes and records have a base class, and it comes first.
            let may_be_class =
                position == 0 && matches!(type_kind, TypeKind::Class | TypeKind::Record);
            let is_interface = match self.semantics.resolve_type(&base, &scope) {
                Ok(resolved) => resolved.kind == TypeKind::Interface || !may_be_class,
                Err(e) => {
                    tracing::debug!(
                        file = self.builder.rel_path(),
                        error = %e,
                        "classifying base type by position"
                    );
                    !may_be_class
                }
            };
            if is_interface {
                interfaces.push(base);
            } else {
                classes.push(base);
            }
        }
        (classes, interfaces)
    }

    /// Declared types of the fields and properties of a type body.
    fn member_types(&self, body: SyntaxNode<'_>) -> HashMap<String, Option<String>> {
        let mut out = HashMap::new();
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            match member.kind() {
                "field_declaration" => {
                    if let Some(declaration) = child_of_kind(member, "variable_declaration") {
                        let ty = declaration.child_by_field_name("type");
                        for (name, _, value) in self.declarators(declaration) {
                            out.insert(name, self.declared_type(ty, value));
                        }
                    }
                }
                "property_declaration" => {
                    if let Some(name) = member.child_by_field_name("name") {
                        let ty = member.child_by_field_name("type");
                        let value = member.child_by_field_name("value");
                        out.insert(self.text(name).to_string(), self.declared_type(ty, value));
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn method(&mut self, node: SyntaxNode<'_>) {
        let is_constructor = node.kind() == "constructor_declaration";
        let is_local = node.kind() == "local_function_statement";
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let kind = if !is_local && self.builder.current_scope_kind() == Some(ScopeKind::Type) {
            NodeKind::Method
        } else {
            NodeKind::Function
        };
        let modifiers = self.modifiers(node);
        let in_interface = self
            .builder
            .enclosing_type()
            .map_or(false, |(_, kind, _)| kind == NodeKind::Interface);

        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        let return_type = if is_constructor {
            Value::Null
        } else {
            node.child_by_field_name("returns")
                .or_else(|| node.child_by_field_name("type"))
                .map(|t| Value::from(self.text(t)))
                .unwrap_or(Value::Null)
        };

        let mut properties = props([
            ("parameters", json!(params.iter().map(|p| &p.name).collect::<Vec<_>>())),
            ("return_type", return_type),
            ("modifiers", json!(modifiers)),
            ("is_async", Value::from(has(&modifiers, "async"))),
            ("is_static", Value::from(has(&modifiers, "static"))),
            ("docstring", self.xml_doc(node)),
        ]);
        if kind == NodeKind::Method {
            let default_visibility = if in_interface { "public" } else { "private" };
            properties.insert(
                "visibility".into(),
                Value::from(visibility(&modifiers, default_visibility)),
            );
            properties.insert(
                "is_abstract".into(),
                Value::from(has(&modifiers, "abstract") || (in_interface && !has_body(node))),
            );
            properties.insert("is_virtual".into(), Value::from(has(&modifiers, "virtual")));
            properties.insert("is_override".into(), Value::from(has(&modifiers, "override")));
            properties.insert("is_constructor".into(), Value::from(is_constructor));
        }

        let emission = self.builder.emit(kind, name, Some(&node), properties);
        self.builder.enter(name, ScopeKind::Callable, &emission);

        let mut frame = HashMap::new();
        for (position, param) in params.iter().enumerate() {
            let type_name = if param.predefined {
                None
            } else {
                param.type_name.as_deref().map(|t| base_type_name(t).to_string())
            };
            frame.insert(param.name.clone(), type_name);
            let properties = props([
                ("type_annotation", param.type_name.clone().map(Value::from).unwrap_or(Value::Null)),
                ("default_value", param.default.clone().map(Value::from).unwrap_or(Value::Null)),
                ("modifier", param.modifier.clone().map(Value::from).unwrap_or(Value::Null)),
                ("position", Value::from(position)),
            ]);
            self.builder
                .emit(NodeKind::Parameter, &param.name, Some(&param.syntax), properties);
        }
        self.locals.push(frame);

        let mut cursor = node.walk();
        let children: Vec<SyntaxNode<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() != "parameter_list" {
                self.visit(child);
            }
        }

        self.locals.pop();
        self.builder.exit();
    }

    fn parameters<'t>(&self, list: SyntaxNode<'t>) -> Vec<Param<'t>> {
        let mut out = Vec::new();
        let mut cursor = list.walk();
        for param in list.named_children(&mut cursor) {
            if !matches!(param.kind(), "parameter" | "parameter_array") {
                continue;
            }
            let name = param
                .child_by_field_name("name")
                .or_else(|| last_child_of_kind(param, "identifier"));
            let Some(name) = name else {
                continue;
            };
            let ty = param.child_by_field_name("type").or_else(|| {
                let mut inner = param.walk();
                let found = param
                    .named_children(&mut inner)
                    .find(|c| c.kind().ends_with("_type") || c.kind() == "generic_name");
                found
            });
            let default = child_of_kind(param, "equals_value_clause")
                .and_then(|c| c.named_child(0))
                .or_else(|| after_token(param, "="))
                .map(|v| self.text(v).to_string());

            let mut modifier = None;
            let mut inner = param.walk();
            for child in param.children(&mut inner) {
                match child.kind() {
                    "ref" | "out" | "in" | "this" | "params" | "parameter_modifier" => {
                        modifier = Some(self.text(child).to_string());
                    }
                    _ => {}
                }
            }
            if param.kind() == "parameter_array" {
                modifier = Some("params".to_string());
            }

            out.push(Param {
                name: self.text(name).to_string(),
                syntax: param,
                type_name: ty.map(|t| self.text(t).to_string()),
                default,
                modifier,
                predefined: ty.map_or(false, is_predefined),
            });
        }
        out
    }

    fn property(&mut self, node: SyntaxNode<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let modifiers = self.modifiers(node);
        let ty = node.child_by_field_name("type");
        let value = node.child_by_field_name("value");
        let properties = props([
            ("type_annotation", ty.map(|t| Value::from(self.text(t))).unwrap_or(Value::Null)),
            ("default_value", value.map(|v| Value::from(self.text(v))).unwrap_or(Value::Null)),
            ("visibility", Value::from(visibility(&modifiers, "private"))),
            ("is_static", Value::from(has(&modifiers, "static"))),
            ("is_property", Value::from(true)),
            ("docstring", self.xml_doc(node)),
        ]);
        let emission = self
            .builder
            .emit(NodeKind::Variable, name, Some(&node), properties);
        self.attach_member(&emission);
        self.visit_children(node);
    }

    fn field(&mut self, node: SyntaxNode<'_>) {
        let Some(declaration) = child_of_kind(node, "variable_declaration") else {
            return;
        };
        let modifiers = self.modifiers(node);
        let ty = declaration.child_by_field_name("type");
        for (name, syntax, value) in self.declarators(declaration) {
            let properties = props([
                ("type_annotation", ty.map(|t| Value::from(self.text(t))).unwrap_or(Value::Null)),
                ("default_value", value.map(|v| Value::from(self.text(v))).unwrap_or(Value::Null)),
                ("visibility", Value::from(visibility(&modifiers, "private"))),
                ("is_static", Value::from(has(&modifiers, "static") || has(&modifiers, "const"))),
                ("is_readonly", Value::from(has(&modifiers, "readonly") || has(&modifiers, "const"))),
                ("is_property", Value::from(false)),
            ]);
            let emission = self
                .builder
                .emit(NodeKind::Variable, &name, Some(&syntax), properties);
            self.attach_member(&emission);
            if let Some(value) = value {
                self.visit(value);
            }
        }
    }

    fn attach_member(&mut self, emission: &Emission) {
        if self.builder.current_scope_kind() != Some(ScopeKind::Type) {
            return;
        }
        if let Some((type_id, _, _)) = self.builder.enclosing_type() {
            self.builder.member(&type_id, emission);
        }
    }

    fn local_declaration(&mut self, node: SyntaxNode<'_>) {
        let Some(declaration) = child_of_kind(node, "variable_declaration") else {
            self.visit_children(node);
            return;
        };
        let ty = declaration.child_by_field_name("type");
        for (name, syntax, value) in self.declarators(declaration) {
            let inferred = self.declared_type(ty, value);
            if let Some(frame) = self.locals.last_mut() {
                frame.insert(name.clone(), inferred);
            }
            let properties = props([
                ("type_annotation", ty.map(|t| Value::from(self.text(t))).unwrap_or(Value::Null)),
                ("default_value", value.map(|v| Value::from(self.text(v))).unwrap_or(Value::Null)),
                ("is_const", Value::from(has_token(node, "const"))),
            ]);
            self.builder
                .emit(NodeKind::Variable, &name, Some(&syntax), properties);
            if let Some(value) = value {
                self.visit(value);
            }
        }
    }

    /// `(name, declarator, initial value)` for each variable declared.
    fn declarators<'t>(&self, declaration: SyntaxNode<'t>) -> Vec<(String, SyntaxNode<'t>, Option<SyntaxNode<'t>>)> {
        let mut out = Vec::new();
        let mut cursor = declaration.walk();
        for declarator in declaration.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let name = declarator
                .child_by_field_name("name")
                .or_else(|| child_of_kind(declarator, "identifier"));
            let Some(name) = name else {
                continue;
            };
            let value = match child_of_kind(declarator, "equals_value_clause") {
                Some(clause) => clause.named_child(0),
                None => {
                    let mut inner = declarator.walk();
                    let found = declarator
                        .named_children(&mut inner)
                        .filter(|c| c.id() != name.id() && c.kind() != "bracketed_argument_list")
                        .last();
                    found
                }
            };
            out.push((self.text(name).to_string(), declarator, value));
        }
        out
    }

    /// Type name a declaration gives its variable, looking through `var`.
    fn declared_type(&self, ty: Option<SyntaxNode<'_>>, value: Option<SyntaxNode<'_>>) -> Option<String> {
        let ty = ty?;
        if is_predefined(ty) {
            return None;
        }
        let text = self.text(ty);
        if ty.kind() == "implicit_type" || text == "var" {
            let value = value?;
            if value.kind() != "object_creation_expression" {
                return None;
            }
            let created = value.child_by_field_name("type")?;
            return Some(base_type_name(self.text(created)).to_string());
        }
        Some(base_type_name(text).to_string())
    }

    fn local(&self, name: &str) -> Option<&Option<String>> {
        self.locals.iter().rev().find_map(|frame| frame.get(name))
    }

    fn member_of_type(&self, ty: &str) -> String {
        let scope = self.builder.scope_path();
        match self.semantics.resolve_type(ty, &scope) {
            Ok(resolved) => resolved.full_name,
            Err(e) => {
                tracing::debug!(
                    file = self.builder.rel_path(),
                    error = %e,
                    "using syntactic receiver type"
                );
                base_type_name(ty).to_string()
            }
        }
    }

    fn invocation(&mut self, node: SyntaxNode<'_>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let target = match function.kind() {
            "identifier" => CallTarget::Name(self.text(function).to_string()),
            "generic_name" => match child_of_kind(function, "identifier") {
                Some(id) => CallTarget::Name(self.text(id).to_string()),
                None => return,
            },
            "member_access_expression" => {
                let (Some(object), Some(member)) = (
                    function.child_by_field_name("expression"),
                    function.child_by_field_name("name"),
                ) else {
                    return;
                };
                let member = base_type_name(self.text(member)).to_string();
                match self.receiver(object) {
                    Some(Receiver::This) => CallTarget::SelfMember(member),
                    Some(Receiver::Type(object)) => CallTarget::Member { object, member },
                    None => return,
                }
            }
            _ => return,
        };
        self.builder.call(target);
    }

    fn receiver(&self, object: SyntaxNode<'_>) -> Option<Receiver> {
        match object.kind() {
            "this" | "this_expression" => Some(Receiver::This),
            "identifier" => {
                let name = self.text(object);
                match self.local(name) {
                    Some(Some(ty)) => Some(Receiver::Type(self.member_of_type(ty))),
                    Some(None) => None,
                    None => Some(Receiver::Type(name.to_string())),
                }
            }
            "generic_name" | "qualified_name" => {
                Some(Receiver::Type(base_type_name(self.text(object)).to_string()))
            }
            "object_creation_expression" => {
                let ty = object.child_by_field_name("type")?;
                Some(Receiver::Type(self.member_of_type(self.text(ty))))
            }
            "member_access_expression" => {
                let inner = object.child_by_field_name("expression")?;
                let name = object.child_by_field_name("name")?;
                if matches!(inner.kind(), "this" | "this_expression") {
                    // this.field.M()
                    let ty = self.local(self.text(name))?.as_ref()?;
                    return Some(Receiver::Type(self.member_of_type(ty)));
                }
                let text = self.text(object);
                let head = text.split('.').next().unwrap_or(text);
                if is_dotted_name(text) && self.local(head).is_none() {
                    Some(Receiver::Type(text.to_string()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn modifiers(&self, node: SyntaxNode<'_>) -> Vec<String> {
        let mut cursor = node.walk();
        let modifiers = node
            .children(&mut cursor)
            .filter(|c| c.kind() == "modifier")
            .map(|c| self.text(c).to_string())
            .collect();
        modifiers
    }

    /// Text of the `///` comments directly above a declaration, tags removed.
    fn xml_doc(&self, node: SyntaxNode<'_>) -> Value {
        let mut lines = Vec::new();
        let mut sibling = node.prev_sibling();
        while let Some(comment) = sibling {
            if comment.kind() != "comment" {
                break;
            }
            let text = self.text(comment).trim();
            let Some(line) = text.strip_prefix("///") else {
                break;
            };
            lines.push(line.trim().to_string());
            sibling = comment.prev_sibling();
        }
        if lines.is_empty() {
            return Value::Null;
        }
        lines.reverse();
        let joined = lines.join("\n");
        let cleaned = XML_TAG.replace_all(&joined, "");
        let cleaned = cleaned
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if cleaned.is_empty() {
            Value::Null
        } else {
            Value::from(cleaned)
        }
    }
}

enum Receiver {
    This,
    Type(String),
}

fn field_text<'s>(node: SyntaxNode<'_>, field: &str, source: &'s [u8]) -> &'s str {
    node.child_by_field_name(field)
        .map(|n| node_text(&n, source))
        .unwrap_or("")
}

fn child_of_kind<'t>(node: SyntaxNode<'t>, kind: &str) -> Option<SyntaxNode<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

fn last_child_of_kind<'t>(node: SyntaxNode<'t>, kind: &str) -> Option<SyntaxNode<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).filter(|c| c.kind() == kind).last();
    found
}

/// First named child following an anonymous `token`.
fn after_token<'t>(node: SyntaxNode<'t>, token: &str) -> Option<SyntaxNode<'t>> {
    let mut cursor = node.walk();
    let mut seen = false;
    for child in node.children(&mut cursor) {
        if seen && child.is_named() {
            return Some(child);
        }
        if child.kind() == token {
            seen = true;
        }
    }
    None
}

fn has_token(node: SyntaxNode<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == token);
    found
}

fn has_body(node: SyntaxNode<'_>) -> bool {
    node.child_by_field_name("body").is_some() || child_of_kind(node, "block").is_some()
        || child_of_kind(node, "arrow_expression_clause").is_some()
}

fn is_predefined(ty: SyntaxNode<'_>) -> bool {
    match ty.kind() {
        "predefined_type" => true,
        "nullable_type" | "array_type" => ty.named_child(0).map_or(false, is_predefined),
        _ => false,
    }
}

fn has(modifiers: &[String], modifier: &str) -> bool {
    modifiers.iter().any(|m| m == modifier)
}

fn visibility(modifiers: &[String], default: &'static str) -> String {
    let access: Vec<&str> = modifiers
        .iter()
        .map(String::as_str)
        .filter(|m| matches!(*m, "public" | "private" | "protected" | "internal"))
        .collect();
    if access.is_empty() {
        default.to_string()
    } else {
        access.join(" ")
    }
}

/// `IFoo` style names: `I` followed by another capital letter.
fn looks_like_interface(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('I') && chars.next().map_or(false, |c| c.is_ascii_uppercase())
}

/// Strip generic arguments, nullability, array ranks and `global::`.
fn base_type_name(text: &str) -> &str {
    let text = text.trim();
    let text = text.strip_prefix("global::").unwrap_or(text);
    let end = text.find(['<', '(', '[']).unwrap_or(text.len());
    text[..end].trim_end_matches('?').trim()
}

fn is_dotted_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'))
}
