//! JavaScript and TypeScript extraction.
//!
//! One walker covers `.js/.jsx/.mjs/.cjs` (tree-sitter-javascript) and
//! `.ts/.mts/.cts/.tsx` (tree-sitter-typescript; TSX has its own grammar).
//! Names are qualified by the module path without extension, e.g.
//! `src/utils.Parser.parse`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::Node as SyntaxNode;

use super::builder::{props, CallTarget, GraphBuilder, ScopeKind};
use super::external::{classify_js, ImportTarget};
use super::project::js_module_name;
use super::{parse_checked, ExtractContext, ExtractError, Extractor, FileGraph, Grammar, Language};
use crate::model::{LinkKind, NodeKind};

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs"];
const TS_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts"];

/// JS/TS front-end for one of [`Language::JavaScript`] or
/// [`Language::TypeScript`].
#[derive(Debug, Clone, Copy)]
pub struct JavaScriptExtractor {
    language: Language,
}

impl JavaScriptExtractor {
    pub fn new(language: Language) -> Self {
        Self { language }
    }
}

impl Extractor for JavaScriptExtractor {
    fn language(&self) -> Language {
        self.language
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self.language {
            Language::TypeScript => TS_EXTENSIONS,
            _ => JS_EXTENSIONS,
        }
    }

    fn extract(&self, ctx: &ExtractContext<'_>, source: &[u8]) -> Result<FileGraph, ExtractError> {
        let grammar = Grammar::for_path(Path::new(ctx.rel_path))
            .filter(|g| g.language() == self.language)
            .ok_or_else(|| ExtractError::Unsupported(ctx.rel_path.to_string()))?;
        let tree = parse_checked(grammar, source, ctx.parse_timeout)?;

        let module = js_module_name(ctx.rel_path).unwrap_or_else(|| ctx.rel_path.to_string());
        let mut walker = JsWalker {
            ctx,
            builder: GraphBuilder::new(ctx, self.language, source, module),
            local_types: vec![HashMap::new()],
        };
        walker.visit_children(tree.root_node());
        Ok(walker.builder.finish())
    }
}

struct JsWalker<'a> {
    ctx: &'a ExtractContext<'a>,
    builder: GraphBuilder<'a>,
    /// Variable -> class name, from `const x = new Foo()`.
    local_types: Vec<HashMap<String, String>>,
}

struct Param<'t> {
    name: String,
    syntax: SyntaxNode<'t>,
    annotation: Option<String>,
    default: Option<String>,
}

impl<'a> JsWalker<'a> {
    fn text(&self, node: SyntaxNode<'_>) -> &'a str {
        self.builder.text(&node)
    }

    fn visit_children(&mut self, node: SyntaxNode<'_>) {
        let mut cursor = node.walk();
        let children: Vec<SyntaxNode<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: SyntaxNode<'_>) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name);
                    self.function(node, name, NodeKind::Function, node);
                }
            }
            "class_declaration" | "abstract_class_declaration" => self.class(node),
            "interface_declaration" => self.interface(node),
            "lexical_declaration" | "variable_declaration" => self.declaration(node),
            "import_statement" => self.import(node),
            "export_statement" => self.export(node),
            "call_expression" => {
                self.call(node);
                self.visit_children(node);
            }
            "new_expression" => {
                self.construct(node);
                self.visit_children(node);
            }
            "assignment_expression" => {
                self.this_assignment(node);
                self.visit_children(node);
            }
            "comment" => {}
            _ => self.visit_children(node),
        }
    }

    /// Emit a function or method and walk its body.
    fn function(&mut self, func: SyntaxNode<'_>, name: &str, kind: NodeKind, syntax: SyntaxNode<'_>) {
        let params = func
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        let return_type = func
            .child_by_field_name("return_type")
            .map(|t| Value::from(type_annotation(self.text(t))))
            .unwrap_or(Value::Null);
        let is_async = has_token(func, "async");
        let is_generator = func.kind().contains("generator") || has_token(func, "*");

        let mut properties = props([
            ("parameters", json!(params.iter().map(|p| &p.name).collect::<Vec<_>>())),
            ("return_type", return_type),
            ("docstring", self.jsdoc(syntax)),
            ("is_async", Value::from(is_async)),
            ("is_generator", Value::from(is_generator)),
            ("is_arrow", Value::from(func.kind() == "arrow_function")),
        ]);
        if kind == NodeKind::Method {
            properties.insert("is_static".into(), Value::from(has_token(syntax, "static")));
            properties.insert(
                "is_abstract".into(),
                Value::from(
                    syntax.kind() == "abstract_method_signature" || has_token(syntax, "abstract"),
                ),
            );
            properties.insert("is_constructor".into(), Value::from(name == "constructor"));
            properties.insert("visibility".into(), Value::from(self.visibility(syntax, name)));
        }

        let emission = self.builder.emit(kind, name, Some(&syntax), properties);
        self.builder.enter(name, ScopeKind::Callable, &emission);
        self.local_types.push(HashMap::new());

        for (position, param) in params.iter().enumerate() {
            let properties = props([
                ("type_annotation", param.annotation.clone().map(Value::from).unwrap_or(Value::Null)),
                ("default_value", param.default.clone().map(Value::from).unwrap_or(Value::Null)),
                ("position", Value::from(position)),
            ]);
            self.builder
                .emit(NodeKind::Parameter, &param.name, Some(&param.syntax), properties);
        }
        if let Some(body) = func.child_by_field_name("body") {
            self.visit(body);
        }

        self.local_types.pop();
        self.builder.exit();
    }

    fn parameters<'t>(&self, list: SyntaxNode<'t>) -> Vec<Param<'t>> {
        let mut out = Vec::new();
        let mut cursor = list.walk();
        for child in list.named_children(&mut cursor) {
            let (pattern, annotation, default) = match child.kind() {
                "identifier" => (Some(child), None, None),
                "assignment_pattern" => (
                    child.child_by_field_name("left"),
                    None,
                    child.child_by_field_name("right"),
                ),
                "rest_pattern" => (Some(child), None, None),
                "required_parameter" | "optional_parameter" => (
                    child.child_by_field_name("pattern"),
                    child.child_by_field_name("type"),
                    child.child_by_field_name("value"),
                ),
                _ => continue,
            };
            let Some(pattern) = pattern else {
                continue;
            };
            // Destructured parameters have no single name.
            if !matches!(pattern.kind(), "identifier" | "rest_pattern") {
                continue;
            }
            out.push(Param {
                name: self.text(pattern).to_string(),
                syntax: child,
                annotation: annotation.map(|t| type_annotation(self.text(t)).to_string()),
                default: default.map(|v| self.text(v).to_string()),
            });
        }
        out
    }

    fn visibility(&self, member: SyntaxNode<'_>, name: &str) -> &'static str {
        let mut cursor = member.walk();
        let modifier = member
            .children(&mut cursor)
            .find(|c| c.kind() == "accessibility_modifier")
            .map(|c| self.text(c));
        match modifier {
            Some("private") => "private",
            Some("protected") => "protected",
            _ if name.starts_with('#') => "private",
            _ => "public",
        }
    }

    /// `/** ... */` comment directly above a declaration (or its export).
    fn jsdoc(&self, node: SyntaxNode<'_>) -> Value {
        let mut target = node;
        if let Some(parent) = node.parent() {
            if matches!(parent.kind(), "export_statement" | "variable_declarator") {
                target = parent;
            }
        }
        if target.kind() == "variable_declarator" {
            if let Some(statement) = target.parent() {
                target = statement;
                if let Some(export) = statement.parent().filter(|p| p.kind() == "export_statement") {
                    target = export;
                }
            }
        }
        match target.prev_sibling().filter(|p| p.kind() == "comment") {
            Some(comment) if self.text(comment).starts_with("/**") => {
                Value::from(clean_jsdoc(self.text(comment)))
            }
            _ => Value::Null,
        }
    }

    fn class(&mut self, node: SyntaxNode<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let (bases, interfaces) = self.heritage(node);

        let mut cursor = node.walk();
        let decorators: Vec<&str> = node
            .children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .map(|c| self.text(c).trim_start_matches('@'))
            .collect();
        let properties = props([
            ("base_classes", json!(bases)),
            ("interfaces", json!(interfaces)),
            ("decorators", json!(decorators)),
            ("docstring", self.jsdoc(node)),
            (
                "is_abstract",
                Value::from(node.kind() == "abstract_class_declaration"),
            ),
        ]);
        let emission = self.builder.emit(NodeKind::Class, name, Some(&node), properties);
        for base in bases.iter().chain(interfaces.iter()) {
            self.builder.base(&emission, base);
        }

        self.builder.enter(name, ScopeKind::Type, &emission);
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            let members: Vec<SyntaxNode<'_>> = body.named_children(&mut cursor).collect();
            for member in members {
                self.class_member(member);
            }
        }
        self.builder.exit();
    }

    fn heritage(&self, class: SyntaxNode<'_>) -> (Vec<String>, Vec<String>) {
        let mut bases = Vec::new();
        let mut interfaces = Vec::new();
        let mut cursor = class.walk();
        for heritage in class.children(&mut cursor) {
            if heritage.kind() != "class_heritage" {
                continue;
            }
            let mut inner = heritage.walk();
            for clause in heritage.named_children(&mut inner) {
                match clause.kind() {
                    "extends_clause" => {
                        let mut c = clause.walk();
                        bases.extend(
                            clause
                                .named_children(&mut c)
                                .filter(|t| t.kind() != "type_arguments")
                                .map(|t| type_name(self.text(t))),
                        );
                    }
                    "implements_clause" => {
                        let mut c = clause.walk();
                        interfaces.extend(
                            clause
                                .named_children(&mut c)
                                .map(|t| type_name(self.text(t))),
                        );
                    }
                    // JavaScript: `extends <expression>`
                    _ => bases.push(type_name(self.text(clause))),
                }
            }
        }
        (bases, interfaces)
    }

    fn class_member(&mut self, member: SyntaxNode<'_>) {
        match member.kind() {
            "method_definition" | "method_signature" | "abstract_method_signature" => {
                if let Some(name) = member.child_by_field_name("name") {
                    let name = self.text(name);
                    self.function(member, name, NodeKind::Method, member);
                }
            }
            "field_definition" | "public_field_definition" => self.field(member),
            _ => {}
        }
    }

    fn field(&mut self, node: SyntaxNode<'_>) {
        let Some(name_node) = node
            .child_by_field_name("property")
            .or_else(|| node.child_by_field_name("name"))
        else {
            return;
        };
        let name = self.text(name_node);
        let value = node.child_by_field_name("value");

        // `handle = () => {}` is a method in everything but syntax.
        if let Some(func) = value.filter(|v| is_function_value(v.kind())) {
            self.function(func, name, NodeKind::Method, node);
            return;
        }

        let properties = props([
            (
                "type_annotation",
                node.child_by_field_name("type")
                    .map(|t| Value::from(type_annotation(self.text(t))))
                    .unwrap_or(Value::Null),
            ),
            (
                "default_value",
                value.map(|v| Value::from(self.text(v))).unwrap_or(Value::Null),
            ),
            ("is_static", Value::from(has_token(node, "static"))),
            ("visibility", Value::from(self.visibility(node, name))),
        ]);
        let emission = self.builder.emit(NodeKind::Variable, name, Some(&node), properties);
        if let Some((type_id, _, _)) = self.builder.enclosing_type() {
            self.builder.member(&type_id, &emission);
        }
        if let Some(value) = value {
            self.visit(value);
        }
    }

    fn interface(&mut self, node: SyntaxNode<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);

        let mut bases = Vec::new();
        let mut cursor = node.walk();
        for clause in node.named_children(&mut cursor) {
            if clause.kind() == "extends_type_clause" {
                let mut c = clause.walk();
                bases.extend(
                    clause
                        .named_children(&mut c)
                        .map(|t| type_name(self.text(t))),
                );
            }
        }

        let properties = props([
            ("base_classes", json!(bases)),
            ("docstring", self.jsdoc(node)),
        ]);
        let emission = self
            .builder
            .emit(NodeKind::Interface, name, Some(&node), properties);
        for base in &bases {
            self.builder.base(&emission, base);
        }

        self.builder.enter(name, ScopeKind::Type, &emission);
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            let members: Vec<SyntaxNode<'_>> = body.named_children(&mut cursor).collect();
            for member in members {
                match member.kind() {
                    "method_signature" => self.class_member(member),
                    "property_signature" => self.field(member),
                    _ => {}
                }
            }
        }
        self.builder.exit();
    }

    fn declaration(&mut self, node: SyntaxNode<'_>) {
        let declaration_kind = node.child(0).map(|c| self.text(c)).unwrap_or("var");
        let mut cursor = node.walk();
        let declarators: Vec<SyntaxNode<'_>> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "variable_declarator")
            .collect();
        for declarator in declarators {
            self.declarator(declarator, declaration_kind, node);
        }
    }

    fn declarator(&mut self, node: SyntaxNode<'_>, declaration_kind: &str, statement: SyntaxNode<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let value = node.child_by_field_name("value");

        if let Some(specifier) = value.and_then(|v| self.require_specifier(v)) {
            self.require(name_node, specifier, statement);
            return;
        }
        if name_node.kind() != "identifier" {
            if let Some(value) = value {
                self.visit(value);
            }
            return;
        }
        let name = self.text(name_node);

        if let Some(func) = value.filter(|v| is_function_value(v.kind())) {
            self.function(func, name, NodeKind::Function, node);
            return;
        }
        if let Some(class) = value.and_then(|v| self.constructed_class(v)) {
            if let Some(types) = self.local_types.last_mut() {
                types.insert(name.to_string(), class);
            }
        }

        let properties = props([
            ("declaration_kind", Value::from(declaration_kind)),
            (
                "type_annotation",
                node.child_by_field_name("type")
                    .map(|t| Value::from(type_annotation(self.text(t))))
                    .unwrap_or(Value::Null),
            ),
            (
                "default_value",
                value.map(|v| Value::from(self.text(v))).unwrap_or(Value::Null),
            ),
        ]);
        self.builder
            .emit(NodeKind::Variable, name, Some(&node), properties);
        if let Some(value) = value {
            self.visit(value);
        }
    }

    /// `require('x')` -> `x`.
    fn require_specifier(&self, value: SyntaxNode<'_>) -> Option<&'a str> {
        if value.kind() != "call_expression" {
            return None;
        }
        let function = value.child_by_field_name("function")?;
        if self.text(function) != "require" {
            return None;
        }
        let arguments = value.child_by_field_name("arguments")?;
        let first = arguments.named_child(0).filter(|a| a.kind() == "string")?;
        Some(string_value(self.text(first)))
    }

    fn require(&mut self, binding: SyntaxNode<'_>, specifier: &str, statement: SyntaxNode<'_>) {
        let mut names: Vec<(String, String)> = Vec::new();
        let mut namespace = None;
        match binding.kind() {
            "identifier" => namespace = Some(self.text(binding).to_string()),
            "object_pattern" => {
                let mut cursor = binding.walk();
                for prop in binding.named_children(&mut cursor) {
                    match prop.kind() {
                        "shorthand_property_identifier_pattern" => {
                            let name = self.text(prop).to_string();
                            names.push((name.clone(), name));
                        }
                        "pair_pattern" => {
                            if let (Some(key), Some(value)) =
                                (prop.child_by_field_name("key"), prop.child_by_field_name("value"))
                            {
                                names.push((self.text(key).to_string(), self.text(value).to_string()));
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        self.bind_module(specifier, statement, names, namespace, false);
    }

    fn import(&mut self, node: SyntaxNode<'_>) {
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let specifier = string_value(self.text(source));

        let mut names: Vec<(String, String)> = Vec::new();
        let mut namespace = None;
        let mut cursor = node.walk();
        for clause in node.named_children(&mut cursor) {
            if clause.kind() != "import_clause" {
                continue;
            }
            let mut inner = clause.walk();
            for part in clause.named_children(&mut inner) {
                match part.kind() {
                    "identifier" => names.push(("default".into(), self.text(part).to_string())),
                    "namespace_import" => {
                        namespace = part.named_child(0).map(|n| self.text(n).to_string());
                    }
                    "named_imports" => {
                        let mut specs = part.walk();
                        for spec in part.named_children(&mut specs) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let Some(name) = spec.child_by_field_name("name") else {
                                continue;
                            };
                            let name = self.text(name).to_string();
                            let alias = spec
                                .child_by_field_name("alias")
                                .map(|a| self.text(a).to_string())
                                .unwrap_or_else(|| name.clone());
                            names.push((name, alias));
                        }
                    }
                    _ => {}
                }
            }
        }
        let type_only = has_token(node, "type");
        self.bind_module(specifier, node, names, namespace, type_only);
    }

    /// Emit the Import node and bind the local names it introduces.
    fn bind_module(
        &mut self,
        specifier: &str,
        statement: SyntaxNode<'_>,
        names: Vec<(String, String)>,
        namespace: Option<String>,
        type_only: bool,
    ) {
        let target = classify_js(specifier);
        let mut imported: Vec<&str> = names.iter().map(|(n, _)| n.as_str()).collect();
        if namespace.is_some() {
            imported.push("*");
        }
        let aliases: Vec<&str> = names
            .iter()
            .filter(|(n, a)| n != a)
            .map(|(_, a)| a.as_str())
            .chain(namespace.as_deref())
            .collect();
        let mut properties = props([
            ("imported_names", json!(imported)),
            ("alias", if aliases.is_empty() { Value::Null } else { json!(aliases) }),
            ("is_relative", Value::from(specifier.starts_with('.'))),
        ]);
        if type_only {
            properties.insert("is_type_only".into(), Value::from(true));
        }
        self.builder.import(specifier, &target, &statement, properties);

        if target != ImportTarget::Local {
            return;
        }
        let modules = self
            .ctx
            .run
            .project
            .js_module_candidates(self.ctx.rel_path, specifier);
        for (name, alias) in &names {
            // A default import is assumed to carry the declaration's name.
            let symbol = if name == "default" { alias } else { name };
            let candidates: Vec<String> = modules.iter().map(|m| format!("{}.{}", m, symbol)).collect();
            self.builder.import_symbols(candidates.clone());
            self.builder.bind_import(alias, candidates, false);
        }
        if let Some(namespace) = namespace {
            self.builder.bind_import(&namespace, modules, true);
        }
    }

    fn export(&mut self, node: SyntaxNode<'_>) {
        let is_default = has_token(node, "default");
        let source = node
            .child_by_field_name("source")
            .map(|s| string_value(self.text(s)));

        if let Some(declaration) = node.child_by_field_name("declaration") {
            let names = self.declared_names(declaration);
            let name = names.first().copied().unwrap_or("default");
            let properties = props([
                ("exported_names", json!(names)),
                ("is_default", Value::from(is_default)),
            ]);
            let export = self.builder.emit(NodeKind::Export, name, Some(&node), properties);
            self.visit(declaration);
            if let Some(id) = export.id() {
                for name in &names {
                    self.builder.export(id, name);
                }
            }
            return;
        }

        if let Some(value) = node.child_by_field_name("value") {
            // export default <expression>
            let local = match value.kind() {
                "identifier" => Some(self.text(value)),
                "class" | "function_expression" | "function" => {
                    value.child_by_field_name("name").map(|n| self.text(n))
                }
                _ => None,
            };
            let properties = props([
                ("exported_names", json!(["default"])),
                ("is_default", Value::from(true)),
            ]);
            let export = self
                .builder
                .emit(NodeKind::Export, local.unwrap_or("default"), Some(&node), properties);
            if value.kind() != "identifier" {
                self.visit(value);
            }
            if let (Some(id), Some(local)) = (export.id(), local) {
                self.builder.export(id, local);
            }
            return;
        }

        // export { a, b as c } [from './m'] / export * from './m'
        let mut specifiers: Vec<(&str, &str)> = Vec::new();
        let mut cursor = node.walk();
        for clause in node.named_children(&mut cursor) {
            if clause.kind() != "export_clause" {
                continue;
            }
            let mut inner = clause.walk();
            for spec in clause.named_children(&mut inner) {
                if let Some(name) = spec.child_by_field_name("name") {
                    let name = self.text(name);
                    let alias = spec
                        .child_by_field_name("alias")
                        .map(|a| self.text(a))
                        .unwrap_or(name);
                    specifiers.push((name, alias));
                }
            }
        }
        let exported: Vec<&str> = if specifiers.is_empty() {
            vec!["*"]
        } else {
            specifiers.iter().map(|(_, alias)| *alias).collect()
        };
        let mut properties = props([
            ("exported_names", json!(exported)),
            ("is_default", Value::from(is_default)),
        ]);
        if let Some(source) = source {
            properties.insert("module".into(), Value::from(source));
        }
        let export = self
            .builder
            .emit(NodeKind::Export, &exported.join(","), Some(&node), properties);
        let Some(export_id) = export.id().map(str::to_string) else {
            return;
        };

        match source {
            None => {
                for (name, _) in &specifiers {
                    self.builder.export(&export_id, name);
                }
            }
            Some(source) => match classify_js(source) {
                ImportTarget::External { ecosystem, name } => {
                    if self.ctx.config.track_external_libraries {
                        self.builder.import_external(ecosystem, &name);
                    }
                }
                ImportTarget::Builtin => {}
                ImportTarget::Local => {
                    let modules = self
                        .ctx
                        .run
                        .project
                        .js_module_candidates(self.ctx.rel_path, source);
                    for (name, _) in &specifiers {
                        let candidates = modules.iter().map(|m| format!("{}.{}", m, name)).collect();
                        self.builder.pending(&export_id, LinkKind::Exports, candidates);
                    }
                }
            },
        }
    }

    fn declared_names(&self, declaration: SyntaxNode<'_>) -> Vec<&'a str> {
        match declaration.kind() {
            "lexical_declaration" | "variable_declaration" => {
                let mut cursor = declaration.walk();
                declaration
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "variable_declarator")
                    .filter_map(|d| d.child_by_field_name("name"))
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| self.text(n))
                    .collect()
            }
            _ => declaration
                .child_by_field_name("name")
                .map(|n| vec![self.text(n)])
                .unwrap_or_default(),
        }
    }

    /// `this.x = ...` inside a method declares `x` on the class.
    fn this_assignment(&mut self, node: SyntaxNode<'_>) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "member_expression" {
            return;
        }
        let is_this = left
            .child_by_field_name("object")
            .map(|o| o.kind() == "this")
            .unwrap_or(false);
        let Some(property) = left.child_by_field_name("property") else {
            return;
        };
        if !is_this || self.builder.enclosing_callable().is_none() {
            return;
        }
        let Some((type_id, type_kind, path)) = self.builder.enclosing_type() else {
            return;
        };
        let name = self.text(property);
        let properties = props([("is_instance_attribute", Value::from(true))]);
        let emission = self.builder.emit_at(
            &path,
            Some((type_id.clone(), type_kind)),
            NodeKind::Variable,
            name,
            Some(&node),
            properties,
        );
        self.builder.member(&type_id, &emission);
    }

    /// Class name when `value` is `new Foo(...)`.
    fn constructed_class(&self, value: SyntaxNode<'_>) -> Option<String> {
        if value.kind() != "new_expression" {
            return None;
        }
        let constructor = value.child_by_field_name("constructor")?;
        let text = self.text(constructor);
        is_dotted_name(text).then(|| text.to_string())
    }

    fn local_type(&self, name: &str) -> Option<String> {
        self.local_types
            .iter()
            .rev()
            .find_map(|types| types.get(name).cloned())
    }

    fn call(&mut self, node: SyntaxNode<'_>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let target = match function.kind() {
            "identifier" => {
                let name = self.text(function);
                if name == "require" {
                    return;
                }
                CallTarget::Name(name.to_string())
            }
            "member_expression" => {
                let (Some(object), Some(property)) = (
                    function.child_by_field_name("object"),
                    function.child_by_field_name("property"),
                ) else {
                    return;
                };
                let member = self.text(property).to_string();
                match object.kind() {
                    "this" => CallTarget::SelfMember(member),
                    "identifier" => {
                        let object = self.text(object);
                        let object = self.local_type(object).unwrap_or_else(|| object.to_string());
                        CallTarget::Member { object, member }
                    }
                    "member_expression" if is_dotted_name(self.text(object)) => CallTarget::Member {
                        object: self.text(object).to_string(),
                        member,
                    },
                    // new Foo().bar()
                    "new_expression" => match self.constructed_class(object) {
                        Some(object) => CallTarget::Member { object, member },
                        None => return,
                    },
                    _ => return,
                }
            }
            _ => return,
        };
        self.builder.call(target);
    }

    fn construct(&mut self, node: SyntaxNode<'_>) {
        if let Some(class) = self.constructed_class(node) {
            self.builder.call(CallTarget::New(class));
        }
    }
}

fn has_token(node: SyntaxNode<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| !c.is_named() && c.kind() == token);
    found
}

fn is_function_value(kind: &str) -> bool {
    matches!(
        kind,
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

fn is_dotted_name(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

/// `: Foo<T>` -> `Foo<T>`.
fn type_annotation(text: &str) -> &str {
    text.trim_start_matches(':').trim()
}

/// `Base<T>` -> `Base`.
fn type_name(text: &str) -> String {
    text.split('<').next().unwrap_or(text).trim().to_string()
}

/// Contents of a string literal without its quotes.
fn string_value(literal: &str) -> &str {
    literal
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

fn clean_jsdoc(comment: &str) -> String {
    let body = comment
        .trim_start_matches("/**")
        .trim_end_matches("*/");
    body.lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
