//! Python extraction using tree-sitter-python.
//!
//! Emits classes, functions, methods, parameters, module/class/local
//! variables, instance attributes (`self.x = ...`), imports and calls. Names
//! are qualified by the dotted module path, e.g. `pkg.mod.Class.method`.

use serde_json::{json, Value};
use std::collections::HashMap;
use tree_sitter::Node as SyntaxNode;

use super::builder::{props, CallTarget, GraphBuilder, ScopeKind};
use super::external::{classify_python, ImportTarget};
use super::project::python_module_name;
use super::{parse_checked, ExtractContext, ExtractError, Extractor, FileGraph, Grammar, Language};
use crate::model::NodeKind;

/// Python front-end. Stateless; parsers come from the thread-local pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonExtractor;

impl PythonExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn extract(&self, ctx: &ExtractContext<'_>, source: &[u8]) -> Result<FileGraph, ExtractError> {
        let tree = parse_checked(Grammar::Python, source, ctx.parse_timeout)?;
        let module = python_module_name(ctx.rel_path);
        let mut walker = PythonWalker {
            ctx,
            builder: GraphBuilder::new(ctx, Language::Python, source, module),
            local_types: vec![HashMap::new()],
        };
        walker.visit_children(tree.root_node());
        Ok(walker.builder.finish())
    }
}

struct PythonWalker<'a> {
    ctx: &'a ExtractContext<'a>,
    builder: GraphBuilder<'a>,
    /// Variable -> class name, from `x = Foo(...)`, one map per function.
    local_types: Vec<HashMap<String, String>>,
}

struct Param<'t> {
    name: String,
    syntax: SyntaxNode<'t>,
    annotation: Option<String>,
    default: Option<String>,
}

impl<'a> PythonWalker<'a> {
    fn text(&self, node: SyntaxNode<'_>) -> &'a str {
        self.builder.text(&node)
    }

    fn visit_children(&mut self, node: SyntaxNode<'_>) {
        let mut cursor = node.walk();
        let children: Vec<SyntaxNode<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, &[]);
        }
    }

    fn visit(&mut self, node: SyntaxNode<'_>, decorators: &[String]) {
        match node.kind() {
            "class_definition" => self.class(node, decorators),
            "function_definition" => self.function(node, decorators),
            "decorated_definition" => {
                let mut cursor = node.walk();
                let decorators: Vec<String> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "decorator")
                    .map(|c| self.text(c).trim_start_matches('@').trim().to_string())
                    .collect();
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.visit(definition, &decorators);
                }
            }
            "import_statement" => self.import(node),
            "import_from_statement" => self.import_from(node),
            "assignment" => {
                self.assignment(node);
                self.visit_children(node);
            }
            "call" => {
                self.call(node);
                self.visit_children(node);
            }
            _ => self.visit_children(node),
        }
    }

    fn class(&mut self, node: SyntaxNode<'_>, decorators: &[String]) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);

        let mut bases = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                if matches!(base.kind(), "identifier" | "attribute") {
                    let text = self.text(base);
                    if text != "object" {
                        bases.push(text.to_string());
                    }
                }
            }
        }
        let is_abstract = bases.iter().any(|b| b == "ABC" || b == "abc.ABC");
        let body = node.child_by_field_name("body");

        let properties = props([
            ("base_classes", json!(bases)),
            ("decorators", json!(decorators)),
            ("docstring", self.docstring(body)),
            ("is_abstract", Value::from(is_abstract)),
        ]);
        let emission = self.builder.emit(NodeKind::Class, name, Some(&node), properties);
        for base in &bases {
            self.builder.base(&emission, base);
        }

        self.builder.enter(name, ScopeKind::Type, &emission);
        if let Some(body) = body {
            self.visit_children(body);
        }
        self.builder.exit();
    }

    fn function(&mut self, node: SyntaxNode<'_>, decorators: &[String]) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let is_method = self.builder.current_scope_kind() == Some(ScopeKind::Type);
        let kind = if is_method {
            NodeKind::Method
        } else {
            NodeKind::Function
        };

        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p, is_method))
            .unwrap_or_default();
        let is_async = node.child(0).map(|c| c.kind() == "async").unwrap_or(false);
        let is_static = decorators.iter().any(|d| d == "staticmethod");
        let is_abstract = decorators.iter().any(|d| d.ends_with("abstractmethod"));
        let return_type = node
            .child_by_field_name("return_type")
            .map(|t| Value::from(self.text(t)))
            .unwrap_or(Value::Null);
        let body = node.child_by_field_name("body");

        let mut properties = props([
            ("parameters", json!(params.iter().map(|p| &p.name).collect::<Vec<_>>())),
            ("return_type", return_type),
            ("docstring", self.docstring(body)),
            ("decorators", json!(decorators)),
            ("is_async", Value::from(is_async)),
            ("visibility", Value::from(visibility(name))),
        ]);
        if is_method {
            properties.insert("is_static".into(), Value::from(is_static));
            properties.insert("is_abstract".into(), Value::from(is_abstract));
            properties.insert("is_constructor".into(), Value::from(name == "__init__"));
        }

        let emission = self.builder.emit(kind, name, Some(&node), properties);
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
        if let Some(body) = body {
            self.visit_children(body);
        }

        self.local_types.pop();
        self.builder.exit();
    }

    fn parameters<'t>(&self, list: SyntaxNode<'t>, is_method: bool) -> Vec<Param<'t>> {
        let mut out = Vec::new();
        let mut cursor = list.walk();
        for (index, child) in list.named_children(&mut cursor).enumerate() {
            let (name_node, annotation, default) = match child.kind() {
                "identifier" => (Some(child), None, None),
                "typed_parameter" => (
                    child.named_child(0),
                    child.child_by_field_name("type"),
                    None,
                ),
                "default_parameter" => (
                    child.child_by_field_name("name"),
                    None,
                    child.child_by_field_name("value"),
                ),
                "typed_default_parameter" => (
                    child.child_by_field_name("name"),
                    child.child_by_field_name("type"),
                    child.child_by_field_name("value"),
                ),
                "list_splat_pattern" | "dictionary_splat_pattern" => (Some(child), None, None),
                _ => continue,
            };
            let Some(name_node) = name_node else {
                continue;
            };
            // `*args` / `**kwargs` keep their stars in the name.
            let name = self.text(name_node).to_string();
            if index == 0 && is_method && (name == "self" || name == "cls") {
                continue;
            }
            out.push(Param {
                name,
                syntax: child,
                annotation: annotation.map(|t| self.text(t).to_string()),
                default: default.map(|v| self.text(v).to_string()),
            });
        }
        out
    }

    fn docstring(&self, body: Option<SyntaxNode<'_>>) -> Value {
        let first = body.and_then(|b| b.named_child(0));
        let string = first
            .filter(|s| s.kind() == "expression_statement")
            .and_then(|s| s.named_child(0))
            .filter(|s| s.kind() == "string");
        match string {
            Some(s) => Value::from(strip_quotes(self.text(s))),
            None => Value::Null,
        }
    }

    fn assignment(&mut self, node: SyntaxNode<'_>) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        let right = node.child_by_field_name("right");
        let annotation = node.child_by_field_name("type");

        match left.kind() {
            "identifier" => {
                let name = self.text(left);
                if let Some(class) = right.and_then(|r| self.constructed_class(r)) {
                    if let Some(types) = self.local_types.last_mut() {
                        types.insert(name.to_string(), class);
                    }
                }
                let properties = props([
                    ("type_annotation", annotation.map(|t| Value::from(self.text(t))).unwrap_or(Value::Null)),
                    ("default_value", right.map(|r| Value::from(truncate(self.text(r)))).unwrap_or(Value::Null)),
                ]);
                self.builder
                    .emit(NodeKind::Variable, name, Some(&node), properties);
            }
            "pattern_list" | "tuple_pattern" => {
                let mut cursor = left.walk();
                let names: Vec<&str> = left
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "identifier")
                    .map(|c| self.text(c))
                    .collect();
                for name in names {
                    self.builder
                        .emit(NodeKind::Variable, name, Some(&node), Default::default());
                }
            }
            "attribute" => self.instance_attribute(left, node),
            _ => {}
        }
    }

    /// `self.x = ...` inside a method declares `x` on the class.
    fn instance_attribute(&mut self, target: SyntaxNode<'_>, assignment: SyntaxNode<'_>) {
        let object = target.child_by_field_name("object");
        if object.map(|o| self.text(o)) != Some("self") {
            return;
        }
        let Some(attribute) = target.child_by_field_name("attribute") else {
            return;
        };
        if self.builder.current_scope_kind() != Some(ScopeKind::Callable) {
            return;
        }
        let Some((type_id, type_kind, path)) = self.builder.enclosing_type() else {
            return;
        };
        let name = self.text(attribute);
        let properties = props([("is_instance_attribute", Value::from(true))]);
        let emission = self.builder.emit_at(
            &path,
            Some((type_id.clone(), type_kind)),
            NodeKind::Variable,
            name,
            Some(&assignment),
            properties,
        );
        self.builder.member(&type_id, &emission);
    }

    /// Class name when `value` is a constructor-style call `Foo(...)`.
    fn constructed_class(&self, value: SyntaxNode<'_>) -> Option<String> {
        if value.kind() != "call" {
            return None;
        }
        let function = value.child_by_field_name("function")?;
        let text = self.text(function);
        let last = text.rsplit('.').next()?;
        if is_dotted_name(text) && last.starts_with(|c: char| c.is_ascii_uppercase()) {
            Some(text.to_string())
        } else {
            None
        }
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
            "identifier" => CallTarget::Name(self.text(function).to_string()),
            "attribute" => {
                let (Some(object), Some(member)) = (
                    function.child_by_field_name("object"),
                    function.child_by_field_name("attribute"),
                ) else {
                    return;
                };
                let member = self.text(member).to_string();
                match object.kind() {
                    "identifier" => {
                        let object = self.text(object);
                        if object == "self" || object == "cls" {
                            CallTarget::SelfMember(member)
                        } else {
                            let object = self.local_type(object).unwrap_or_else(|| object.to_string());
                            CallTarget::Member { object, member }
                        }
                    }
                    "attribute" if is_dotted_name(self.text(object)) => CallTarget::Member {
                        object: self.text(object).to_string(),
                        member,
                    },
                    // Foo().bar()
                    "call" => match self.constructed_class(object) {
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

    fn import(&mut self, node: SyntaxNode<'_>) {
        let mut cursor = node.walk();
        let names: Vec<SyntaxNode<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for name_node in names {
            let (module, alias) = match name_node.kind() {
                "aliased_import" => (
                    name_node.child_by_field_name("name").map(|n| self.text(n)).unwrap_or(""),
                    name_node.child_by_field_name("alias").map(|n| self.text(n)),
                ),
                _ => (self.text(name_node), None),
            };
            if module.is_empty() {
                continue;
            }

            let project = &self.ctx.run.project;
            let target = classify_python(module, 0, self.ctx.rel_path, project);
            let properties = props([
                ("imported_names", json!(Vec::<String>::new())),
                ("alias", alias.map(Value::from).unwrap_or(Value::Null)),
                ("is_relative", Value::from(false)),
            ]);
            self.builder.import(module, &target, &node, properties);

            if target == ImportTarget::Local {
                // `import a.b` binds `a`; `import a.b as c` binds `c` to `a.b`.
                let (bound, bound_module) = match alias {
                    Some(alias) => (alias, module),
                    None => {
                        let head = module.split('.').next().unwrap_or(module);
                        (head, head)
                    }
                };
                let candidates = project.python_module_candidates(self.ctx.rel_path, bound_module, 0);
                self.builder.bind_import(bound, candidates, true);
            }
        }
    }

    fn import_from(&mut self, node: SyntaxNode<'_>) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let (level, module) = match module_node.kind() {
            "relative_import" => {
                let mut cursor = module_node.walk();
                let mut level = 0;
                let mut module = "";
                for child in module_node.named_children(&mut cursor) {
                    match child.kind() {
                        "import_prefix" => level = self.text(child).matches('.').count(),
                        "dotted_name" => module = self.text(child),
                        _ => {}
                    }
                }
                (level, module)
            }
            _ => (0, self.text(module_node)),
        };

        let mut names: Vec<(&str, Option<&str>)> = Vec::new();
        let mut cursor = node.walk();
        for child in node.children_by_field_name("name", &mut cursor) {
            match child.kind() {
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let alias = child.child_by_field_name("alias").map(|a| self.text(a));
                        names.push((self.text(name), alias));
                    }
                }
                _ => names.push((self.text(child), None)),
            }
        }
        let mut cursor = node.walk();
        let wildcard = node
            .named_children(&mut cursor)
            .any(|c| c.kind() == "wildcard_import");

        let display = format!("{}{}", ".".repeat(level), module);
        let project = &self.ctx.run.project;
        let target = classify_python(module, level, self.ctx.rel_path, project);

        let mut imported: Vec<&str> = names.iter().map(|(n, _)| *n).collect();
        if wildcard {
            imported.push("*");
        }
        let aliases: Vec<&str> = names.iter().filter_map(|(_, a)| *a).collect();
        let properties = props([
            ("imported_names", json!(imported)),
            ("alias", if aliases.is_empty() { Value::Null } else { json!(aliases) }),
            ("is_relative", Value::from(level > 0)),
        ]);
        self.builder.import(&display, &target, &node, properties);

        if target != ImportTarget::Local {
            return;
        }
        let modules = project.python_module_candidates(self.ctx.rel_path, module, level);
        for (name, alias) in names {
            let candidates: Vec<String> = modules
                .iter()
                .map(|m| if m.is_empty() { name.to_string() } else { format!("{}.{}", m, name) })
                .collect();
            self.builder.import_symbols(candidates.clone());
            self.builder.bind_import(alias.unwrap_or(name), candidates, false);
        }
    }
}

fn visibility(name: &str) -> &'static str {
    if name.starts_with("__") && !name.ends_with("__") {
        "private"
    } else if name.starts_with('_') && !name.starts_with("__") {
        "protected"
    } else {
        "public"
    }
}

fn is_dotted_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

/// Strip string prefixes and quotes from a Python string literal.
fn strip_quotes(literal: &str) -> String {
    let body = literal.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = body
            .strip_prefix(quote)
            .and_then(|b| b.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    body.trim().to_string()
}

const VALUE_PREVIEW_CHARS: usize = 200;

fn truncate(text: &str) -> String {
    match text.char_indices().nth(VALUE_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::ingest::{ProjectIndex, RunContext};
    use crate::model::{LinkKind, RelationshipType};
    use std::path::Path;
    use std::time::Duration;

    fn extract_with(rel_path: &str, source: &str, config: &ExtractorConfig, run: &RunContext) -> FileGraph {
        let ctx = ExtractContext {
            rel_path,
            abs_path: Path::new(rel_path),
            checksum: "0",
            config,
            run,
            parse_timeout: Duration::ZERO,
        };
        PythonExtractor::new().extract(&ctx, source.as_bytes()).unwrap()
    }

    fn extract(rel_path: &str, source: &str) -> FileGraph {
        let run = RunContext::new(Default::default(), ProjectIndex::from_paths(["a.py", "b.py"]));
        extract_with(rel_path, source, &ExtractorConfig::default(), &run)
    }

    fn node<'g>(graph: &'g FileGraph, name: &str) -> &'g crate::model::Node {
        graph
            .nodes
            .iter()
            .find(|n| n.name == name)
            .unwrap_or_else(|| panic!("no node named {}", name))
    }

    fn has_edge(graph: &FileGraph, source: &str, target: &str, rel_type: RelationshipType) -> bool {
        let s = &node(graph, source).id;
        let t = &node(graph, target).id;
        graph
            .relationships
            .iter()
            .any(|r| &r.source_id == s && &r.target_id == t && r.rel_type == rel_type)
    }

    #[test]
    fn test_class_with_methods() {
        let source = r#"
class Foo(Base):
    """A foo."""

    def __init__(self, size: int = 3):
        self.size = size

    @staticmethod
    def make():
        return Foo()

class Base:
    pass
"#;
        let graph = extract("a.py", source);

        let foo = node(&graph, "Foo");
        assert_eq!(foo.kind, NodeKind::Class);
        assert_eq!(foo.full_name, "a.Foo");
        assert_eq!(foo.properties["docstring"], "A foo.");
        assert_eq!(foo.properties["base_classes"], json!(["Base"]));

        let init = node(&graph, "__init__");
        assert_eq!(init.kind, NodeKind::Method);
        assert_eq!(init.properties["is_constructor"], true);
        assert_eq!(init.properties["parameters"], json!(["size"]));
        assert!(has_edge(&graph, "Foo", "__init__", RelationshipType::Defines));
        assert!(has_edge(&graph, "__init__", "size", RelationshipType::Declares));
        assert!(has_edge(&graph, "Foo", "Base", RelationshipType::Extends));
        assert!(has_edge(&graph, "make", "Foo", RelationshipType::Instantiates));
        assert_eq!(node(&graph, "make").properties["is_static"], true);
    }

    #[test]
    fn test_instance_attributes_need_variables() {
        let source = "class Foo:\n    def __init__(self):\n        self.count = 0\n";
        let graph = extract("a.py", source);
        assert!(graph.nodes.iter().all(|n| n.kind != NodeKind::Variable));

        let config = ExtractorConfig {
            include_variables: true,
            ..ExtractorConfig::default()
        };
        let run = RunContext::default();
        let graph = extract_with("a.py", source, &config, &run);
        let count = node(&graph, "count");
        assert_eq!(count.full_name, "a.Foo.count");
        assert!(has_edge(&graph, "Foo", "count", RelationshipType::HasMember));
        assert!(has_edge(&graph, "Foo", "count", RelationshipType::Declares));
    }

    #[test]
    fn test_cross_file_import_and_calls() {
        let source = r#"
from a import Foo

def call_bar():
    x = Foo()
    x.bar()
"#;
        let graph = extract("b.py", source);

        let import = graph.nodes.iter().find(|n| n.kind == NodeKind::Import).unwrap();
        assert_eq!(import.name, "a");
        assert_eq!(import.properties["imported_names"], json!(["Foo"]));
        assert!(has_edge(&graph, "b.py", "a", RelationshipType::Contains));

        let links: Vec<(LinkKind, Vec<String>)> = graph
            .references
            .iter()
            .map(|r| (r.kind, r.candidates.clone()))
            .collect();
        assert!(links.contains(&(LinkKind::Imports, vec!["a.Foo".to_string()])));
        assert!(links.contains(&(LinkKind::Calls, vec!["a.Foo".to_string()])));
        assert!(links.contains(&(LinkKind::Calls, vec!["a.Foo.bar".to_string()])));
    }

    #[test]
    fn test_external_import_creates_library() {
        let graph = extract("a.py", "import numpy as np\nimport os\n");
        let libraries: Vec<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::ExternalLibrary)
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(libraries, vec!["numpy"]);
        assert!(has_edge(&graph, "a.py", "numpy", RelationshipType::Imports));
    }

    #[test]
    fn test_excluded_classes_keep_methods() {
        let config = ExtractorConfig {
            include_classes: false,
            ..ExtractorConfig::default()
        };
        let run = RunContext::default();
        let graph = extract_with("a.py", "class Foo:\n    def bar(self):\n        pass\n", &config, &run);
        assert!(graph.nodes.iter().all(|n| n.kind != NodeKind::Class));
        assert!(has_edge(&graph, "a.py", "bar", RelationshipType::Contains));
    }

    #[test]
    fn test_syntax_error_fails_file() {
        let run = RunContext::default();
        let config = ExtractorConfig::default();
        let ctx = ExtractContext {
            rel_path: "bad.py",
            abs_path: Path::new("bad.py"),
            checksum: "0",
            config: &config,
            run: &run,
            parse_timeout: Duration::ZERO,
        };
        let result = PythonExtractor::new().extract(&ctx, b"def broken(:\n");
        assert!(matches!(result, Err(ExtractError::Syntax { .. })));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"\"\"Doc.\"\"\""), "Doc.");
        assert_eq!(strip_quotes("r'raw'"), "raw");
    }
}
