//! Per-file graph construction shared by all extractors.
//!
//! Extractors walk their syntax tree and describe what they see; the builder
//! turns that into nodes with stable ids, containment edges to the lexical
//! parent, and deferred resolution of calls, bases and exports once every
//! declaration of the file is known.
//!
//! Kinds excluded by configuration produce [`Emission::Suppressed`]. Children
//! of a suppressed node attach to the nearest emitted ancestor, and no
//! relationship ever points at a suppressed entity.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::external::ImportTarget;
use super::manifest::Ecosystem;
use super::{node_text, ExtractContext, FileGraph, Language, ScopeStack, SCOPE_SEPARATOR};
use crate::identity::{file_id, generate_id};
use crate::model::{
    LinkKind, Node, NodeKind, PendingLink, Relationship, RelationshipType, SourceLocation,
};

/// Result of asking the builder to emit an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Emitted { id: String, kind: NodeKind },
    /// The kind is excluded by configuration; nothing was stored.
    Suppressed { kind: NodeKind, name: String },
}

impl Emission {
    pub fn id(&self) -> Option<&str> {
        match self {
            Emission::Emitted { id, .. } => Some(id),
            Emission::Suppressed { .. } => None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Emission::Emitted { kind, .. } | Emission::Suppressed { kind, .. } => *kind,
        }
    }

    pub fn is_emitted(&self) -> bool {
        matches!(self, Emission::Emitted { .. })
    }
}

/// What kind of lexical scope a frame opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Namespace,
    Type,
    Callable,
}

/// Call expression shapes the builder knows how to bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// `f()` or `Foo()`.
    Name(String),
    /// `new Foo()`.
    New(String),
    /// `self.m()` / `this.m()`.
    SelfMember(String),
    /// `obj.m()` where `obj` is a (possibly dotted) type, module or alias name.
    Member { object: String, member: String },
}

#[derive(Debug, Clone)]
struct Frame {
    name: String,
    kind: ScopeKind,
    container: Option<(String, NodeKind)>,
}

#[derive(Debug, Clone)]
struct LocalSymbol {
    id: String,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
struct ImportBinding {
    /// Qualified names the local alias may stand for, most likely first.
    candidates: Vec<String>,
    is_module: bool,
}

/// Lexical snapshot taken when a deferred reference is recorded.
#[derive(Debug, Clone)]
struct Site {
    source_id: String,
    scope: Vec<String>,
    kinds: Vec<ScopeKind>,
}

#[derive(Debug, Clone)]
struct DeferredCall {
    site: Site,
    target: CallTarget,
}

#[derive(Debug, Clone)]
struct DeferredBase {
    site: Site,
    name: String,
    from_interface: bool,
}

#[derive(Debug, Clone)]
struct DeferredExport {
    site: Site,
    name: String,
}

pub struct GraphBuilder<'a> {
    ctx: &'a ExtractContext<'a>,
    language: Language,
    source: &'a [u8],
    /// Prefix of every qualified name: the module path for Python and JS/TS,
    /// empty for C# (namespaces are scopes there).
    module: String,
    file_id: String,
    scope: ScopeStack,
    frames: Vec<Frame>,
    /// C# resolves unqualified member names through enclosing types.
    class_members_visible: bool,
    /// Namespaces searched for unqualified names (C# `using`).
    search_namespaces: Vec<String>,

    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
    edge_keys: HashSet<(String, String, RelationshipType)>,
    references: Vec<PendingLink>,
    reference_keys: HashSet<(String, LinkKind, Vec<String>)>,

    symbols: HashMap<String, LocalSymbol>,
    imports: HashMap<String, ImportBinding>,
    calls: Vec<DeferredCall>,
    bases: Vec<DeferredBase>,
    exports: Vec<DeferredExport>,
}

impl<'a> GraphBuilder<'a> {
    /// Start a file graph, emitting the File node.
    pub fn new(
        ctx: &'a ExtractContext<'a>,
        language: Language,
        source: &'a [u8],
        module: impl Into<String>,
    ) -> Self {
        let file_id = file_id(ctx.rel_path);
        let text = String::from_utf8_lossy(source);
        let line_count = text.lines().count();
        let file_name = ctx
            .rel_path
            .rsplit('/')
            .next()
            .unwrap_or(ctx.rel_path)
            .to_string();
        let extension = Path::new(ctx.rel_path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut file = Node::new(file_id.clone(), NodeKind::File, file_name)
            .with_full_name(ctx.rel_path)
            .with_property("path", ctx.rel_path)
            .with_property("file_path", ctx.rel_path)
            .with_property("absolute_path", ctx.abs_path.to_string_lossy().to_string())
            .with_property("extension", extension)
            .with_property("size", source.len() as u64)
            .with_property("checksum", ctx.checksum)
            .with_property("language", language.as_str())
            .with_property("line_count", line_count as u64);
        file.location = Some(SourceLocation {
            start_line: 1,
            end_line: line_count.max(1),
            start_column: 0,
            end_column: text.lines().last().map(|l| l.len()).unwrap_or(0),
        });
        if ctx.config.capture_content {
            file.raw_code = Some(text.into_owned());
        }

        Self {
            ctx,
            language,
            source,
            module: module.into(),
            file_id,
            scope: ScopeStack::new(),
            frames: Vec::new(),
            class_members_visible: false,
            search_namespaces: Vec::new(),
            nodes: vec![file],
            relationships: Vec::new(),
            edge_keys: HashSet::new(),
            references: Vec::new(),
            reference_keys: HashSet::new(),
            symbols: HashMap::new(),
            imports: HashMap::new(),
            calls: Vec::new(),
            bases: Vec::new(),
            exports: Vec::new(),
        }
    }

    pub fn with_class_members_visible(mut self, visible: bool) -> Self {
        self.class_members_visible = visible;
        self
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn rel_path(&self) -> &str {
        self.ctx.rel_path
    }

    pub fn context(&self) -> &ExtractContext<'a> {
        self.ctx
    }

    pub fn source(&self) -> &'a [u8] {
        self.source
    }

    pub fn text(&self, node: &tree_sitter::Node) -> &'a str {
        node_text(node, self.source)
    }

    /// Qualified name of `name` declared in the current scope.
    pub fn full_name(&self, name: &str) -> String {
        self.qualify(self.scope.components(), name)
    }

    fn qualify(&self, scope: &[String], name: &str) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(scope.len() + 2);
        if !self.module.is_empty() {
            parts.push(&self.module);
        }
        parts.extend(scope.iter().map(String::as_str));
        if !name.is_empty() {
            parts.push(name);
        }
        parts.join(SCOPE_SEPARATOR)
    }

    fn current_container(&self) -> (String, NodeKind) {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.container.clone())
            .unwrap_or_else(|| (self.file_id.clone(), NodeKind::File))
    }

    /// Emit an entity declared in the current scope, attached to the nearest
    /// emitted container.
    pub fn emit(
        &mut self,
        kind: NodeKind,
        name: &str,
        syntax: Option<&tree_sitter::Node>,
        properties: Map<String, Value>,
    ) -> Emission {
        let scope = self.scope.components().to_vec();
        let parent = self.current_container();
        self.emit_at(&scope, Some(parent), kind, name, syntax, properties)
    }

    /// Emit an entity into an explicit scope and parent, e.g. an instance
    /// attribute assigned inside a method but owned by the class.
    pub fn emit_at(
        &mut self,
        scope: &[String],
        parent: Option<(String, NodeKind)>,
        kind: NodeKind,
        name: &str,
        syntax: Option<&tree_sitter::Node>,
        properties: Map<String, Value>,
    ) -> Emission {
        let key = join_key(scope, name);

        // Variables and parameters are declared once per scope; later
        // assignments refer to the first declaration.
        if matches!(kind, NodeKind::Variable | NodeKind::Parameter) {
            if let Some(existing) = self.symbols.get(&key) {
                if existing.kind == kind {
                    return Emission::Emitted {
                        id: existing.id.clone(),
                        kind,
                    };
                }
            }
        }

        if !self.ctx.config.includes(kind) || name.is_empty() {
            return Emission::Suppressed {
                kind,
                name: name.to_string(),
            };
        }

        let location = syntax.map(SourceLocation::of);
        let mut id_scope = Vec::with_capacity(scope.len() + 1);
        if !self.module.is_empty() {
            id_scope.push(self.module.clone());
        }
        id_scope.extend(scope.iter().cloned());

        let raw_id = generate_id(kind, name, self.ctx.rel_path, &id_scope, location.as_ref());
        let fingerprint = match &location {
            Some(l) => format!(
                "{}:{}:{}:{}:{}",
                kind, l.start_line, l.start_column, l.end_line, l.end_column
            ),
            None => format!("{}:{}", kind, key),
        };
        let id = self.ctx.run.ids.claim(raw_id, &fingerprint);

        // Import nodes are named by the module they import.
        let full_name = match kind {
            NodeKind::Import => name.to_string(),
            _ => self.qualify(scope, name),
        };
        let mut node = Node::new(id.clone(), kind, name).with_full_name(full_name);
        node.location = location;
        if self.ctx.config.capture_content {
            node.raw_code = syntax.map(|s| self.text(s).to_string());
        }
        node.properties = properties;
        node.properties
            .insert("file_path".into(), Value::from(self.ctx.rel_path));
        node.properties
            .insert("language".into(), Value::from(self.language.as_str()));
        self.nodes.push(node);

        if let Some((parent_id, parent_kind)) = parent {
            let rel_type = RelationshipType::containment(parent_kind, kind);
            self.relate(&parent_id, &id, rel_type);
        }

        // Import and Export nodes describe statements, not declarations.
        if !matches!(kind, NodeKind::Import | NodeKind::Export) {
            self.symbols.insert(
                key,
                LocalSymbol {
                    id: id.clone(),
                    kind,
                },
            );
        }

        Emission::Emitted { id, kind }
    }

    /// Open a scope named `name` owned by `emission`.
    pub fn enter(&mut self, name: &str, kind: ScopeKind, emission: &Emission) {
        let container = match emission {
            Emission::Emitted { id, kind } => Some((id.clone(), *kind)),
            Emission::Suppressed { .. } => None,
        };
        self.scope.push(name);
        self.frames.push(Frame {
            name: name.to_string(),
            kind,
            container,
        });
    }

    /// Open a scope that has no node of its own, such as a C# namespace.
    pub fn enter_scope(&mut self, name: &str, kind: ScopeKind) {
        self.scope.push(name);
        self.frames.push(Frame {
            name: name.to_string(),
            kind,
            container: None,
        });
    }

    pub fn exit(&mut self) {
        self.scope.pop();
        self.frames.pop();
    }

    /// Kind of the innermost open scope; `None` at file level.
    pub fn current_scope_kind(&self) -> Option<ScopeKind> {
        self.frames.last().map(|f| f.kind)
    }

    /// Names of the enclosing scopes, outermost first.
    pub fn scope_path(&self) -> Vec<String> {
        self.scope.components().to_vec()
    }

    /// Innermost emitted type (class/interface) and its scope path.
    pub fn enclosing_type(&self) -> Option<(String, NodeKind, Vec<String>)> {
        let idx = self.frames.iter().rposition(|f| f.kind == ScopeKind::Type)?;
        let (id, kind) = self.frames[idx].container.clone()?;
        let path = self.frames[..=idx].iter().map(|f| f.name.clone()).collect();
        Some((id, kind, path))
    }

    /// Id of the innermost enclosing function or method, if it was emitted.
    pub fn enclosing_callable(&self) -> Option<String> {
        let frame = self.frames.iter().rev().find(|f| f.kind == ScopeKind::Callable)?;
        frame.container.as_ref().map(|(id, _)| id.clone())
    }

    /// Add a relationship between two emitted ids. Duplicates are ignored.
    pub fn relate(&mut self, source_id: &str, target_id: &str, rel_type: RelationshipType) {
        self.relate_with(source_id, target_id, rel_type, Map::new());
    }

    pub fn relate_with(
        &mut self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        properties: Map<String, Value>,
    ) {
        let key = (source_id.to_string(), target_id.to_string(), rel_type);
        if source_id == target_id && !rel_type.is_containment() && rel_type != RelationshipType::Calls {
            return;
        }
        if self.edge_keys.insert(key) {
            let mut rel = Relationship::new(source_id, target_id, rel_type);
            rel.properties = properties;
            self.relationships.push(rel);
        }
    }

    /// Record a reference for the cross-file linker.
    pub fn pending(&mut self, source_id: &str, kind: LinkKind, candidates: Vec<String>) {
        if candidates.is_empty() {
            return;
        }
        let key = (source_id.to_string(), kind, candidates.clone());
        if self.reference_keys.insert(key) {
            self.references.push(PendingLink {
                source_id: source_id.to_string(),
                kind,
                candidates,
                file_path: self.ctx.rel_path.to_string(),
            });
        }
    }

    /// Bind a local alias to an imported symbol or module.
    pub fn bind_import(&mut self, alias: &str, candidates: Vec<String>, is_module: bool) {
        if alias.is_empty() || candidates.is_empty() {
            return;
        }
        self.imports.insert(
            alias.to_string(),
            ImportBinding {
                candidates,
                is_module,
            },
        );
    }

    pub fn is_imported(&self, alias: &str) -> bool {
        self.imports.contains_key(alias)
    }

    /// Search `namespace` for unqualified names that are not declared locally.
    pub fn add_search_namespace(&mut self, namespace: &str) {
        if !namespace.is_empty() && !self.search_namespaces.iter().any(|n| n == namespace) {
            self.search_namespaces.push(namespace.to_string());
        }
    }

    /// Link the file (and its import node) to an external library.
    pub fn import_external(&mut self, ecosystem: Ecosystem, name: &str) -> String {
        let run = self.ctx.run;
        let library = run.externals.library(ecosystem, name, &run.manifests);
        let library_id = library.id.clone();
        if !self.nodes.iter().any(|n| n.id == library_id) {
            self.nodes.push(library);
        }
        let file_id = self.file_id.clone();
        self.relate(&file_id, &library_id, RelationshipType::Imports);
        library_id
    }

    /// Emit the Import node and external/library edge for one import
    /// statement. `target` is the classification of the imported module.
    pub fn import(
        &mut self,
        module: &str,
        target: &ImportTarget,
        syntax: &tree_sitter::Node,
        mut properties: Map<String, Value>,
    ) -> Emission {
        properties.insert("module".into(), Value::from(module));
        properties.insert(
            "is_external".into(),
            Value::from(matches!(target, ImportTarget::External { .. })),
        );
        properties.insert(
            "is_builtin".into(),
            Value::from(matches!(target, ImportTarget::Builtin)),
        );
        let emission = self.emit(NodeKind::Import, module, Some(syntax), properties);

        if let ImportTarget::External { ecosystem, name } = target {
            if self.ctx.config.track_external_libraries {
                self.import_external(*ecosystem, name);
            }
        }
        emission
    }

    /// Link the file to symbols imported from other project files.
    pub fn import_symbols(&mut self, candidates: Vec<String>) {
        let file_id = self.file_id.clone();
        self.pending(&file_id, LinkKind::Imports, candidates);
    }

    fn site(&self, source_id: String) -> Site {
        Site {
            source_id,
            scope: self.scope.components().to_vec(),
            kinds: self.frames.iter().map(|f| f.kind).collect(),
        }
    }

    /// Record a call made from the innermost emitted function or method.
    /// Calls outside any callable, or from a suppressed one, are dropped.
    pub fn call(&mut self, target: CallTarget) {
        if let Some(caller) = self.enclosing_callable() {
            let site = self.site(caller);
            self.calls.push(DeferredCall { site, target });
        }
    }

    /// Record a base type of `derived`, resolved once the file is complete.
    /// Must be called before entering the derived type's scope.
    pub fn base(&mut self, derived: &Emission, name: &str) {
        if let Emission::Emitted { id, kind } = derived {
            let site = self.site(id.clone());
            self.bases.push(DeferredBase {
                site,
                name: name.to_string(),
                from_interface: *kind == NodeKind::Interface,
            });
        }
    }

    /// Record that `export_id` exports the local declaration `name`.
    pub fn export(&mut self, export_id: &str, name: &str) {
        let site = self.site(export_id.to_string());
        self.exports.push(DeferredExport {
            site,
            name: name.to_string(),
        });
    }

    /// HAS_MEMBER from a type to one of its fields or attributes.
    pub fn member(&mut self, type_id: &str, member: &Emission) {
        if let Some(member_id) = member.id() {
            let member_id = member_id.to_string();
            self.relate(type_id, &member_id, RelationshipType::HasMember);
        }
    }

    fn lookup(&self, site: &Site, name: &str) -> Option<&LocalSymbol> {
        for depth in (0..=site.scope.len()).rev() {
            if depth > 0 && !self.class_members_visible && site.kinds[depth - 1] == ScopeKind::Type {
                continue;
            }
            if let Some(sym) = self.symbols.get(&join_key(&site.scope[..depth], name)) {
                return Some(sym);
            }
        }
        None
    }

    /// Type declared in this file whose (possibly dotted) name is `name`.
    fn lookup_type(&self, site: &Site, name: &str) -> Option<(String, &LocalSymbol)> {
        for depth in (0..=site.scope.len()).rev() {
            let key = join_key(&site.scope[..depth], name);
            if let Some(sym) = self.symbols.get(&key) {
                if sym.kind.is_type() {
                    return Some((key, sym));
                }
            }
        }
        None
    }

    /// Qualified candidates for a name that is not declared in this file.
    fn external_candidates(&self, site: &Site, name: &str) -> Vec<String> {
        let (head, rest) = match name.split_once('.') {
            Some((h, r)) => (h, Some(r)),
            None => (name, None),
        };
        if let Some(binding) = self.imports.get(head) {
            return binding
                .candidates
                .iter()
                .map(|c| match rest {
                    Some(r) => format!("{}.{}", c, r),
                    None => c.clone(),
                })
                .collect();
        }
        if self.search_namespaces.is_empty() && !self.class_members_visible {
            return Vec::new();
        }

        let mut out = Vec::new();
        // Enclosing namespaces, innermost first, each with its parents.
        for depth in (1..=site.scope.len()).rev() {
            if site.kinds[depth - 1] != ScopeKind::Namespace {
                continue;
            }
            let mut ns = site.scope[..depth].join(SCOPE_SEPARATOR);
            loop {
                out.push(format!("{}.{}", ns, name));
                match ns.rsplit_once('.') {
                    Some((parent, _)) => ns = parent.to_string(),
                    None => break,
                }
            }
        }
        for ns in &self.search_namespaces {
            out.push(format!("{}.{}", ns, name));
        }
        out.push(name.to_string());
        let mut seen = HashSet::new();
        out.retain(|c| seen.insert(c.clone()));
        out
    }

    fn resolve_call(&mut self, call: DeferredCall) {
        let DeferredCall { site, target } = call;
        let caller = site.source_id.clone();

        match target {
            CallTarget::Name(name) => {
                if let Some(sym) = self.lookup(&site, &name).cloned() {
                    match sym.kind {
                        NodeKind::Function | NodeKind::Method => {
                            self.relate(&caller, &sym.id, RelationshipType::Calls)
                        }
                        NodeKind::Class => {
                            self.relate(&caller, &sym.id, RelationshipType::Instantiates)
                        }
                        _ => {}
                    }
                    return;
                }
                let candidates = self.external_candidates(&site, &name);
                self.pending(&caller, LinkKind::Calls, candidates);
            }
            CallTarget::New(name) => {
                if let Some((_, sym)) = self.lookup_type(&site, &name) {
                    if sym.kind == NodeKind::Class {
                        let target = sym.id.clone();
                        self.relate(&caller, &target, RelationshipType::Instantiates);
                    }
                    return;
                }
                let candidates = self.external_candidates(&site, &name);
                self.pending(&caller, LinkKind::Instantiates, candidates);
            }
            CallTarget::SelfMember(member) => {
                let type_depth = site.kinds.iter().rposition(|k| *k == ScopeKind::Type);
                if let Some(depth) = type_depth {
                    let key = join_key(&site.scope[..=depth], &member);
                    if let Some(sym) = self.symbols.get(&key) {
                        if sym.kind.is_callable() {
                            let target = sym.id.clone();
                            self.relate(&caller, &target, RelationshipType::Calls);
                        }
                    }
                }
            }
            CallTarget::Member { object, member } => {
                if let Some((type_key, _)) = self.lookup_type(&site, &object) {
                    let key = format!("{}{}{}", type_key, SCOPE_SEPARATOR, member);
                    if let Some(sym) = self.symbols.get(&key) {
                        if sym.kind.is_callable() {
                            let target = sym.id.clone();
                            self.relate(&caller, &target, RelationshipType::Calls);
                        }
                    }
                    return;
                }
                let head = object.split('.').next().unwrap_or(&object);
                if self.lookup(&site, head).is_some() {
                    // A local variable or function of unknown type.
                    return;
                }
                let candidates: Vec<String> = self
                    .external_candidates(&site, &object)
                    .into_iter()
                    .map(|c| format!("{}{}{}", c, SCOPE_SEPARATOR, member))
                    .collect();
                self.pending(&caller, LinkKind::Calls, candidates);
            }
        }
    }

    fn resolve_base(&mut self, base: DeferredBase) {
        let DeferredBase {
            site,
            name,
            from_interface,
        } = base;
        if let Some((_, sym)) = self.lookup_type(&site, &name) {
            let rel_type = match sym.kind {
                NodeKind::Interface if !from_interface => RelationshipType::Implements,
                _ => RelationshipType::Extends,
            };
            let target = sym.id.clone();
            self.relate(&site.source_id, &target, rel_type);
            return;
        }
        let candidates = self.external_candidates(&site, &name);
        self.pending(&site.source_id, LinkKind::Inherits, candidates);
    }

    fn resolve_export(&mut self, export: DeferredExport) {
        let DeferredExport { site, name } = export;
        if let Some(sym) = self.lookup(&site, &name) {
            let target = sym.id.clone();
            self.relate(&site.source_id, &target, RelationshipType::Exports);
        } else if let Some(binding) = self.imports.get(&name) {
            // Re-export of an imported symbol.
            let candidates = binding.candidates.clone();
            let source = site.source_id.clone();
            self.pending(&source, LinkKind::Exports, candidates);
        }
    }

    /// Resolve deferred references and return the file graph.
    pub fn finish(mut self) -> FileGraph {
        for base in std::mem::take(&mut self.bases) {
            self.resolve_base(base);
        }
        for call in std::mem::take(&mut self.calls) {
            self.resolve_call(call);
        }
        for export in std::mem::take(&mut self.exports) {
            self.resolve_export(export);
        }

        FileGraph {
            nodes: self.nodes,
            relationships: self.relationships,
            references: self.references,
        }
    }
}

fn join_key(scope: &[String], name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", scope.join(SCOPE_SEPARATOR), SCOPE_SEPARATOR, name)
    }
}

/// Build a property map from `(key, value)` pairs, skipping nulls.
pub fn props<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::ingest::RunContext;
    use std::time::Duration;

    fn with_builder<F: FnOnce(&mut GraphBuilder)>(config: &ExtractorConfig, f: F) -> FileGraph {
        let run = RunContext::default();
        let ctx = ExtractContext {
            rel_path: "pkg/mod.py",
            abs_path: Path::new("/tmp/pkg/mod.py"),
            checksum: "abc",
            config,
            run: &run,
            parse_timeout: Duration::ZERO,
        };
        let mut builder = GraphBuilder::new(&ctx, Language::Python, b"x = 1\n", "pkg.mod");
        f(&mut builder);
        builder.finish()
    }

    #[test]
    fn test_file_node_and_containment() {
        let config = ExtractorConfig::default();
        let graph = with_builder(&config, |b| {
            let class = b.emit(NodeKind::Class, "Foo", None, Map::new());
            b.enter("Foo", ScopeKind::Type, &class);
            let method = b.emit(NodeKind::Method, "bar", None, Map::new());
            b.enter("bar", ScopeKind::Callable, &method);
            b.emit(NodeKind::Parameter, "x", None, Map::new());
            b.exit();
            b.exit();
        });

        assert_eq!(graph.nodes[0].kind, NodeKind::File);
        assert_eq!(graph.nodes[0].property_str("checksum"), Some("abc"));
        let method = graph.nodes.iter().find(|n| n.name == "bar").unwrap();
        assert_eq!(method.full_name, "pkg.mod.Foo.bar");

        let types: Vec<RelationshipType> = graph.relationships.iter().map(|r| r.rel_type).collect();
        assert_eq!(
            types,
            vec![
                RelationshipType::Contains,
                RelationshipType::Defines,
                RelationshipType::Declares
            ]
        );
    }

    #[test]
    fn test_suppressed_parent_delegates_to_ancestor() {
        let config = ExtractorConfig {
            include_classes: false,
            ..ExtractorConfig::default()
        };
        let graph = with_builder(&config, |b| {
            let class = b.emit(NodeKind::Class, "Foo", None, Map::new());
            assert!(matches!(class, Emission::Suppressed { .. }));
            b.enter("Foo", ScopeKind::Type, &class);
            b.emit(NodeKind::Method, "bar", None, Map::new());
            b.exit();
        });

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.relationships[0].source_id, graph.nodes[0].id);
        assert_eq!(graph.relationships[0].rel_type, RelationshipType::Contains);
    }

    #[test]
    fn test_local_call_binds_forward_declaration() {
        let config = ExtractorConfig::default();
        let graph = with_builder(&config, |b| {
            let caller = b.emit(NodeKind::Function, "main", None, Map::new());
            b.enter("main", ScopeKind::Callable, &caller);
            b.call(CallTarget::Name("helper".into()));
            b.call(CallTarget::Name("print".into()));
            b.exit();
            b.emit(NodeKind::Function, "helper", None, Map::new());
        });

        let calls: Vec<&Relationship> = graph
            .relationships
            .iter()
            .filter(|r| r.rel_type == RelationshipType::Calls)
            .collect();
        assert_eq!(calls.len(), 1);
        assert!(graph.references.is_empty());
    }

    #[test]
    fn test_imported_call_becomes_pending_link() {
        let config = ExtractorConfig::default();
        let graph = with_builder(&config, |b| {
            b.bind_import("Foo", vec!["a.Foo".into()], false);
            let caller = b.emit(NodeKind::Function, "call_bar", None, Map::new());
            b.enter("call_bar", ScopeKind::Callable, &caller);
            b.call(CallTarget::Name("Foo".into()));
            b.call(CallTarget::Member {
                object: "Foo".into(),
                member: "bar".into(),
            });
            b.exit();
        });

        let candidates: Vec<&Vec<String>> = graph.references.iter().map(|r| &r.candidates).collect();
        assert_eq!(
            candidates,
            vec![&vec!["a.Foo".to_string()], &vec!["a.Foo.bar".to_string()]]
        );
    }

    #[test]
    fn test_variables_declared_once_per_scope() {
        let config = ExtractorConfig {
            include_variables: true,
            ..ExtractorConfig::default()
        };
        let graph = with_builder(&config, |b| {
            let first = b.emit(NodeKind::Variable, "x", None, Map::new());
            let second = b.emit(NodeKind::Variable, "x", None, Map::new());
            assert_eq!(first, second);
        });
        assert_eq!(graph.nodes.len(), 2);
    }
}
