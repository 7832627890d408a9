//! Project-wide module map.
//!
//! Built from the file walk before extraction starts, so extractors can tell
//! local imports from external ones and turn an import specifier into the
//! module names other files are extracted under.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

lazy_static! {
    static ref CSHARP_NAMESPACE: Regex = Regex::new(r"(?m)^\s*namespace\s+(?:global::)?([A-Za-z_][\w.]*)")
        .expect("valid namespace regex");
}

/// Module names of every source file in the project.
#[derive(Debug, Clone, Default)]
pub struct ProjectIndex {
    python_modules: HashSet<String>,
    python_packages: HashSet<String>,
    js_modules: HashSet<String>,
    csharp_files: Vec<String>,
    csharp_namespaces: BTreeSet<String>,
}

impl ProjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = ProjectIndex::new();
        for path in paths {
            index.add_path(path);
        }
        index
    }

    pub fn add_path(&mut self, rel_path: &str) {
        if rel_path.ends_with(".py") {
            let module = python_module_name(rel_path);
            let mut prefix = String::new();
            for part in module.split('.') {
                if !prefix.is_empty() {
                    self.python_packages.insert(prefix.clone());
                    prefix.push('.');
                }
                prefix.push_str(part);
            }
            self.python_modules.insert(module);
        } else if rel_path.ends_with(".cs") {
            self.csharp_files.push(rel_path.to_string());
        } else if let Some(module) = js_module_name(rel_path) {
            self.js_modules.insert(module);
        }
    }

    /// Read every `.cs` file seen by [`add_path`](Self::add_path) under `root`
    /// and record the namespaces it declares. Unreadable files are skipped;
    /// their extraction reports the error.
    pub fn scan_csharp_namespaces(&mut self, root: &Path) {
        for rel_path in &self.csharp_files {
            match std::fs::read(root.join(rel_path)) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    for ns in declared_csharp_namespaces(&text) {
                        self.csharp_namespaces.insert(ns);
                    }
                }
                Err(e) => tracing::debug!(file = %rel_path, error = %e, "namespace scan skipped"),
            }
        }
    }

    pub fn add_csharp_namespace(&mut self, namespace: &str) {
        self.csharp_namespaces.insert(namespace.to_string());
    }

    /// True when `namespace` is declared in the project, or is a parent or
    /// child of a declared namespace.
    pub fn declares_csharp_namespace(&self, namespace: &str) -> bool {
        self.csharp_namespaces.iter().any(|declared| {
            declared == namespace
                || is_dotted_prefix(namespace, declared)
                || is_dotted_prefix(declared, namespace)
        })
    }

    pub fn has_python_module(&self, module: &str) -> bool {
        self.python_modules.contains(module) || self.python_packages.contains(module)
    }

    pub fn has_js_module(&self, module: &str) -> bool {
        self.js_modules.contains(module)
    }

    /// Candidate module names for a Python import, most likely first.
    ///
    /// `level` is the number of leading dots of a relative import. Absolute
    /// imports try the project root and then the importer's own package
    /// (script-style sibling imports). Modules known to the project come first.
    pub fn python_module_candidates(&self, importer: &str, module: &str, level: usize) -> Vec<String> {
        let importer_module = python_module_name(importer);
        let mut package: Vec<&str> = importer_module.split('.').collect();
        if !importer.ends_with("__init__.py") {
            package.pop();
        }

        let mut raw = Vec::new();
        if level > 0 {
            for _ in 1..level {
                package.pop();
            }
            let mut parts: Vec<&str> = package.clone();
            if !module.is_empty() {
                parts.push(module);
            }
            raw.push(parts.join("."));
        } else {
            raw.push(module.to_string());
            if !package.is_empty() {
                raw.push(format!("{}.{}", package.join("."), module));
            }
        }
        raw.retain(|m| !m.is_empty());
        raw.dedup();

        let (known, unknown): (Vec<String>, Vec<String>) =
            raw.into_iter().partition(|m| self.has_python_module(m));
        if known.is_empty() {
            unknown
        } else {
            known
        }
    }

    /// Candidate module names for a relative JS/TS specifier.
    pub fn js_module_candidates(&self, importer: &str, specifier: &str) -> Vec<String> {
        let base_dir = importer.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let joined = normalize_join(base_dir, specifier);
        let stem = js_module_name(&joined).unwrap_or(joined);

        let options = [stem.clone(), format!("{}/index", stem)];
        let known: Vec<String> = options
            .iter()
            .filter(|m| self.has_js_module(m))
            .cloned()
            .collect();
        if known.is_empty() {
            vec![stem]
        } else {
            known
        }
    }
}

/// Namespaces declared in C# source, block or file-scoped.
pub fn declared_csharp_namespaces(source: &str) -> Vec<String> {
    CSHARP_NAMESPACE
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .filter(|ns| !ns.is_empty())
        .collect()
}

/// `App` is a dotted prefix of `App.Models`, not of `AppKit`.
fn is_dotted_prefix(prefix: &str, name: &str) -> bool {
    name.len() > prefix.len()
        && name.starts_with(prefix)
        && name.as_bytes()[prefix.len()] == b'.'
}

/// `pkg/sub/mod.py` -> `pkg.sub.mod`, `pkg/__init__.py` -> `pkg`.
pub fn python_module_name(rel_path: &str) -> String {
    let stem = rel_path.trim_end_matches(".py");
    let stem = stem
        .strip_suffix("/__init__")
        .or_else(|| if stem == "__init__" { Some("") } else { None })
        .unwrap_or(stem);
    stem.replace('/', ".")
}

const JS_EXTENSIONS: &[&str] = &[".d.ts", ".tsx", ".ts", ".mts", ".cts", ".jsx", ".js", ".mjs", ".cjs"];

/// `src/util.ts` -> `src/util`. `None` for non-JS/TS paths.
pub fn js_module_name(rel_path: &str) -> Option<String> {
    JS_EXTENSIONS
        .iter()
        .find_map(|ext| rel_path.strip_suffix(ext))
        .map(|s| s.to_string())
}

/// Join a relative specifier onto a directory, resolving `.` and `..`.
fn normalize_join(base_dir: &str, specifier: &str) -> String {
    let mut parts: Vec<&str> = if specifier.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|p| !p.is_empty()).collect()
    };
    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_module_name() {
        assert_eq!(python_module_name("a.py"), "a");
        assert_eq!(python_module_name("pkg/sub/mod.py"), "pkg.sub.mod");
        assert_eq!(python_module_name("pkg/__init__.py"), "pkg");
    }

    #[test]
    fn test_python_candidates() {
        let index = ProjectIndex::from_paths(["app/main.py", "app/models.py", "util.py"]);
        assert!(index.has_python_module("app"));

        // sibling import from a script
        assert_eq!(
            index.python_module_candidates("app/main.py", "models", 0),
            vec!["app.models"]
        );
        assert_eq!(
            index.python_module_candidates("app/main.py", "util", 0),
            vec!["util"]
        );
        assert_eq!(
            index.python_module_candidates("app/main.py", "models", 1),
            vec!["app.models"]
        );
        // unknown modules keep the absolute name first
        assert_eq!(
            index.python_module_candidates("app/main.py", "requests", 0),
            vec!["requests", "app.requests"]
        );
    }

    #[test]
    fn test_declared_csharp_namespaces() {
        let source = "using System;\nnamespace App.Models\n{\n    namespace Inner { }\n}\n";
        assert_eq!(declared_csharp_namespaces(source), vec!["App.Models", "Inner"]);
        assert_eq!(declared_csharp_namespaces("namespace App.Services;\n"), vec!["App.Services"]);
        assert!(declared_csharp_namespaces("// no namespaces here\nclass A {}\n").is_empty());
    }

    #[test]
    fn test_csharp_namespace_scan() {
        let root = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("src")).unwrap();
        std::fs::write(root.path().join("src/User.cs"), "namespace App.Models;\nclass User {}\n").unwrap();

        let mut index = ProjectIndex::from_paths(["src/User.cs", "src/Missing.cs"]);
        index.scan_csharp_namespaces(root.path());
        assert!(index.declares_csharp_namespace("App.Models"));
        assert!(index.declares_csharp_namespace("App"));
        assert!(index.declares_csharp_namespace("App.Models.Dto"));
        assert!(!index.declares_csharp_namespace("AppKit"));
        assert!(!index.declares_csharp_namespace("Newtonsoft.Json"));
    }

    #[test]
    fn test_js_candidates() {
        let index = ProjectIndex::from_paths(["src/app.ts", "src/lib/index.ts", "src/util.js"]);
        assert_eq!(
            index.js_module_candidates("src/app.ts", "./lib"),
            vec!["src/lib/index"]
        );
        assert_eq!(
            index.js_module_candidates("src/app.ts", "./util.js"),
            vec!["src/util"]
        );
        assert_eq!(
            index.js_module_candidates("src/lib/index.ts", "../app"),
            vec!["src/app"]
        );
    }
}
