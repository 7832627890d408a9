//! External library classification and the run-wide library table.
//!
//! An import that leaves the project becomes one `ExternalLibrary` node per
//! distinct (ecosystem, base package) pair, shared by every file that imports
//! it. Standard-library and runtime imports never become library nodes.

use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use super::manifest::{normalize_name, Ecosystem, ManifestIndex};
use super::project::ProjectIndex;
use crate::identity::external_library_id;
use crate::model::{Node, NodeKind};

lazy_static! {
    static ref PYTHON_STDLIB: HashSet<&'static str> = [
        "__future__", "abc", "argparse", "array", "ast", "asyncio", "atexit", "base64",
        "bisect", "builtins", "bz2", "calendar", "cmath", "codecs", "collections",
        "concurrent", "configparser", "contextlib", "contextvars", "copy", "csv", "ctypes",
        "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis", "email", "enum",
        "errno", "filecmp", "fnmatch", "fractions", "functools", "gc", "getopt", "getpass",
        "gettext", "glob", "gzip", "hashlib", "heapq", "hmac", "html", "http", "imaplib",
        "importlib", "inspect", "io", "ipaddress", "itertools", "json", "keyword",
        "linecache", "locale", "logging", "lzma", "math", "mimetypes", "mmap",
        "multiprocessing", "numbers", "operator", "os", "pathlib", "pickle", "platform",
        "pprint", "queue", "random", "re", "readline", "reprlib", "secrets", "select",
        "selectors", "shelve", "shlex", "shutil", "signal", "smtplib", "socket",
        "socketserver", "sqlite3", "ssl", "stat", "statistics", "string", "stringprep",
        "struct", "subprocess", "sys", "sysconfig", "tarfile", "tempfile", "textwrap",
        "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib",
        "traceback", "types", "typing", "unicodedata", "unittest", "urllib", "uuid",
        "venv", "warnings", "weakref", "xml", "zipfile", "zlib", "zoneinfo",
    ]
    .into_iter()
    .collect();

    static ref NODE_BUILTINS: HashSet<&'static str> = [
        "assert", "async_hooks", "buffer", "child_process", "cluster", "console", "crypto",
        "dgram", "dns", "events", "fs", "http", "http2", "https", "module", "net", "os",
        "path", "perf_hooks", "process", "querystring", "readline", "stream",
        "string_decoder", "timers", "tls", "tty", "url", "util", "v8", "vm", "worker_threads",
        "zlib",
    ]
    .into_iter()
    .collect();
}

/// Where an import specifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// Another file of this project.
    Local,
    /// Language standard library or runtime.
    Builtin,
    /// Third-party package, by base package name.
    External { ecosystem: Ecosystem, name: String },
}

/// Classify a Python import. `level > 0` means a relative import.
pub fn classify_python(module: &str, level: usize, importer: &str, project: &ProjectIndex) -> ImportTarget {
    if level > 0 {
        return ImportTarget::Local;
    }
    let base = module.split('.').next().unwrap_or(module);
    if base.is_empty() {
        return ImportTarget::Local;
    }
    if project
        .python_module_candidates(importer, module, 0)
        .iter()
        .any(|m| project.has_python_module(m))
    {
        return ImportTarget::Local;
    }
    if PYTHON_STDLIB.contains(base) {
        return ImportTarget::Builtin;
    }
    ImportTarget::External {
        ecosystem: Ecosystem::Python,
        name: base.to_string(),
    }
}

/// Classify a JS/TS module specifier.
///
/// Scoped packages keep their scope: `@scope/pkg/sub` -> `@scope/pkg`.
pub fn classify_js(specifier: &str) -> ImportTarget {
    if specifier.starts_with('.') || specifier.starts_with('/') {
        return ImportTarget::Local;
    }
    if specifier.starts_with("node:") {
        return ImportTarget::Builtin;
    }

    let mut parts = specifier.split('/');
    let name = match parts.next() {
        Some(scope) if scope.starts_with('@') => match parts.next() {
            Some(pkg) => format!("{}/{}", scope, pkg),
            None => scope.to_string(),
        },
        Some(first) => first.to_string(),
        None => return ImportTarget::Local,
    };

    if NODE_BUILTINS.contains(name.as_str()) {
        return ImportTarget::Builtin;
    }
    ImportTarget::External {
        ecosystem: Ecosystem::Npm,
        name,
    }
}

/// Classify a C# `using` namespace.
///
/// `System`/`Microsoft` namespaces belong to the runtime and namespaces the
/// project declares are local. Anything else is a NuGet package: the longest
/// manifest package that prefixes the namespace, else its first two segments.
pub fn classify_csharp(namespace: &str, manifests: &ManifestIndex, project: &ProjectIndex) -> ImportTarget {
    let root = namespace.split('.').next().unwrap_or(namespace);
    if root == "System" || root == "Microsoft" {
        return ImportTarget::Builtin;
    }
    if namespace.is_empty() || project.declares_csharp_namespace(namespace) {
        return ImportTarget::Local;
    }
    let name = match manifests.nuget_package_for(namespace) {
        Some(dep) => dep.name.clone(),
        None => namespace.split('.').take(2).collect::<Vec<_>>().join("."),
    };
    ImportTarget::External {
        ecosystem: Ecosystem::NuGet,
        name,
    }
}

/// Run-wide table of external library nodes.
#[derive(Debug, Default)]
pub struct ExternalRegistry {
    libraries: Mutex<BTreeMap<String, Node>>,
}

impl ExternalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node for a library, created on first use.
    pub fn library(&self, ecosystem: Ecosystem, name: &str, manifests: &ManifestIndex) -> Node {
        let key = format!("{}:{}", ecosystem_key(ecosystem), normalize_name(ecosystem, name));
        let id = external_library_id(&key);

        let mut libraries = self
            .libraries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        libraries
            .entry(id.clone())
            .or_insert_with(|| {
                let version = manifests
                    .version(ecosystem, name)
                    .unwrap_or("unknown")
                    .to_string();
                Node::new(id, NodeKind::ExternalLibrary, name)
                    .with_full_name(key.clone())
                    .with_property("ecosystem", ecosystem_key(ecosystem))
                    .with_property("version", version)
                    .with_property("is_external", true)
            })
            .clone()
    }

    /// Every library registered so far, ordered by id.
    pub fn nodes(&self) -> Vec<Node> {
        self.libraries
            .lock()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_else(|poisoned| poisoned.into_inner().values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.libraries
            .lock()
            .map(|l| l.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn ecosystem_key(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::Python => "pypi",
        Ecosystem::Npm => "npm",
        Ecosystem::NuGet => "nuget",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::manifest::Dependency;

    fn external(ecosystem: Ecosystem, name: &str) -> ImportTarget {
        ImportTarget::External {
            ecosystem,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_classify_python() {
        let project = ProjectIndex::from_paths(["app/main.py", "app/models.py"]);
        assert_eq!(classify_python("os.path", 0, "app/main.py", &project), ImportTarget::Builtin);
        assert_eq!(classify_python("models", 0, "app/main.py", &project), ImportTarget::Local);
        assert_eq!(classify_python("", 1, "app/main.py", &project), ImportTarget::Local);
        assert_eq!(
            classify_python("numpy.linalg", 0, "app/main.py", &project),
            external(Ecosystem::Python, "numpy")
        );
    }

    #[test]
    fn test_classify_js() {
        assert_eq!(classify_js("./util"), ImportTarget::Local);
        assert_eq!(classify_js("node:fs"), ImportTarget::Builtin);
        assert_eq!(classify_js("path"), ImportTarget::Builtin);
        assert_eq!(classify_js("lodash/fp"), external(Ecosystem::Npm, "lodash"));
        assert_eq!(
            classify_js("@angular/core/testing"),
            external(Ecosystem::Npm, "@angular/core")
        );
    }

    #[test]
    fn test_classify_csharp() {
        let mut manifests = ManifestIndex::new();
        manifests.insert(Dependency {
            name: "Serilog.Sinks.Console".into(),
            version: "5.0.1".into(),
            dev: false,
            ecosystem: Ecosystem::NuGet,
            manifest_path: "App.csproj".into(),
        });
        let mut project = ProjectIndex::new();
        project.add_csharp_namespace("App.Models");

        assert_eq!(classify_csharp("System.Linq", &manifests, &project), ImportTarget::Builtin);
        assert_eq!(
            classify_csharp("Microsoft.Extensions.Logging", &manifests, &project),
            ImportTarget::Builtin
        );
        assert_eq!(
            classify_csharp("Serilog.Sinks.Console.Themes", &manifests, &project),
            external(Ecosystem::NuGet, "Serilog.Sinks.Console")
        );
        assert_eq!(classify_csharp("App.Models", &manifests, &project), ImportTarget::Local);
        assert_eq!(classify_csharp("App.Models.Dto", &manifests, &project), ImportTarget::Local);
        assert_eq!(
            classify_csharp("App.Models", &manifests, &ProjectIndex::new()),
            external(Ecosystem::NuGet, "App.Models")
        );
    }

    #[test]
    fn test_unlisted_nuget_namespace_is_external() {
        let empty = ManifestIndex::new();
        let project = ProjectIndex::new();
        assert_eq!(
            classify_csharp("Newtonsoft.Json", &empty, &project),
            external(Ecosystem::NuGet, "Newtonsoft.Json")
        );
        assert_eq!(
            classify_csharp("Newtonsoft.Json.Linq", &empty, &project),
            external(Ecosystem::NuGet, "Newtonsoft.Json")
        );
        assert_eq!(classify_csharp("Serilog", &empty, &project), external(Ecosystem::NuGet, "Serilog"));
    }

    #[test]
    fn test_registry_dedupes_by_base_name() {
        let mut manifests = ManifestIndex::new();
        manifests.insert(Dependency {
            name: "numpy".into(),
            version: "1.26.4".into(),
            dev: false,
            ecosystem: Ecosystem::Python,
            manifest_path: "requirements.txt".into(),
        });
        let registry = ExternalRegistry::new();
        let a = registry.library(Ecosystem::Python, "numpy", &manifests);
        let b = registry.library(Ecosystem::Python, "numpy", &manifests);
        let c = registry.library(Ecosystem::Npm, "numpy", &manifests);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.property_str("version"), Some("1.26.4"));
        assert_eq!(c.property_str("version"), Some("unknown"));
        assert_eq!(registry.len(), 2);
        assert!(a.raw_code.is_none());
    }
}
