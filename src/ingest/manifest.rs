//! Dependency manifest scanning.
//!
//! Reads the package manifests a project ships (`requirements*.txt`,
//! `pyproject.toml`, `setup.py`, `package.json`, `*.csproj`) so external
//! library nodes can carry the declared version.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

lazy_static! {
    static ref REQUIREMENT: Regex = Regex::new(
        r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(===|==|>=|<=|~=|!=|>|<)?\s*([^;,\s]*)"
    )
    .expect("requirement pattern is valid");
    static ref SETUP_INSTALL_REQUIRES: Regex =
        Regex::new(r"(?s)install_requires\s*=\s*\[(.*?)\]")
            .expect("install_requires pattern is valid");
    static ref QUOTED: Regex = Regex::new(r#"["']([^"']+)["']"#)
        .expect("quoted pattern is valid");
    static ref TOML_TABLE: Regex = Regex::new(r"^\s*\[\s*([^\]]+?)\s*\]\s*$")
        .expect("table pattern is valid");
    static ref TOML_ASSIGN: Regex = Regex::new(r#"^\s*["']?([A-Za-z0-9._-]+)["']?\s*=\s*(.+)$"#)
        .expect("assignment pattern is valid");
    static ref TOML_INLINE_VERSION: Regex = Regex::new(r#"version\s*=\s*["']([^"']+)["']"#)
        .expect("inline version pattern is valid");
    static ref PACKAGE_REFERENCE: Regex = Regex::new(r"(?s)<PackageReference\b([^>]*?)/?>")
        .expect("PackageReference pattern is valid");
    static ref XML_ATTR: Regex = Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#)
        .expect("attribute pattern is valid");
}

/// Version recorded when a manifest names a package without pinning it.
pub const LATEST: &str = "latest";

/// Package ecosystem a dependency belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Python,
    Npm,
    NuGet,
}

/// A dependency declared in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub dev: bool,
    pub ecosystem: Ecosystem,
    pub manifest_path: String,
}

/// All dependencies declared under a project root.
///
/// The first declaration of a package (in sorted walk order) wins.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    dependencies: HashMap<(Ecosystem, String), Dependency>,
}

impl ManifestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `root` for manifest files, skipping directories named in `ignore_dirs`.
    pub fn scan(root: &Path, ignore_dirs: &[String]) -> Self {
        let mut index = ManifestIndex::new();

        let walker = walkdir::WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !ignore_dirs.iter().any(|d| d == name.as_ref())
            });

        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let manifest_path = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let deps = if file_name.starts_with("requirements") && file_name.ends_with(".txt") {
                parse_requirements(&content, &manifest_path)
            } else if file_name == "pyproject.toml" {
                parse_pyproject(&content, &manifest_path)
            } else if file_name == "setup.py" {
                parse_setup_py(&content, &manifest_path)
            } else if file_name == "package.json" {
                parse_package_json(&content, &manifest_path)
            } else if file_name.ends_with(".csproj") {
                parse_csproj(&content, &manifest_path)
            } else {
                continue;
            };

            tracing::debug!(manifest = %manifest_path, count = deps.len(), "parsed manifest");
            for dep in deps {
                index.insert(dep);
            }
        }

        index
    }

    pub fn insert(&mut self, dep: Dependency) {
        let key = (dep.ecosystem, normalize_name(dep.ecosystem, &dep.name));
        self.dependencies.entry(key).or_insert(dep);
    }

    pub fn get(&self, ecosystem: Ecosystem, name: &str) -> Option<&Dependency> {
        self.dependencies
            .get(&(ecosystem, normalize_name(ecosystem, name)))
    }

    pub fn version(&self, ecosystem: Ecosystem, name: &str) -> Option<&str> {
        self.get(ecosystem, name).map(|d| d.version.as_str())
    }

    /// NuGet package whose name is the longest dotted prefix of `namespace`.
    pub fn nuget_package_for(&self, namespace: &str) -> Option<&Dependency> {
        let lowered = namespace.to_ascii_lowercase();
        self.dependencies
            .iter()
            .filter(|((eco, name), _)| {
                *eco == Ecosystem::NuGet
                    && (lowered == *name || lowered.starts_with(&format!("{}.", name)))
            })
            .max_by_key(|((_, name), _)| name.len())
            .map(|(_, dep)| dep)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Canonical lookup key for a package name within its ecosystem.
pub fn normalize_name(ecosystem: Ecosystem, name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    match ecosystem {
        Ecosystem::Python => lowered.replace(['_', '.'], "-"),
        Ecosystem::Npm | Ecosystem::NuGet => lowered,
    }
}

/// Parse one PEP 508-ish requirement. Only `==` pins a version.
fn parse_requirement(spec: &str, manifest_path: &str) -> Option<Dependency> {
    let caps = REQUIREMENT.captures(spec)?;
    let name = caps.get(1)?.as_str().to_string();
    let version = match (caps.get(2).map(|m| m.as_str()), caps.get(3)) {
        (Some("==") | Some("==="), Some(v)) if !v.as_str().is_empty() => v.as_str().to_string(),
        _ => LATEST.to_string(),
    };
    Some(Dependency {
        name,
        version,
        dev: false,
        ecosystem: Ecosystem::Python,
        manifest_path: manifest_path.to_string(),
    })
}

pub fn parse_requirements(content: &str, manifest_path: &str) -> Vec<Dependency> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty() && !line.starts_with('-'))
        .filter_map(|line| parse_requirement(line, manifest_path))
        .collect()
}

pub fn parse_setup_py(content: &str, manifest_path: &str) -> Vec<Dependency> {
    let Some(caps) = SETUP_INSTALL_REQUIRES.captures(content) else {
        return Vec::new();
    };
    let body = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    QUOTED
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .filter_map(|m| parse_requirement(m.as_str(), manifest_path))
        .collect()
}

/// `[project].dependencies` and `[tool.poetry(.dev)-dependencies]`.
///
/// Line-oriented: enough for the shapes manifests actually use, not a TOML parser.
pub fn parse_pyproject(content: &str, manifest_path: &str) -> Vec<Dependency> {
    let mut deps = Vec::new();
    let mut table = String::new();
    let mut in_array = false;

    for line in content.lines() {
        let line = line.split(" #").next().unwrap_or("").trim_end();

        if in_array {
            for cap in QUOTED.captures_iter(line) {
                if let Some(dep) = cap.get(1).and_then(|m| parse_requirement(m.as_str(), manifest_path)) {
                    deps.push(dep);
                }
            }
            if line.contains(']') {
                in_array = false;
            }
            continue;
        }

        if let Some(caps) = TOML_TABLE.captures(line) {
            table = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            continue;
        }

        let Some(caps) = TOML_ASSIGN.captures(line) else {
            continue;
        };
        let key = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        match table.as_str() {
            "project" if key == "dependencies" => {
                let inline = value.trim_start_matches('[');
                for cap in QUOTED.captures_iter(inline) {
                    if let Some(dep) = cap.get(1).and_then(|m| parse_requirement(m.as_str(), manifest_path)) {
                        deps.push(dep);
                    }
                }
                in_array = value.starts_with('[') && !value.contains(']');
            }
            "tool.poetry.dependencies" | "tool.poetry.dev-dependencies" => {
                if key.eq_ignore_ascii_case("python") {
                    continue;
                }
                let version = if value.starts_with('{') {
                    TOML_INLINE_VERSION
                        .captures(value)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                } else {
                    QUOTED
                        .captures(value)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                };
                deps.push(Dependency {
                    name: key.to_string(),
                    version: version.unwrap_or_else(|| LATEST.to_string()),
                    dev: table.ends_with("dev-dependencies"),
                    ecosystem: Ecosystem::Python,
                    manifest_path: manifest_path.to_string(),
                });
            }
            _ => {}
        }
    }

    deps
}

pub fn parse_package_json(content: &str, manifest_path: &str) -> Vec<Dependency> {
    let json: serde_json::Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(manifest = %manifest_path, error = %e, "unreadable package.json");
            return Vec::new();
        }
    };
    let Some(obj) = json.as_object() else {
        return Vec::new();
    };

    let mut deps = Vec::new();
    for (section, dev) in [
        ("dependencies", false),
        ("devDependencies", true),
        ("peerDependencies", false),
    ] {
        if let Some(entries) = obj.get(section).and_then(|v| v.as_object()) {
            for (name, value) in entries {
                deps.push(Dependency {
                    name: name.clone(),
                    version: value.as_str().unwrap_or(LATEST).to_string(),
                    dev,
                    ecosystem: Ecosystem::Npm,
                    manifest_path: manifest_path.to_string(),
                });
            }
        }
    }
    deps
}

pub fn parse_csproj(content: &str, manifest_path: &str) -> Vec<Dependency> {
    PACKAGE_REFERENCE
        .captures_iter(content)
        .filter_map(|caps| {
            let attrs: HashMap<String, String> = XML_ATTR
                .captures_iter(caps.get(1)?.as_str())
                .filter_map(|a| Some((a.get(1)?.as_str().to_string(), a.get(2)?.as_str().to_string())))
                .collect();
            let name = attrs.get("Include").or_else(|| attrs.get("Update"))?.clone();
            Some(Dependency {
                name,
                version: attrs
                    .get("Version")
                    .cloned()
                    .unwrap_or_else(|| LATEST.to_string()),
                dev: attrs
                    .get("PrivateAssets")
                    .map(|v| v.eq_ignore_ascii_case("all"))
                    .unwrap_or(false),
                ecosystem: Ecosystem::NuGet,
                manifest_path: manifest_path.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_requirements() {
        let deps = parse_requirements(
            "# pinned\nrequests==2.31.0\nflask>=2.0\n-r other.txt\nuvicorn[standard]==0.23.1 ; python_version>'3.8'\n\n",
            "requirements.txt",
        );
        let pairs: Vec<(&str, &str)> = deps
            .iter()
            .map(|d| (d.name.as_str(), d.version.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("requests", "2.31.0"),
                ("flask", "latest"),
                ("uvicorn", "0.23.1")
            ]
        );
    }

    #[test]
    fn test_parse_pyproject_project_and_poetry() {
        let content = r#"
[project]
name = "demo"
dependencies = [
    "httpx==0.27.0",
    "pydantic>=2",
]

[tool.poetry.dependencies]
python = "^3.11"
numpy = "^1.26"
pandas = { version = "2.2.0", optional = true }
"#;
        let deps = parse_pyproject(content, "pyproject.toml");
        let names: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["httpx", "pydantic", "numpy", "pandas"]);
        assert_eq!(deps[0].version, "0.27.0");
        assert_eq!(deps[1].version, LATEST);
        assert_eq!(deps[2].version, "^1.26");
        assert_eq!(deps[3].version, "2.2.0");
    }

    #[test]
    fn test_parse_setup_py() {
        let content = "setup(name='x', install_requires=[\n 'click==8.1.7',\n \"rich\",\n])";
        let deps = parse_setup_py(content, "setup.py");
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].version, "8.1.7");
        assert_eq!(deps[1].name, "rich");
    }

    #[test]
    fn test_parse_package_json_sections() {
        let content = r#"{"dependencies": {"react": "^18.2.0"}, "devDependencies": {"@types/node": "20.0.0"}}"#;
        let deps = parse_package_json(content, "package.json");
        assert_eq!(deps.len(), 2);
        assert!(!deps[0].dev);
        assert!(deps[1].dev);
        assert_eq!(deps[1].name, "@types/node");
    }

    #[test]
    fn test_parse_csproj() {
        let content = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="13.0.3" />
    <PackageReference Include="Serilog.AspNetCore">
    </PackageReference>
  </ItemGroup>
</Project>"#;
        let deps = parse_csproj(content, "App.csproj");
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].version, "13.0.3");
        assert_eq!(deps[1].name, "Serilog.AspNetCore");
        assert_eq!(deps[1].version, LATEST);
    }

    #[test]
    fn test_scan_and_lookup() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("requirements.txt"), "Requests_Toolbelt==1.0.0\n").unwrap();
        fs::create_dir_all(temp.path().join("web")).unwrap();
        fs::write(
            temp.path().join("web/package.json"),
            r#"{"dependencies": {"lodash": "4.17.21"}}"#,
        )
        .unwrap();
        fs::create_dir_all(temp.path().join("node_modules/x")).unwrap();
        fs::write(
            temp.path().join("node_modules/x/package.json"),
            r#"{"dependencies": {"leftpad": "1.0.0"}}"#,
        )
        .unwrap();
        fs::write(
            temp.path().join("App.csproj"),
            r#"<PackageReference Include="Newtonsoft.Json" Version="13.0.3" />"#,
        )
        .unwrap();

        let index = ManifestIndex::scan(temp.path(), &["node_modules".to_string()]);
        assert_eq!(index.len(), 3);
        assert_eq!(index.version(Ecosystem::Python, "requests-toolbelt"), Some("1.0.0"));
        assert_eq!(index.version(Ecosystem::Npm, "lodash"), Some("4.17.21"));
        assert!(index.get(Ecosystem::Npm, "leftpad").is_none());
        assert_eq!(
            index
                .nuget_package_for("Newtonsoft.Json.Linq")
                .map(|d| d.name.as_str()),
            Some("Newtonsoft.Json")
        );
        assert!(index.nuget_package_for("Newtonsoft").is_none());
    }
}
