use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sugar_path::SugarPath;
use tracing::{debug, warn};

use crate::config::BuildConfig;
use crate::error::{MzError, Result};

/// Name-based (package style) keys live in their own key space.
pub const NAME_KEY_PREFIX: &str = ":";

static PATH_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\.{1,2}[/\\]|[/\\]|~(?:[/\\]|$)|[A-Za-z]:[/\\])").expect("valid regex"));
static FILE_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[A-Za-z0-9]+$").expect("valid regex"));
static JS_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.js$").expect("valid regex"));

// -----------------------------------------------------------------------------
// Keys
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepKey {
    /// Root-relative file path, always `./`- or `../`-prefixed.
    Path(String),
    /// Bare package-style name, stored without the prefix.
    Name(String),
}

impl DepKey {
    pub fn to_map_key(&self) -> String {
        match self {
            DepKey::Path(p) => p.clone(),
            DepKey::Name(n) => format!("{NAME_KEY_PREFIX}{n}"),
        }
    }

    pub fn from_map_key(key: &str) -> Self {
        match key.strip_prefix(NAME_KEY_PREFIX) {
            Some(name) => DepKey::Name(name.to_string()),
            None => DepKey::Path(key.to_string()),
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self, DepKey::Path(_))
    }
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKey::Path(p) => f.write_str(p),
            DepKey::Name(n) => f.write_str(n),
        }
    }
}

fn with_current_dir(path: &str) -> String {
    if path.starts_with("./")
        || path.starts_with("../")
        || path == "."
        || path == ".."
        || Path::new(path).is_absolute()
    {
        path.to_string()
    } else {
        format!("./{path}")
    }
}

pub fn rewrite_js_to_mjs(path: &str) -> String {
    JS_EXTENSION.replace(path, ".mjs").into_owned()
}

// -----------------------------------------------------------------------------
// Path resolution
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    home: Option<PathBuf>,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), home: dirs::home_dir() }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(&config.from)
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn expand_home(&self, specifier: &str) -> String {
        let is_home = specifier == "~" || specifier.starts_with("~/") || specifier.starts_with("~\\");
        match (&self.home, is_home) {
            (Some(home), true) => format!("{}{}", home.to_slash_lossy(), &specifier[1..]),
            _ => specifier.to_string(),
        }
    }

    /// Relative/absolute/home prefix AND a file-extension suffix.
    pub fn is_path_specifier(specifier: &str) -> bool {
        PATH_PREFIX.is_match(specifier) && FILE_EXTENSION.is_match(specifier)
    }

    /// Resolves `specifier` against `from` (a directory relative to the root)
    /// and returns `(basePath, rootRelativePath)`.
    pub fn normalize(&self, specifier: &str, from: &Path) -> (PathBuf, String) {
        let expanded = self.expand_home(specifier);
        let full = self.root.join(from).join(expanded);
        let relative = full.relative(&self.root);
        (self.root.clone(), with_current_dir(&relative.to_slash_lossy()))
    }

    /// Directory (relative to the root) that a root-relative module key lives in.
    pub fn module_dir(key: &str) -> PathBuf {
        Path::new(key).parent().map(Path::to_path_buf).unwrap_or_default()
    }

    /// Re-expresses a root-relative key as seen from the directory of `module_key`.
    pub fn relative_to_module(&self, key: &str, module_key: &str) -> String {
        let target = self.root.join(key);
        let base = self.root.join(Self::module_dir(module_key));
        with_current_dir(&target.relative(base).to_slash_lossy())
    }
}

// -----------------------------------------------------------------------------
// Generated names
// -----------------------------------------------------------------------------

/// Hands out external module names that are unique for the whole run.
#[derive(Debug, Default)]
pub struct NameAllocator {
    generated: HashSet<String>,
    next: u64,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self, in_use: impl Fn(&str) -> bool) -> String {
        loop {
            self.next += 1;
            let name = format!("Mz_{}", self.next);
            if !self.generated.contains(&name) && !in_use(&name) {
                self.generated.insert(name.clone());
                return name;
            }
        }
    }

    pub fn is_generated(&self, name: &str) -> bool {
        self.generated.contains(name)
    }
}

// -----------------------------------------------------------------------------
// Dependency map
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPolicy {
    Strict,
    Tolerate,
}

impl UnknownPolicy {
    pub fn from_config(config: &BuildConfig) -> Self {
        if config.ignore_unknown_dependency {
            UnknownPolicy::Tolerate
        } else {
            UnknownPolicy::Strict
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap {
    entries: IndexMap<String, String>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the initial map from `config.dep_map`. Keys with a file extension
    /// are treated as root-relative paths, `:`-prefixed or extension-less keys
    /// as package names.
    pub fn seed(config: &BuildConfig, resolver: &Resolver, names: &mut NameAllocator) -> Self {
        let mut map = Self::new();
        for (specifier, value) in &config.dep_map {
            let key = match specifier.strip_prefix(NAME_KEY_PREFIX) {
                Some(name) => DepKey::Name(name.to_string()),
                None if FILE_EXTENSION.is_match(specifier) => {
                    DepKey::Path(resolver.normalize(specifier, Path::new("")).1)
                }
                None => DepKey::Name(specifier.clone()),
            };
            let name = match value.as_str() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => map.generate_name(names),
            };
            debug!(key = %key.to_map_key(), %name, "seeded dependency");
            map.insert(&key, name);
        }
        map
    }

    pub fn get(&self, key: &DepKey) -> Option<&str> {
        self.entries.get(&key.to_map_key()).map(String::as_str)
    }

    pub fn contains(&self, key: &DepKey) -> bool {
        self.entries.contains_key(&key.to_map_key())
    }

    pub fn insert(&mut self, key: &DepKey, name: impl Into<String>) {
        self.entries.insert(key.to_map_key(), name.into());
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.entries.values().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DepKey, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (DepKey::from_map_key(k), v.as_str()))
    }

    fn generate_name(&self, names: &mut NameAllocator) -> String {
        names.generate(|candidate| self.has_name(candidate))
    }

    /// Maps a specifier written inside a module located in `from` (relative to
    /// the root) to its key. Bare names that match a known root-relative file
    /// (`"4.js"` with `"./4.js"` present) resolve to that file.
    pub fn key_for(&self, resolver: &Resolver, specifier: &str, from: &Path) -> DepKey {
        let expanded = resolver.expand_home(specifier);
        let (_, relative) = resolver.normalize(&expanded, from);
        if Resolver::is_path_specifier(&expanded) {
            return DepKey::Path(relative);
        }
        let candidate = DepKey::Path(relative);
        if self.contains(&candidate) {
            return candidate;
        }
        DepKey::Name(specifier.to_string())
    }

    /// Input files are always known; a missing entry just gets a fresh name.
    pub fn register_module(&mut self, key: &DepKey, names: &mut NameAllocator) -> String {
        if let Some(name) = self.get(key) {
            return name.to_string();
        }
        let name = self.generate_name(names);
        debug!(key = %key, %name, "registered module");
        self.insert(key, name.clone());
        name
    }

    pub fn resolve_or_assign(
        &mut self,
        key: &DepKey,
        policy: UnknownPolicy,
        names: &mut NameAllocator,
        importer: &str,
    ) -> Result<String> {
        if let Some(name) = self.get(key) {
            return Ok(name.to_string());
        }
        match policy {
            UnknownPolicy::Strict => Err(MzError::UnknownDependency {
                path: importer.to_string(),
                specifier: key.to_string(),
            }),
            UnknownPolicy::Tolerate => {
                let name = self.generate_name(names);
                warn!(dependency = %key, %name, importer, "auto-registered unknown dependency");
                self.insert(key, name.clone());
                Ok(name)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Per-module resolution
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub key: DepKey,
    pub name: String,
    /// How the importing module spells the dependency: module-relative path
    /// for files, the bare name otherwise.
    pub specifier: String,
}

/// Resolution context for the one module currently being built.
#[derive(Debug)]
pub struct ModuleScope<'a> {
    resolver: &'a Resolver,
    key: String,
    dir: PathBuf,
    policy: UnknownPolicy,
}

impl<'a> ModuleScope<'a> {
    pub fn new(resolver: &'a Resolver, config: &BuildConfig, path: &str) -> Self {
        let (_, key) = resolver.normalize(path, Path::new(""));
        let dir = Resolver::module_dir(&key);
        Self { resolver, key, dir, policy: UnknownPolicy::from_config(config) }
    }

    /// Root-relative key of the module itself.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dep_key(&self) -> DepKey {
        DepKey::Path(self.key.clone())
    }

    /// Side-effect-only imports are always tolerated; their name is never
    /// referenced.
    pub fn resolve(
        &self,
        specifier: &str,
        bare: bool,
        map: &mut DependencyMap,
        names: &mut NameAllocator,
    ) -> Result<ResolvedDependency> {
        let key = map.key_for(self.resolver, specifier, &self.dir);
        if key == self.dep_key() {
            return Err(MzError::IllegalSelfReference {
                path: self.key.clone(),
                specifier: specifier.to_string(),
            });
        }
        let policy = if bare { UnknownPolicy::Tolerate } else { self.policy };
        let name = map.resolve_or_assign(&key, policy, names, &self.key)?;
        let specifier = match &key {
            DepKey::Path(p) => self.resolver.relative_to_module(p, &self.key),
            DepKey::Name(n) => n.clone(),
        };
        debug!(%key, %name, %specifier, "resolved dependency");
        Ok(ResolvedDependency { key, name, specifier })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new("/project").with_home(Some(PathBuf::from("/home/me")))
    }

    #[test]
    fn path_specifiers_need_prefix_and_extension() {
        assert!(Resolver::is_path_specifier("./a.js"));
        assert!(Resolver::is_path_specifier("../lib/b.mjs"));
        assert!(Resolver::is_path_specifier("/abs/c.json"));
        assert!(Resolver::is_path_specifier("~/d.js"));
        assert!(!Resolver::is_path_specifier("lodash"));
        assert!(!Resolver::is_path_specifier("4.js"));
        assert!(!Resolver::is_path_specifier("./lib"));
    }

    #[test]
    fn normalize_is_root_relative() {
        let r = resolver();
        assert_eq!(r.normalize("./a.js", Path::new("")).1, "./a.js");
        assert_eq!(r.normalize("../b.js", Path::new("sub")).1, "./b.js");
        assert_eq!(r.normalize("./c.js", Path::new("sub")).1, "./sub/c.js");
        assert_eq!(r.normalize("a/../d.js", Path::new("")).1, "./d.js");
        assert_eq!(r.normalize("../outside.js", Path::new("")).1, "../outside.js");
    }

    #[test]
    fn home_expansion() {
        let r = resolver();
        assert_eq!(r.expand_home("~/x.js"), "/home/me/x.js");
        assert_eq!(r.expand_home("~x.js"), "~x.js");
        assert_eq!(r.normalize("~/x.js", Path::new("")).1, "../home/me/x.js");
    }

    #[test]
    fn module_relative_paths() {
        let r = resolver();
        assert_eq!(r.relative_to_module("./b.js", "./sub/a.js"), "../b.js");
        assert_eq!(r.relative_to_module("./sub/c.js", "./sub/a.js"), "./c.js");
        assert_eq!(r.relative_to_module("./c.js", "./a.js"), "./c.js");
    }

    #[test]
    fn key_spaces_do_not_collide() {
        let path = DepKey::Path("./lodash".to_string());
        let name = DepKey::Name("lodash".to_string());
        let mut map = DependencyMap::new();
        map.insert(&path, "A");
        map.insert(&name, "B");
        assert_eq!(map.get(&path), Some("A"));
        assert_eq!(map.get(&name), Some("B"));
        assert_eq!(DepKey::from_map_key(&name.to_map_key()), name);
    }

    #[test]
    fn bare_name_falls_back_to_known_file() {
        let r = resolver();
        let mut map = DependencyMap::new();
        assert_eq!(map.key_for(&r, "4.js", Path::new("")), DepKey::Name("4.js".to_string()));
        map.insert(&DepKey::Path("./4.js".to_string()), "Four");
        assert_eq!(map.key_for(&r, "4.js", Path::new("")), DepKey::Path("./4.js".to_string()));
    }

    #[test]
    fn seed_generates_missing_names() {
        let mut cfg = BuildConfig::default();
        cfg.from = "/project".to_string();
        cfg.dep_map.insert("src/a.js".to_string(), "A".into());
        cfg.dep_map.insert("src/b.js".to_string(), "".into());
        cfg.dep_map.insert("lodash".to_string(), "_".into());
        cfg.dep_map.insert(":react".to_string(), serde_json::Value::Null);
        let mut names = NameAllocator::new();
        let map = DependencyMap::seed(&cfg, &Resolver::from_config(&cfg), &mut names);

        assert_eq!(map.get(&DepKey::Path("./src/a.js".to_string())), Some("A"));
        let generated = map.get(&DepKey::Path("./src/b.js".to_string())).unwrap();
        assert!(names.is_generated(generated));
        assert_eq!(map.get(&DepKey::Name("lodash".to_string())), Some("_"));
        assert!(map.get(&DepKey::Name("react".to_string())).is_some());
    }

    #[test]
    fn generated_names_are_unique_per_run() {
        let mut names = NameAllocator::new();
        let mut map = DependencyMap::new();
        map.insert(&DepKey::Name("x".to_string()), "Mz_1");
        let mut seen = HashSet::new();
        for i in 0..50 {
            let key = DepKey::Name(format!("dep{i}"));
            let name = map
                .resolve_or_assign(&key, UnknownPolicy::Tolerate, &mut names, "./a.js")
                .unwrap();
            assert_ne!(name, "Mz_1");
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn strict_policy_rejects_unknown() {
        let mut names = NameAllocator::new();
        let mut map = DependencyMap::new();
        let err = map
            .resolve_or_assign(&DepKey::Path("./x.js".into()), UnknownPolicy::Strict, &mut names, "./a.js")
            .unwrap_err();
        assert!(matches!(err, MzError::UnknownDependency { .. }));
        assert!(map.is_empty());
    }

    #[test]
    fn scope_rejects_self_reference() {
        let r = resolver();
        let cfg = BuildConfig::default();
        let scope = ModuleScope::new(&r, &cfg, "sub/a.js");
        assert_eq!(scope.key(), "./sub/a.js");
        let mut names = NameAllocator::new();
        let mut map = DependencyMap::new();
        let err = scope.resolve("./a.js", false, &mut map, &mut names).unwrap_err();
        assert!(matches!(err, MzError::IllegalSelfReference { .. }));
    }

    #[test]
    fn scope_resolves_module_relative() {
        let r = resolver();
        let cfg = BuildConfig::default();
        let scope = ModuleScope::new(&r, &cfg, "sub/a.js");
        let mut names = NameAllocator::new();
        let mut map = DependencyMap::new();
        map.insert(&DepKey::Path("./b.js".into()), "B");
        let dep = scope.resolve("../b.js", false, &mut map, &mut names).unwrap();
        assert_eq!(dep.key, DepKey::Path("./b.js".into()));
        assert_eq!(dep.name, "B");
        assert_eq!(dep.specifier, "../b.js");

        // strict policy, but side-effect imports still get a name
        let dep = scope.resolve("./side.js", true, &mut map, &mut names).unwrap();
        assert!(names.is_generated(&dep.name));
        assert!(scope.resolve("./other.js", false, &mut map, &mut names).is_err());
    }

    #[test]
    fn mjs_rewrite_only_touches_js_suffix() {
        assert_eq!(rewrite_js_to_mjs("./a.js"), "./a.mjs");
        assert_eq!(rewrite_js_to_mjs("./a.json"), "./a.json");
    }
}
