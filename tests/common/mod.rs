#![allow(dead_code)]

use std::sync::Once;

use moduloze::{
    build_esm, build_umd, prepare_dependency_map, BuildConfig, DependencyMap, EsmBuild, NameAllocator, Resolver,
    Result, UmdBuild,
};
use tracing_subscriber::EnvFilter;

pub const ROOT: &str = "/project";

/// Opt-in logs: `RUST_LOG=moduloze=debug cargo test`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Collapses all whitespace runs so assertions don't depend on codegen layout.
pub fn squash(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn config(json: &str) -> BuildConfig {
    let mut config = BuildConfig::from_json(json).unwrap();
    config.from = ROOT.to_string();
    config
}

/// One conversion run: a config, the shared dependency map and name allocator.
pub struct Project {
    pub config: BuildConfig,
    pub map: DependencyMap,
    pub names: NameAllocator,
    resolver: Resolver,
}

impl Project {
    pub fn new(config: BuildConfig, modules: &[&str]) -> Self {
        init_tracing();
        let mut names = NameAllocator::new();
        let map = prepare_dependency_map(&config, modules.iter().copied(), &mut names);
        let resolver = Resolver::from_config(&config);
        Self { config, map, names, resolver }
    }

    pub fn esm(&mut self, path: &str, code: &str) -> Result<EsmBuild> {
        build_esm(&self.config, &self.resolver, path, code, &mut self.map, &mut self.names)
    }

    pub fn umd(&mut self, path: &str, code: &str) -> Result<UmdBuild> {
        build_umd(&self.config, &self.resolver, path, code, &mut self.map, &mut self.names)
    }
}
