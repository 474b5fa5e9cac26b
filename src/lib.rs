pub mod analysis;
pub mod config;
pub mod edit;
pub mod error;
pub mod esm;
pub mod graph;
pub mod locate;
pub mod resolve;
pub mod syntax;
pub mod umd;

use tracing::instrument;

pub use config::BuildConfig;
pub use error::{MzError, Result};
pub use esm::{build_esm, build_esm_index, EsmBuild};
pub use graph::DependencyGraph;
pub use resolve::{DepKey, DependencyMap, NameAllocator, Resolver, UnknownPolicy};
pub use umd::{build_umd, build_umd_bundle, build_umd_index, UmdBuild};

// -----------------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub esm: Option<EsmBuild>,
    pub umd: Option<UmdBuild>,
}

/// Converts one CommonJS module into every format enabled in `config`.
///
/// `path` is relative to `config.from`. Each format parses its own copy of
/// the source. `dep_map` is only updated when every enabled format succeeds,
/// so it can be threaded straight into the next module's build.
#[instrument(skip_all, fields(path = %path))]
pub fn build(
    config: &BuildConfig,
    path: &str,
    code: &str,
    dep_map: &mut DependencyMap,
    names: &mut NameAllocator,
) -> Result<BuildOutput> {
    let resolver = Resolver::from_config(config);
    let mut working = dep_map.clone();

    let umd = config
        .build_umd
        .then(|| build_umd(config, &resolver, path, code, &mut working, names))
        .transpose()?;
    let esm = config
        .build_esm
        .then(|| build_esm(config, &resolver, path, code, &mut working, names))
        .transpose()?;

    *dep_map = working;
    Ok(BuildOutput { esm, umd })
}

/// Seeds a dependency map from `config.dep_map` and registers every input
/// module under its root-relative path.
pub fn prepare_dependency_map<'a>(
    config: &BuildConfig,
    modules: impl IntoIterator<Item = &'a str>,
    names: &mut NameAllocator,
) -> DependencyMap {
    let resolver = Resolver::from_config(config);
    let mut map = DependencyMap::seed(config, &resolver, names);
    for path in modules {
        let (_, key) = resolver.normalize(path, std::path::Path::new(""));
        map.register_module(&DepKey::Path(key), names);
    }
    map
}
