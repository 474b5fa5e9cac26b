use std::collections::HashMap;

use indexmap::IndexMap;
use swc_core::{
    common::{sync::Lrc, SourceMap, DUMMY_SP},
    ecma::{ast::*, visit::VisitMutWith},
};
use tracing::{info, instrument, warn};

use crate::{
    analysis::{analyze, ImportShape},
    config::BuildConfig,
    edit::{without_declarators, Edits, SiteRewriter},
    error::{MzError, Result},
    graph::DependencyGraph,
    locate::locate,
    resolve::{DependencyMap, ModuleScope, NameAllocator, Resolver},
    syntax::{
        empty_object_decl, ident_expr, is_use_strict, is_valid_ident, param, parse_module,
        parse_template, print_module, return_stmt, shorthand_object, str_expr, string_table, DropSpans,
    },
};

static UMD_TEMPLATE: &str = include_str!("templates/umd.js");
static UMD_BUNDLE_TEMPLATE: &str = include_str!("templates/umd_bundle.js");

#[derive(Debug, Clone)]
pub struct UmdBuild {
    pub code: String,
    /// Root-relative path; also the module's key in bundles.
    pub path: String,
    pub name: String,
    /// Dependencies this module references, keyed from the root: key -> name.
    pub dependencies: IndexMap<String, String>,
    /// The wrapper's table as the module sees it: specifier -> name.
    pub table: IndexMap<String, String>,
    /// `function DEF(..) { … }` without source positions, for bundling.
    pub factory: Box<Expr>,
}

// -----------------------------------------------------------------------------
// Module build
// -----------------------------------------------------------------------------

#[instrument(skip_all, fields(path = %path))]
pub fn build_umd(
    config: &BuildConfig,
    resolver: &Resolver,
    path: &str,
    code: &str,
    dep_map: &mut DependencyMap,
    names: &mut NameAllocator,
) -> Result<UmdBuild> {
    let parsed = parse_module(path, code)?;
    let located = locate(path, &parsed.module)?;
    let mut analysis = analyze(path, &parsed.module, &located)?;

    let mut working = dep_map.clone();
    let scope = ModuleScope::new(resolver, config, path);
    let name = working.register_module(&scope.dep_key(), names);

    let mut dependencies = IndexMap::new();
    let mut table = IndexMap::new();
    let mut rewriter = SiteRewriter::new();
    let mut edits = Edits::new();
    let mut consumed: HashMap<usize, Vec<usize>> = HashMap::new();

    let requires = analysis
        .imports
        .iter()
        .map(|i| (i.site, i.specifier.as_str(), Some(&i.shape)))
        .chain(analysis.combos.iter().map(|c| (c.require, c.specifier.as_str(), None)));
    for (site_id, specifier, shape) in requires {
        let bare = shape == Some(&ImportShape::Bare);
        let dep = scope.resolve(specifier, bare, &mut working, names)?;
        dependencies.insert(dep.key.to_string(), dep.name.clone());
        table.insert(dep.specifier.clone(), dep.name.clone());

        let Some(site) = located.require(site_id) else { continue };
        match shape {
            Some(ImportShape::Bare) => edits.remove(site.anchor),
            Some(ImportShape::Default { target, declarator }) if *target == dep.name => {
                consumed.entry(site.anchor).or_default().push(*declarator);
            }
            _ => rewriter.replace_call(site.span, ident_expr(&dep.name)),
        }
    }

    let collector = analysis.has_exports().then(|| analysis.collector());
    if let Some(collector) = &collector {
        for site in &located.exports {
            rewriter.replace_export_ref(site.span, collector);
        }
    }

    let mut body = parsed.module.body;
    rewriter.rewrite(&mut body);

    for (anchor, declarators) in &consumed {
        let remainder = match body.get(*anchor) {
            Some(ModuleItem::Stmt(stmt)) => without_declarators(stmt.clone(), declarators),
            _ => None,
        };
        edits.replace(*anchor, remainder.map(ModuleItem::Stmt));
    }

    let strict = body.first().map_or(false, is_use_strict);
    if strict {
        edits.remove(0);
    }
    if let Some(collector) = &collector {
        if let Some(first) = analysis.export_anchors().first() {
            edits.insert_before(*first, [empty_object_decl(collector)]);
        }
    }

    let mut stmts = Vec::with_capacity(body.len() + 2);
    if strict {
        stmts.push(Stmt::Expr(ExprStmt { span: DUMMY_SP, expr: str_expr("use strict") }));
    }
    for item in edits.apply(body) {
        match item {
            ModuleItem::Stmt(stmt) => stmts.push(stmt),
            ModuleItem::ModuleDecl(_) => {
                return Err(MzError::Codegen(format!("{path}: module declaration inside a UMD factory")))
            }
        }
    }
    if let Some(collector) = &collector {
        stmts.push(return_stmt(ident_expr(collector)));
    }

    let (wrapper, factory) = wrap(&name, &table, stmts)?;
    let module = Module { body: wrapper.body, ..parsed.module };
    let code = print_module(&parsed.cm, Some(&parsed.comments), &module)?;

    *dep_map = working;
    info!(name = %name, dependencies = dependencies.len(), "built UMD module");
    Ok(UmdBuild { code, path: scope.key().to_string(), name, dependencies, table, factory })
}

// -----------------------------------------------------------------------------
// Wrapper templates
// -----------------------------------------------------------------------------

fn template_args<'m>(module: &'m mut Module, template: &'static str) -> Result<&'m mut Vec<ExprOrSpread>> {
    match module.body.first_mut() {
        Some(ModuleItem::Stmt(Stmt::Expr(ExprStmt { expr, .. }))) => match &mut **expr {
            Expr::Call(call) => Ok(&mut call.args),
            _ => Err(MzError::Template(template)),
        },
        _ => Err(MzError::Template(template)),
    }
}

fn template_arg<'a>(args: &'a mut [ExprOrSpread], index: usize, template: &'static str) -> Result<&'a mut Expr> {
    args.get_mut(index)
        .map(|arg| &mut *arg.expr)
        .ok_or(MzError::Template(template))
}

/// Fills the single-module wrapper; returns it with a position-free copy of
/// the factory function.
fn wrap(name: &str, table: &IndexMap<String, String>, stmts: Vec<Stmt>) -> Result<(Module, Box<Expr>)> {
    const TEMPLATE: &str = "umd.js";
    let mut wrapper = parse_template(TEMPLATE, UMD_TEMPLATE)?;
    let args = template_args(&mut wrapper, TEMPLATE)?;

    *template_arg(args, 0, TEMPLATE)? = *str_expr(name);
    *template_arg(args, 2, TEMPLATE)? = *string_table(table.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let Expr::Fn(def) = template_arg(args, 3, TEMPLATE)? else {
        return Err(MzError::Template(TEMPLATE));
    };
    def.function.params = table.values().map(|n| param(n)).collect();
    let block = def.function.body.as_mut().ok_or(MzError::Template(TEMPLATE))?;
    block.stmts = stmts;

    let mut factory = Box::new(Expr::Fn(def.clone()));
    factory.visit_mut_with(&mut DropSpans);
    Ok((wrapper, factory))
}

// -----------------------------------------------------------------------------
// Bundle / index
// -----------------------------------------------------------------------------

/// Combines module builds under one wrapper, dependencies first.
#[instrument(skip_all, fields(modules = builds.len()))]
pub fn build_umd_bundle(config: &BuildConfig, builds: &[UmdBuild]) -> Result<String> {
    const TEMPLATE: &str = "umd_bundle.js";

    let mut graph = DependencyGraph::new();
    for build in builds {
        graph.add_module(build.path.as_str(), build.dependencies.keys().map(String::as_str));
    }
    let order = graph.topological_sort(config.ignore_circular_dependency)?;

    let mut bundle = parse_template(TEMPLATE, UMD_BUNDLE_TEMPLATE)?;
    let args = template_args(&mut bundle, TEMPLATE)?;
    let Expr::Array(defs) = template_arg(args, 1, TEMPLATE)? else {
        return Err(MzError::Template(TEMPLATE));
    };
    for build in order.into_iter().filter_map(|id| builds.get(id)) {
        let table = string_table(build.dependencies.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let entry = ArrayLit {
            span: DUMMY_SP,
            elems: [str_expr(&build.name), table, build.factory.clone()]
                .into_iter()
                .map(|expr| Some(ExprOrSpread { spread: None, expr }))
                .collect(),
        };
        defs.elems.push(Some(ExprOrSpread { spread: None, expr: Box::new(Expr::Array(entry)) }));
    }

    let cm: Lrc<SourceMap> = Default::default();
    let code = print_module(&cm, None, &bundle)?;
    info!(modules = builds.len(), "built UMD bundle");
    Ok(code)
}

/// A module whose value maps every dependency-map name to that dependency.
#[instrument(skip_all)]
pub fn build_umd_index(config: &BuildConfig, dep_map: &DependencyMap) -> Result<UmdBuild> {
    let mut table = IndexMap::new();
    for (key, name) in dep_map.iter() {
        if !is_valid_ident(name) {
            warn!(%key, name, "skipping index entry without a valid identifier name");
            continue;
        }
        table.insert(key.to_string(), name.to_string());
    }

    let names: Vec<&str> = table.values().map(String::as_str).collect();
    let stmts = vec![return_stmt(shorthand_object(&names))];
    let (wrapper, factory) = wrap(&config.index_name, &table, stmts)?;

    let cm: Lrc<SourceMap> = Default::default();
    let code = print_module(&cm, None, &wrapper)?;
    info!(entries = table.len(), "built UMD index");
    Ok(UmdBuild {
        code,
        path: "./index.js".to_string(),
        name: config.index_name.clone(),
        dependencies: table.clone(),
        table,
        factory,
    })
}
