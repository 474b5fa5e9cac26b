use indexmap::IndexMap;
use swc_core::{
    common::{sync::Lrc, SourceMap, DUMMY_SP},
    ecma::ast::*,
};
use tracing::{info, instrument, warn};

use crate::{
    analysis::{analyze, Analysis, ComboEntry, ExportShape, ExportSlot, ImportEntry, ImportShape},
    config::BuildConfig,
    edit::{without_declarators, Edits, SiteRewriter},
    error::{MzError, Result},
    locate::{locate, Located},
    resolve::{rewrite_js_to_mjs, DepKey, DependencyMap, ModuleScope, NameAllocator, ResolvedDependency, Resolver},
    syntax::{
        assign_stmt, binding_pat, empty_object_decl, export_decl, export_default_expr, export_named,
        export_namespace_from, ident, ident_expr, import_decl, import_default, import_named,
        import_namespace, is_use_strict, is_valid_ident, member_assign_stmt, parse_module, print_module, str_lit,
        var_decl,
    },
};

#[derive(Debug, Clone)]
pub struct EsmBuild {
    pub code: String,
    /// Output path, root-relative, with `.mjs` rewriting applied.
    pub path: String,
    pub name: String,
    /// Dependencies this module references: key -> name.
    pub dependencies: IndexMap<String, String>,
}

// -----------------------------------------------------------------------------
// Module build
// -----------------------------------------------------------------------------

#[instrument(skip_all, fields(path = %path))]
pub fn build_esm(
    config: &BuildConfig,
    resolver: &Resolver,
    path: &str,
    code: &str,
    dep_map: &mut DependencyMap,
    names: &mut NameAllocator,
) -> Result<EsmBuild> {
    let parsed = parse_module(path, code)?;
    let located = locate(path, &parsed.module)?;
    let mut analysis = analyze(path, &parsed.module, &located)?;

    // the caller's map only sees this module's entries once it fully succeeds
    let mut working = dep_map.clone();
    let scope = ModuleScope::new(resolver, config, path);
    let name = working.register_module(&scope.dep_key(), names);

    let mut dependencies = IndexMap::new();
    let mut resolve = |specifier: &str, bare: bool| -> Result<ResolvedDependency> {
        let mut dep = scope.resolve(specifier, bare, &mut working, names)?;
        dependencies.insert(dep.key.to_string(), dep.name.clone());
        if config.mjs && dep.key.is_path() {
            dep.specifier = rewrite_js_to_mjs(&dep.specifier);
        }
        Ok(dep)
    };
    let mut import_deps = Vec::with_capacity(analysis.imports.len());
    for entry in &analysis.imports {
        import_deps.push(resolve(&entry.specifier, entry.shape == ImportShape::Bare)?);
    }
    let mut combo_deps = Vec::with_capacity(analysis.combos.len());
    for combo in &analysis.combos {
        combo_deps.push(resolve(&combo.specifier, false)?);
    }

    let mut emitter = EsmEmitter { config, path, located: &located, analysis: &mut analysis, collector: None };
    let body = emitter.emit(parsed.module.body, &import_deps, &combo_deps)?;
    let module = Module { body, ..parsed.module };
    let code = print_module(&parsed.cm, Some(&parsed.comments), &module)?;

    *dep_map = working;
    let out_path = if config.mjs { rewrite_js_to_mjs(scope.key()) } else { scope.key().to_string() };
    info!(name = %name, output = %out_path, dependencies = dependencies.len(), "built ESM module");
    Ok(EsmBuild { code, path: out_path, name, dependencies })
}

struct EsmEmitter<'a> {
    config: &'a BuildConfig,
    path: &'a str,
    located: &'a Located,
    analysis: &'a mut Analysis,
    /// Local object mirroring `exports` when the module reads it back.
    collector: Option<String>,
}

impl EsmEmitter<'_> {
    fn emit(
        &mut self,
        mut body: Vec<ModuleItem>,
        import_deps: &[ResolvedDependency],
        combo_deps: &[ResolvedDependency],
    ) -> Result<Vec<ModuleItem>> {
        let collector = if self.analysis.needs_collector() {
            let has_default = self.analysis.exports.iter().any(|e| e.shape.is_default())
                || self.analysis.combos.iter().any(|c| c.slot.is_default());
            if has_default {
                return Err(MzError::MultipleDefaultExports { path: self.path.to_string() });
            }
            Some(self.analysis.collector())
        } else {
            None
        };
        self.collector = collector.clone();

        let mut rewriter = SiteRewriter::new();
        for entry in &self.analysis.imports {
            let Some(site) = self.located.require(entry.site) else { continue };
            match &entry.shape {
                ImportShape::SubstituteDefaultIndirect { alias } => rewriter.replace_call(site.span, ident_expr(alias)),
                ImportShape::SubstituteNamedIndirect { alias, .. } => {
                    rewriter.replace_member_of_call(site.span, ident_expr(alias))
                }
                _ => {}
            }
        }
        if let Some(collector) = &collector {
            for entry in &self.analysis.exports {
                if entry.shape != ExportShape::SubstituteReference {
                    continue;
                }
                for site in self.located.exports_at(entry.anchor) {
                    rewriter.replace_export_ref(site.span, collector);
                }
            }
        }
        rewriter.rewrite(&mut body);

        let mut edits = Edits::new();
        if body.first().map_or(false, is_use_strict) {
            edits.remove(0);
        }

        let mut anchors: Vec<usize> = self
            .analysis
            .imports
            .iter()
            .map(|i| i.anchor)
            .chain(self.analysis.export_anchors())
            .collect();
        anchors.sort_unstable();
        anchors.dedup();

        for anchor in anchors {
            let Some(ModuleItem::Stmt(stmt)) = body.get(anchor) else { continue };
            let imports: Vec<(&ImportEntry, &ResolvedDependency)> = self
                .analysis
                .imports
                .iter()
                .zip(import_deps)
                .filter(|(i, _)| i.anchor == anchor)
                .collect();
            let combo = self.analysis.combos.iter().zip(combo_deps).find(|(c, _)| c.anchor == anchor);
            let export = self.analysis.exports.iter().find(|e| e.anchor == anchor).map(|e| &e.shape);
            if let Some(items) = self.rewrite_statement(stmt.clone(), &imports, combo, export)? {
                edits.replace(anchor, items);
            }
        }

        if let Some(collector) = &collector {
            let anchors = self.analysis.export_anchors();
            if let (Some(first), Some(last)) = (anchors.first(), anchors.last()) {
                edits.insert_before(*first, [empty_object_decl(collector)]);
                edits.insert_after(*last, [export_default_expr(ident_expr(collector))]);
            }
        }

        Ok(edits.apply(body))
    }

    /// Replacement items for one anchored statement, or `None` when the
    /// (already site-substituted) statement stays as it is.
    fn rewrite_statement(
        &self,
        stmt: Stmt,
        imports: &[(&ImportEntry, &ResolvedDependency)],
        combo: Option<(&ComboEntry, &ResolvedDependency)>,
        export: Option<&ExportShape>,
    ) -> Result<Option<Vec<ModuleItem>>> {
        let mut items = Vec::new();
        let mut remainder = Some(stmt);
        let mut trailing = Vec::new();
        let mut consumed_declarators = Vec::new();

        for (entry, dep) in imports {
            let src = dep.specifier.as_str();
            match &entry.shape {
                ImportShape::Bare => {
                    items.push(import_decl(vec![], src));
                    remainder = None;
                }
                ImportShape::Default { target, declarator } => {
                    items.push(import_decl(vec![import_default(target)], src));
                    consumed_declarators.push(*declarator);
                }
                ImportShape::Named { bindings, declarator } => {
                    let specifiers = bindings.iter().map(|b| import_named(&b.source, &b.target)).collect();
                    items.push(import_decl(specifiers, src));
                    consumed_declarators.push(*declarator);
                }
                ImportShape::DefaultIndirect { target, alias } => {
                    items.push(import_decl(vec![self.whole_module(alias)], src));
                    trailing.push(assign_stmt(target, ident_expr(alias)));
                    remainder = None;
                }
                ImportShape::NamedIndirect { bindings } => {
                    let specifiers = bindings.iter().map(|b| import_named(&b.source, &b.alias)).collect();
                    items.push(import_decl(specifiers, src));
                    trailing.extend(bindings.iter().map(|b| assign_stmt(&b.target, ident_expr(&b.alias))));
                    remainder = None;
                }
                ImportShape::SubstituteDefaultIndirect { alias } => {
                    items.push(import_decl(vec![self.whole_module(alias)], src));
                }
                ImportShape::SubstituteNamedIndirect { source, alias } => {
                    items.push(import_decl(vec![import_named(source, alias)], src));
                }
            }
        }

        if !consumed_declarators.is_empty() {
            remainder = remainder.and_then(|stmt| without_declarators(stmt, &consumed_declarators));
        }

        if let Some((combo, dep)) = combo {
            items.extend(self.combo(combo, &dep.specifier));
            remainder = None;
        }

        match export {
            None | Some(ExportShape::SubstituteReference) => {}
            Some(shape) => {
                let stmt = remainder.take().ok_or_else(|| self.unsupported_export())?;
                items.extend(self.export(shape, stmt)?);
                let local = match shape {
                    ExportShape::Named { source, .. } => Some(source),
                    ExportShape::NamedDeclaration { alias, .. } => Some(alias),
                    ExportShape::DestructuredDeclaration { target, .. } => Some(target),
                    ExportShape::Default | ExportShape::SubstituteReference => None,
                };
                if let (Some(target), Some(local)) = (shape.target(), local) {
                    items.extend(self.collect(target, local));
                }
            }
        }

        if imports.is_empty() && combo.is_none() && matches!(export, None | Some(ExportShape::SubstituteReference)) {
            return Ok(None);
        }
        items.extend(remainder.map(ModuleItem::Stmt));
        items.extend(trailing);
        Ok(Some(items))
    }

    fn whole_module(&self, local: &str) -> ImportSpecifier {
        if self.config.namespace_import {
            import_namespace(local)
        } else {
            import_default(local)
        }
    }

    /// `_exp.target = local;` while a collector is live.
    fn collect(&self, target: &str, local: &str) -> Option<ModuleItem> {
        let collector = self.collector.as_deref()?;
        Some(member_assign_stmt(collector, target, ident_expr(local)))
    }

    fn combo(&self, combo: &ComboEntry, src: &str) -> Vec<ModuleItem> {
        let alias = combo.alias.as_str();
        // re-exports bind nothing locally, so the collector needs the import form
        if self.config.export_default_from && self.collector.is_none() {
            return match (&combo.source, &combo.slot) {
                (Some(source), ExportSlot::Named(target)) => vec![export_named(&[(source, target)], Some(src))],
                (Some(source), ExportSlot::Default) => vec![export_named(&[(source, "default")], Some(src))],
                (None, ExportSlot::Named(target)) if self.config.namespace_import => {
                    vec![export_namespace_from(target, src)]
                }
                (None, ExportSlot::Named(target)) => vec![export_named(&[("default", target)], Some(src))],
                (None, ExportSlot::Default) if self.config.namespace_import => vec![
                    import_decl(vec![import_namespace(alias)], src),
                    export_default_expr(ident_expr(alias)),
                ],
                (None, ExportSlot::Default) => vec![export_named(&[("default", "default")], Some(src))],
            };
        }

        let import = match &combo.source {
            Some(source) => import_named(source, alias),
            None => self.whole_module(alias),
        };
        let mut items = vec![import_decl(vec![import], src)];
        match &combo.slot {
            ExportSlot::Default => items.push(export_default_expr(ident_expr(alias))),
            ExportSlot::Named(target) => {
                items.push(export_named(&[(alias, target)], None));
                items.extend(self.collect(target, alias));
            }
        }
        items
    }

    fn export(&self, shape: &ExportShape, stmt: Stmt) -> Result<Vec<ModuleItem>> {
        let assign = take_assignment(stmt).ok_or_else(|| self.unsupported_export())?;
        let items = match shape {
            ExportShape::Default => vec![export_default_expr(assign.right)],
            ExportShape::Named { source, target } => vec![export_named(&[(source, target)], None)],
            ExportShape::NamedDeclaration { target, alias } => vec![
                ModuleItem::Stmt(Stmt::Decl(Decl::Var(var_decl(
                    VarDeclKind::Let,
                    binding_pat(alias),
                    Some(assign.right),
                )))),
                export_named(&[(alias, target)], None),
            ],
            ExportShape::DestructuredDeclaration { prop, target } => {
                let Expr::Member(member) = *unwrap_owned(assign.right) else {
                    return Err(self.unsupported_export());
                };
                let pattern = Pat::Object(ObjectPat {
                    span: DUMMY_SP,
                    props: vec![destructure_prop(prop, target)],
                    optional: false,
                    type_ann: None,
                });
                vec![export_decl(Decl::Var(var_decl(VarDeclKind::Let, pattern, Some(member.obj))))]
            }
            ExportShape::SubstituteReference => vec![],
        };
        Ok(items)
    }

    fn unsupported_export(&self) -> MzError {
        MzError::export_form(self.path, "exports assignment in an unrecognized statement form")
    }
}

fn take_assignment(stmt: Stmt) -> Option<AssignExpr> {
    match stmt {
        Stmt::Expr(ExprStmt { expr, .. }) => match *unwrap_owned(expr) {
            Expr::Assign(assign) => Some(assign),
            _ => None,
        },
        _ => None,
    }
}

fn unwrap_owned(expr: Box<Expr>) -> Box<Expr> {
    match *expr {
        Expr::Paren(p) => unwrap_owned(p.expr),
        other => Box::new(other),
    }
}

/// `{ prop: target }`, shorthand when both names agree.
fn destructure_prop(prop: &str, target: &str) -> ObjectPatProp {
    if prop == target {
        return ObjectPatProp::Assign(AssignPatProp {
            span: DUMMY_SP,
            key: BindingIdent::from(ident(target)),
            value: None,
        });
    }
    let key = if is_valid_ident(prop) {
        PropName::Ident(IdentName::new(prop.into(), DUMMY_SP))
    } else {
        PropName::Str(str_lit(prop))
    };
    ObjectPatProp::KeyValue(KeyValuePatProp { key, value: Box::new(binding_pat(target)) })
}

// -----------------------------------------------------------------------------
// Index (barrel) module
// -----------------------------------------------------------------------------

/// One module re-exporting every entry of the dependency map under its name.
#[instrument(skip_all)]
pub fn build_esm_index(config: &BuildConfig, dep_map: &DependencyMap) -> Result<EsmBuild> {
    let mut body = Vec::new();
    let mut exported = Vec::new();
    let mut dependencies = IndexMap::new();

    for (key, name) in dep_map.iter() {
        if !is_valid_ident(name) {
            warn!(%key, name, "skipping index entry without a valid identifier name");
            continue;
        }
        let src = match &key {
            DepKey::Path(p) if config.mjs => rewrite_js_to_mjs(p),
            other => other.to_string(),
        };
        dependencies.insert(key.to_string(), name.to_string());

        if config.export_default_from {
            body.push(if config.namespace_import {
                export_namespace_from(name, &src)
            } else {
                export_named(&[("default", name)], Some(&src))
            });
        } else {
            let specifier = if config.namespace_import { import_namespace(name) } else { import_default(name) };
            body.push(import_decl(vec![specifier], &src));
            exported.push(name.to_string());
        }
    }
    if !exported.is_empty() {
        let pairs: Vec<(&String, &String)> = exported.iter().map(|n| (n, n)).collect();
        body.push(export_named(&pairs, None));
    }

    let cm: Lrc<SourceMap> = Default::default();
    let module = Module { span: DUMMY_SP, body, shebang: None };
    let code = print_module(&cm, None, &module)?;
    let path = if config.mjs { "./index.mjs" } else { "./index.js" };
    info!(entries = dependencies.len(), "built ESM index");
    Ok(EsmBuild { code, path: path.to_string(), name: config.index_name.clone(), dependencies })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(code: &str) -> String {
        code.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn esm(config: &BuildConfig, seed: &[(&str, &str)], code: &str) -> Result<EsmBuild> {
        let resolver = Resolver::new("/project");
        let mut names = NameAllocator::new();
        let mut map = DependencyMap::new();
        for (key, name) in seed {
            map.insert(&DepKey::Path(key.to_string()), *name);
        }
        build_esm(config, &resolver, "./m.js", code, &mut map, &mut names)
    }

    #[test]
    fn declarations_split_around_consumed_declarators() {
        let out = esm(
            &BuildConfig::default(),
            &[("./a.js", "A")],
            "var x = 1, a = require(\"./a.js\"), y = a;",
        )
        .unwrap();
        assert_eq!(squash(&out.code), "import a from \"./a.js\"; var x = 1, y = a;");
        assert_eq!(out.dependencies["./a.js"], "A");
    }

    #[test]
    fn substitution_keeps_statement() {
        let out = esm(
            &BuildConfig::default(),
            &[("./a.js", "A"), ("./b.js", "B")],
            "foo(require(\"./a.js\").x, require(\"./b.js\"));",
        )
        .unwrap();
        assert_eq!(
            squash(&out.code),
            "import { x as _imp } from \"./a.js\"; import * as _imp2 from \"./b.js\"; foo(_imp, _imp2);"
        );
    }

    #[test]
    fn export_declarations() {
        let out = esm(
            &BuildConfig::default(),
            &[],
            "exports.a = a;\nexports.b = 1 + 2;\nexports.c = obj.p;\nexports.d = obj.d;",
        )
        .unwrap();
        assert_eq!(
            squash(&out.code),
            "export { a }; let _exp = 1 + 2; export { _exp as b }; export let { p: c } = obj; export let { d } = obj;"
        );
    }

    #[test]
    fn collector_wraps_export_region() {
        let out = esm(&BuildConfig::default(), &[], "setup();\nexports.a = 1;\nfoo(exports);\ndone();").unwrap();
        assert_eq!(
            squash(&out.code),
            "setup(); var _exp = {}; let _exp2 = 1; export { _exp2 as a }; _exp.a = _exp2; foo(_exp); \
             export default _exp; done();"
        );
    }

    #[test]
    fn collector_conflicts_with_default_export() {
        let err = esm(&BuildConfig::default(), &[], "module.exports = a;\nfoo(module.exports);").unwrap_err();
        assert!(matches!(err, MzError::MultipleDefaultExports { .. }));
    }

    #[test]
    fn collector_sees_earlier_exports() {
        let out = esm(
            &BuildConfig::default(),
            &[("./dep.js", "Dep")],
            "exports.a = a;\nexports.b = 1;\nexports.c = obj.p;\nexports.d = require(\"./dep.js\").y;\n\
             var sum = exports.a + exports.b + exports.c + exports.d;",
        )
        .unwrap();
        assert_eq!(
            squash(&out.code),
            "var _exp = {}; export { a }; _exp.a = a; let _exp2 = 1; export { _exp2 as b }; _exp.b = _exp2; \
             export let { p: c } = obj; _exp.c = c; import { y as _imp } from \"./dep.js\"; \
             export { _imp as d }; _exp.d = _imp; var sum = _exp.a + _exp.b + _exp.c + _exp.d; export default _exp;"
        );
    }

    #[test]
    fn collector_conflicts_with_named_default() {
        let err = esm(&BuildConfig::default(), &[], "exports.default = x;\nfoo(exports);").unwrap_err();
        assert!(matches!(err, MzError::MultipleDefaultExports { .. }));

        let seed = [("./dep.js", "Dep")];
        let err = esm(&BuildConfig::default(), &seed, "exports.default = require(\"./dep.js\").y;\nfoo(exports);")
            .unwrap_err();
        assert!(matches!(err, MzError::MultipleDefaultExports { .. }));
    }

    #[test]
    fn combo_without_export_from() {
        let config = BuildConfig { export_default_from: false, ..BuildConfig::default() };
        let out = esm(&config, &[("./dep.js", "Dep")], "module.exports.x = require(\"./dep.js\").y;").unwrap();
        assert_eq!(squash(&out.code), "import { y as _imp } from \"./dep.js\"; export { _imp as x };");
    }

    #[test]
    fn whole_module_combos() {
        let seed = [("./dep.js", "Dep")];
        let out = esm(&BuildConfig::default(), &seed, "exports.ns = require(\"./dep.js\");").unwrap();
        assert_eq!(squash(&out.code), "export * as ns from \"./dep.js\";");

        let out = esm(&BuildConfig::default(), &seed, "module.exports = require(\"./dep.js\");").unwrap();
        assert_eq!(squash(&out.code), "import * as _imp from \"./dep.js\"; export default _imp;");

        let config = BuildConfig { namespace_import: false, ..BuildConfig::default() };
        let out = esm(&config, &seed, "module.exports = require(\"./dep.js\");").unwrap();
        assert_eq!(squash(&out.code), "export { default } from \"./dep.js\";");
    }

    #[test]
    fn strict_prologue_is_dropped() {
        let out = esm(&BuildConfig::default(), &[], "\"use strict\";\nfoo();").unwrap();
        assert_eq!(squash(&out.code), "foo();");
    }

    #[test]
    fn mjs_rewrites_specifiers_and_path() {
        let config = BuildConfig { mjs: true, ..BuildConfig::default() };
        let out = esm(&config, &[("./a.js", "A")], "var a = require(\"./a.js\");").unwrap();
        assert_eq!(squash(&out.code), "import a from \"./a.mjs\";");
        assert_eq!(out.path, "./m.mjs");
    }

    #[test]
    fn failed_build_leaves_map_untouched() {
        let resolver = Resolver::new("/project");
        let mut names = NameAllocator::new();
        let mut map = DependencyMap::new();
        let config = BuildConfig { ignore_unknown_dependency: true, ..BuildConfig::default() };
        let err = build_esm(
            &config,
            &resolver,
            "./m.js",
            "var a = require(\"./a.js\");\nvar b = require(\"./m.js\");",
            &mut map,
            &mut names,
        );
        assert!(matches!(err, Err(MzError::IllegalSelfReference { .. })));
        assert!(map.is_empty());
    }

    #[test]
    fn index_variants() {
        let mut map = DependencyMap::new();
        map.insert(&DepKey::Path("./a.js".into()), "A");
        map.insert(&DepKey::Name("lodash".into()), "_");
        map.insert(&DepKey::Path("./bad.js".into()), "not-valid");

        let out = build_esm_index(&BuildConfig::default(), &map).unwrap();
        assert_eq!(squash(&out.code), "export * as A from \"./a.js\"; export * as _ from \"lodash\";");
        assert_eq!(out.name, "Index");

        let config = BuildConfig { export_default_from: false, namespace_import: false, ..BuildConfig::default() };
        let out = build_esm_index(&config, &map).unwrap();
        assert_eq!(
            squash(&out.code),
            "import A from \"./a.js\"; import _ from \"lodash\"; export { A, _ };"
        );
    }
}
