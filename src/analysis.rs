use std::collections::HashSet;

use swc_core::ecma::ast::*;
use tracing::debug;

use crate::{
    error::{MzError, Result},
    locate::{
        is_module_exports_member, simple_member_prop, ExportRefKind, ExportSite, Located,
        RequireSite, SiteId,
    },
    syntax::unwrap_parens,
};

// -----------------------------------------------------------------------------
// Local (per-module) generated identifiers
// -----------------------------------------------------------------------------

/// `_imp`, `_imp2`, `_imp3`, … skipping anything already spelled in the module.
#[derive(Debug, Default)]
pub struct LocalNames {
    taken: HashSet<String>,
}

impl LocalNames {
    pub fn new(taken: HashSet<String>) -> Self {
        Self { taken }
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    pub fn generate(&mut self, base: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = if n == 1 { format!("_{base}") } else { format!("_{base}{n}") };
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

// -----------------------------------------------------------------------------
// Shapes
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Property pulled off the dependency; `"default"` means the whole value.
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectBinding {
    pub source: String,
    pub target: String,
    pub alias: String,
}

/// Where a combo statement sends the required value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSlot {
    Default,
    Named(String),
}

impl ExportSlot {
    pub(crate) fn is_default(&self) -> bool {
        match self {
            ExportSlot::Default => true,
            ExportSlot::Named(name) => name == "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportShape {
    Bare,
    Default { target: String, declarator: usize },
    Named { bindings: Vec<Binding>, declarator: usize },
    DefaultIndirect { target: String, alias: String },
    NamedIndirect { bindings: Vec<IndirectBinding> },
    SubstituteDefaultIndirect { alias: String },
    /// The whole `require(..).source` member is swapped for the alias.
    SubstituteNamedIndirect { source: String, alias: String },
}

impl ImportShape {
    pub fn name(&self) -> &'static str {
        match self {
            ImportShape::Bare => "bare-import",
            ImportShape::Default { .. } => "default-import",
            ImportShape::Named { .. } => "named-import",
            ImportShape::DefaultIndirect { .. } => "default-import-indirect",
            ImportShape::NamedIndirect { .. } => "named-import-indirect",
            ImportShape::SubstituteDefaultIndirect { .. } => "substitute-default-import-indirect",
            ImportShape::SubstituteNamedIndirect { .. } => "substitute-named-import-indirect",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub site: SiteId,
    pub specifier: String,
    pub anchor: usize,
    pub shape: ImportShape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportShape {
    Default,
    Named { source: String, target: String },
    NamedDeclaration { target: String, alias: String },
    DestructuredDeclaration { prop: String, target: String },
    SubstituteReference,
}

impl ExportShape {
    pub fn name(&self) -> &'static str {
        match self {
            ExportShape::Default => "default-export",
            ExportShape::Named { .. } => "named-export",
            ExportShape::NamedDeclaration { .. } => "named-declaration-export",
            ExportShape::DestructuredDeclaration { .. } => "destructured-declaration-export",
            ExportShape::SubstituteReference => "substitute-module-exports-reference",
        }
    }

    pub(crate) fn target(&self) -> Option<&str> {
        match self {
            ExportShape::Named { target, .. }
            | ExportShape::NamedDeclaration { target, .. }
            | ExportShape::DestructuredDeclaration { target, .. } => Some(target),
            ExportShape::Default | ExportShape::SubstituteReference => None,
        }
    }

    pub(crate) fn is_default(&self) -> bool {
        match self {
            ExportShape::Default => true,
            other => other.target() == Some("default"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub site: SiteId,
    pub anchor: usize,
    pub shape: ExportShape,
}

/// One statement that both requires a dependency and re-exports it.
#[derive(Debug, Clone)]
pub struct ComboEntry {
    pub require: SiteId,
    pub export: SiteId,
    pub specifier: String,
    pub anchor: usize,
    /// `require(..).source`; `None` re-exports the whole module value.
    pub source: Option<String>,
    pub slot: ExportSlot,
    /// Binding used when the pair is emitted as an import plus an export.
    pub alias: String,
}

#[derive(Debug)]
pub struct Analysis {
    pub imports: Vec<ImportEntry>,
    pub exports: Vec<ExportEntry>,
    pub combos: Vec<ComboEntry>,
    pub names: LocalNames,
    collector: Option<String>,
}

impl Analysis {
    pub fn has_exports(&self) -> bool {
        !self.exports.is_empty() || !self.combos.is_empty()
    }

    pub fn needs_collector(&self) -> bool {
        self.exports.iter().any(|e| e.shape == ExportShape::SubstituteReference)
    }

    /// The single synthesized exports object for this module.
    pub fn collector(&mut self) -> String {
        if let Some(name) = &self.collector {
            return name.clone();
        }
        let name = self.names.generate("exp");
        self.collector = Some(name.clone());
        name
    }

    /// Every top-level statement index that carries an export (or combo).
    pub fn export_anchors(&self) -> Vec<usize> {
        let mut anchors: Vec<usize> = self
            .exports
            .iter()
            .map(|e| e.anchor)
            .chain(self.combos.iter().map(|c| c.anchor))
            .collect();
        anchors.sort_unstable();
        anchors.dedup();
        anchors
    }
}

// -----------------------------------------------------------------------------
// Classification
// -----------------------------------------------------------------------------

pub fn analyze(path: &str, module: &Module, located: &Located) -> Result<Analysis> {
    let mut names = LocalNames::new(located.taken.clone());

    let mut imports = Vec::new();
    let mut pending_combos = Vec::new();
    for anchor in located.require_anchors() {
        let sites: Vec<&RequireSite> = located.requires_at(anchor).collect();
        let stmt = anchor_stmt(module, anchor)?;
        classify_requires(path, stmt, &sites, located, &mut names, &mut imports, &mut pending_combos)?;
    }

    // collector first, so it claims `_exp`
    let any_read = located.exports.iter().any(|e| e.kind == ExportRefKind::Read);
    let collector = any_read.then(|| names.generate("exp"));

    let combo_anchors: HashSet<usize> = pending_combos.iter().map(|c| c.anchor).collect();
    let mut exports = Vec::new();
    for anchor in located.export_anchors() {
        if combo_anchors.contains(&anchor) {
            continue;
        }
        let sites: Vec<&ExportSite> = located.exports_at(anchor).collect();
        let stmt = anchor_stmt(module, anchor)?;
        exports.push(classify_export(path, stmt, &sites, located, &mut names)?);
    }

    // combo merge: the export half was skipped above and lives on in the entry
    let mut combos = Vec::new();
    for pending in pending_combos {
        debug!(specifier = %pending.specifier, anchor = pending.anchor, "combo require+export");
        combos.push(ComboEntry {
            alias: names.generate("imp"),
            ..pending
        });
    }

    let defaults = exports.iter().filter(|e| e.shape.is_default()).count()
        + combos.iter().filter(|c| c.slot.is_default()).count();
    if defaults > 1 {
        return Err(MzError::MultipleDefaultExports { path: path.to_string() });
    }

    let mut seen = HashSet::new();
    let targets = exports
        .iter()
        .filter_map(|e| e.shape.target())
        .chain(combos.iter().filter_map(|c| match &c.slot {
            ExportSlot::Named(name) => Some(name.as_str()),
            ExportSlot::Default => None,
        }));
    for target in targets {
        if !seen.insert(target.to_string()) {
            return Err(MzError::export_form(path, format!("duplicate export named '{target}'")));
        }
    }

    for entry in &imports {
        debug!(shape = entry.shape.name(), specifier = %entry.specifier, anchor = entry.anchor, "classified require");
    }
    for entry in &exports {
        debug!(shape = entry.shape.name(), anchor = entry.anchor, "classified export");
    }

    Ok(Analysis { imports, exports, combos, names, collector })
}

fn anchor_stmt(module: &Module, anchor: usize) -> Result<&Stmt> {
    match module.body.get(anchor) {
        Some(ModuleItem::Stmt(stmt)) => Ok(stmt),
        _ => Err(MzError::Codegen(format!("statement {anchor} is not a script statement"))),
    }
}

// ----  requires  -------------------------------------------------------------

fn classify_requires(
    path: &str,
    stmt: &Stmt,
    sites: &[&RequireSite],
    located: &Located,
    names: &mut LocalNames,
    imports: &mut Vec<ImportEntry>,
    combos: &mut Vec<ComboEntry>,
) -> Result<()> {
    let mut matched: Vec<(SiteId, ImportShape)> = Vec::new();
    let mut combo_site = None;

    if let Some(shape) = match_bare(stmt, sites, located) {
        matched.push(shape);
    } else if let Stmt::Decl(Decl::Var(var)) = stmt {
        matched.extend(match_declarators(path, var, located)?);
    } else if let Some(assign) = assign_stmt(stmt) {
        if let Some(combo) = match_combo(assign, located) {
            combo_site = Some(combo.require);
            combos.push(combo);
        } else {
            matched.extend(match_indirect(path, assign, located, names)?);
        }
    }

    for site in sites {
        let consumed = matched.iter().position(|(id, _)| *id == site.id);
        let shape = match consumed {
            Some(i) => matched.swap_remove(i).1,
            None if Some(site.id) == combo_site => continue,
            None => substitute(site, names),
        };
        imports.push(ImportEntry {
            site: site.id,
            specifier: site.specifier.clone(),
            anchor: site.anchor,
            shape,
        });
    }
    Ok(())
}

fn substitute(site: &RequireSite, names: &mut LocalNames) -> ImportShape {
    match &site.hints.member {
        Some(source) if !site.hints.member_is_callee => ImportShape::SubstituteNamedIndirect {
            source: source.clone(),
            alias: names.generate("imp"),
        },
        _ => ImportShape::SubstituteDefaultIndirect { alias: names.generate("imp") },
    }
}

fn assign_stmt(stmt: &Stmt) -> Option<&AssignExpr> {
    match stmt {
        Stmt::Expr(ExprStmt { expr, .. }) => match unwrap_parens(expr) {
            Expr::Assign(assign) if assign.op == AssignOp::Assign => Some(assign),
            _ => None,
        },
        _ => None,
    }
}

/// `require(..)` or `require(..).prop` / `require(..)["prop"]`.
fn require_access<'a>(expr: &Expr, located: &'a Located) -> Option<(&'a RequireSite, Option<String>)> {
    match unwrap_parens(expr) {
        call @ Expr::Call(_) => located.require_call(call).map(|site| (site, None)),
        Expr::Member(m) => {
            let site = located.require_call(unwrap_parens(&m.obj))?;
            let prop = simple_member_prop(&m.prop)?;
            Some((site, Some(prop)))
        }
        _ => None,
    }
}

fn match_bare(stmt: &Stmt, sites: &[&RequireSite], located: &Located) -> Option<(SiteId, ImportShape)> {
    let Stmt::Expr(ExprStmt { expr, .. }) = stmt else {
        return None;
    };
    let site = located.require_call(unwrap_parens(expr))?;
    (sites.len() == 1).then(|| (site.id, ImportShape::Bare))
}

fn match_declarators(path: &str, var: &VarDecl, located: &Located) -> Result<Vec<(SiteId, ImportShape)>> {
    let mut matched = Vec::new();
    for (declarator, decl) in var.decls.iter().enumerate() {
        let Some(init) = &decl.init else { continue };
        let Some((site, prop)) = require_access(init, located) else {
            continue;
        };
        let shape = match (&decl.name, prop) {
            (Pat::Ident(id), None) => ImportShape::Default { target: id.id.sym.to_string(), declarator },
            (Pat::Ident(id), Some(source)) => ImportShape::Named {
                bindings: vec![Binding { source, target: id.id.sym.to_string() }],
                declarator,
            },
            (Pat::Object(obj), None) => ImportShape::Named {
                bindings: object_pattern_bindings(path, obj, &site.specifier)?,
                declarator,
            },
            // `var { a } = require("x").b` and friends stay in place
            _ => continue,
        };
        matched.push((site.id, shape));
    }
    Ok(matched)
}

fn object_pattern_bindings(path: &str, obj: &ObjectPat, specifier: &str) -> Result<Vec<Binding>> {
    let unsupported = || {
        MzError::require_form(path, format!("destructuring pattern for require({specifier:?}) is too complex"))
    };
    if obj.props.is_empty() {
        return Err(unsupported());
    }
    obj.props
        .iter()
        .map(|prop| match prop {
            ObjectPatProp::KeyValue(kv) => {
                let source = match &kv.key {
                    PropName::Ident(i) => i.sym.to_string(),
                    PropName::Str(s) => s.value.to_string(),
                    _ => return Err(unsupported()),
                };
                match &*kv.value {
                    Pat::Ident(target) => Ok(Binding { source, target: target.id.sym.to_string() }),
                    _ => Err(unsupported()),
                }
            }
            ObjectPatProp::Assign(AssignPatProp { key, value: None, .. }) => Ok(Binding {
                source: key.id.sym.to_string(),
                target: key.id.sym.to_string(),
            }),
            _ => Err(unsupported()),
        })
        .collect()
}

fn match_indirect(
    path: &str,
    assign: &AssignExpr,
    located: &Located,
    names: &mut LocalNames,
) -> Result<Vec<(SiteId, ImportShape)>> {
    let Some((site, prop)) = require_access(&assign.right, located) else {
        return Ok(vec![]);
    };
    let shape = match (&assign.left, prop) {
        (AssignTarget::Simple(SimpleAssignTarget::Ident(id)), None) => ImportShape::DefaultIndirect {
            target: id.id.sym.to_string(),
            alias: names.generate("imp"),
        },
        (AssignTarget::Simple(SimpleAssignTarget::Ident(id)), Some(source)) => ImportShape::NamedIndirect {
            bindings: vec![IndirectBinding {
                source,
                target: id.id.sym.to_string(),
                alias: names.generate("imp"),
            }],
        },
        (AssignTarget::Pat(AssignTargetPat::Object(obj)), None) => ImportShape::NamedIndirect {
            bindings: object_pattern_bindings(path, obj, &site.specifier)?
                .into_iter()
                .map(|Binding { source, target }| IndirectBinding {
                    source,
                    target,
                    alias: names.generate("imp"),
                })
                .collect(),
        },
        _ => return Ok(vec![]),
    };
    Ok(vec![(site.id, shape)])
}

/// `module.exports[.x] = require(..)[.y]`
fn match_combo(assign: &AssignExpr, located: &Located) -> Option<ComboEntry> {
    let (site, source) = require_access(&assign.right, located)?;
    let (export, slot) = match &assign.left {
        AssignTarget::Simple(SimpleAssignTarget::Ident(id)) if &*id.id.sym == "exports" => {
            (located.site_at(id.id.span)?, ExportSlot::Default)
        }
        AssignTarget::Simple(SimpleAssignTarget::Member(m)) if is_module_exports_member(m) => {
            (located.site_at(m.span)?, ExportSlot::Default)
        }
        AssignTarget::Simple(SimpleAssignTarget::Member(m)) => {
            let export = export_ref_of(&m.obj, located)?;
            (export.id, ExportSlot::Named(simple_member_prop(&m.prop)?))
        }
        _ => return None,
    };
    Some(ComboEntry {
        require: site.id,
        export,
        specifier: site.specifier.clone(),
        anchor: site.anchor,
        source,
        slot,
        alias: String::new(),
    })
}

fn export_ref_of<'a>(expr: &Expr, located: &'a Located) -> Option<&'a ExportSite> {
    let expr = unwrap_parens(expr);
    let is_ref = match expr {
        Expr::Ident(i) => &*i.sym == "exports",
        Expr::Member(m) => is_module_exports_member(m),
        _ => false,
    };
    if is_ref {
        located.export_ref(expr)
    } else {
        None
    }
}

// ----  exports  --------------------------------------------------------------

fn classify_export(
    path: &str,
    stmt: &Stmt,
    sites: &[&ExportSite],
    located: &Located,
    names: &mut LocalNames,
) -> Result<ExportEntry> {
    let site = sites[0];
    let entry = |shape| ExportEntry { site: site.id, anchor: site.anchor, shape };

    if sites.iter().all(|s| s.kind == ExportRefKind::Read) {
        return Ok(entry(ExportShape::SubstituteReference));
    }

    let unsupported = || MzError::export_form(path, "exports assignment in an unrecognized statement form");
    if sites.len() != 1 {
        return Err(unsupported());
    }
    let assign = assign_stmt(stmt).ok_or_else(unsupported)?;

    // module.exports = …
    let left_is_site = match &assign.left {
        AssignTarget::Simple(SimpleAssignTarget::Ident(id)) => located.site_at(id.id.span) == Some(site.id),
        AssignTarget::Simple(SimpleAssignTarget::Member(m)) => {
            located.site_at(m.span) == Some(site.id)
        }
        _ => false,
    };
    if left_is_site {
        return Ok(entry(ExportShape::Default));
    }

    // module.exports.x = …
    let AssignTarget::Simple(SimpleAssignTarget::Member(m)) = &assign.left else {
        return Err(unsupported());
    };
    let on_site = export_ref_of(&m.obj, located).map(|s| s.id) == Some(site.id);
    let target = simple_member_prop(&m.prop).filter(|_| on_site).ok_or_else(unsupported)?;

    let shape = match unwrap_parens(&assign.right) {
        Expr::Ident(source) if &*source.sym != "undefined" => ExportShape::Named {
            source: source.sym.to_string(),
            target,
        },
        Expr::Member(rhs) => match simple_member_prop(&rhs.prop) {
            Some(prop) if target != "default" && !names.is_taken(&target) => {
                ExportShape::DestructuredDeclaration { prop, target }
            }
            _ => ExportShape::NamedDeclaration { target, alias: names.generate("exp") },
        },
        _ => ExportShape::NamedDeclaration { target, alias: names.generate("exp") },
    };
    Ok(entry(shape))
}
