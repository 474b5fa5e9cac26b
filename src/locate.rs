use std::collections::{HashMap, HashSet};

use swc_core::{
    common::{Span, Spanned},
    ecma::{
        ast::*,
        visit::{Visit, VisitWith},
    },
};

use crate::error::{MzError, Result};

// -----------------------------------------------------------------------------
// Site handles
// -----------------------------------------------------------------------------

/// Stable handle for a located `require(..)` call or exports reference. Nodes
/// are correlated with later passes through the side table, never by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId(pub u32);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequireHints {
    /// `require("x").prop` / `require("x")["prop"]`
    pub member: Option<String>,
    /// `require("x").prop(..)`
    pub member_is_callee: bool,
}

#[derive(Debug, Clone)]
pub struct RequireSite {
    pub id: SiteId,
    pub specifier: String,
    pub anchor: usize,
    pub span: Span,
    pub hints: RequireHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportRefKind {
    Assignment,
    Read,
}

#[derive(Debug, Clone)]
pub struct ExportSite {
    pub id: SiteId,
    pub anchor: usize,
    pub kind: ExportRefKind,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct Located {
    pub requires: Vec<RequireSite>,
    pub exports: Vec<ExportSite>,
    /// Every identifier spelled in the module; generated aliases avoid these.
    pub taken: HashSet<String>,
    by_span: HashMap<Span, SiteId>,
}

impl Located {
    pub fn requires_at(&self, anchor: usize) -> impl Iterator<Item = &RequireSite> + '_ {
        self.requires.iter().filter(move |r| r.anchor == anchor)
    }

    pub fn exports_at(&self, anchor: usize) -> impl Iterator<Item = &ExportSite> + '_ {
        self.exports.iter().filter(move |e| e.anchor == anchor)
    }

    pub fn require_anchors(&self) -> Vec<usize> {
        let mut anchors: Vec<_> = self.requires.iter().map(|r| r.anchor).collect();
        anchors.dedup();
        anchors
    }

    pub fn export_anchors(&self) -> Vec<usize> {
        let mut anchors: Vec<_> = self.exports.iter().map(|e| e.anchor).collect();
        anchors.sort_unstable();
        anchors.dedup();
        anchors
    }

    pub fn site_at(&self, span: Span) -> Option<SiteId> {
        self.by_span.get(&span).copied()
    }

    pub fn require(&self, id: SiteId) -> Option<&RequireSite> {
        self.requires.iter().find(|r| r.id == id)
    }

    pub fn export(&self, id: SiteId) -> Option<&ExportSite> {
        self.exports.iter().find(|e| e.id == id)
    }

    /// The located require call that `expr` is, if any.
    pub fn require_call(&self, expr: &Expr) -> Option<&RequireSite> {
        match expr {
            Expr::Call(call) => self.site_at(call.span).and_then(|id| self.require(id)),
            _ => None,
        }
    }

    /// The located exports reference that `expr` is, if any.
    pub fn export_ref(&self, expr: &Expr) -> Option<&ExportSite> {
        self.site_at(expr.span()).and_then(|id| self.export(id))
    }
}

// -----------------------------------------------------------------------------
// Predicates
// -----------------------------------------------------------------------------

pub fn is_require_callee(call: &CallExpr) -> bool {
    matches!(&call.callee, Callee::Expr(e) if matches!(&**e, Expr::Ident(i) if &*i.sym == "require"))
}

/// `module.exports` or `module["exports"]`
pub fn is_module_exports_member(m: &MemberExpr) -> bool {
    let obj_is_module = matches!(&*m.obj, Expr::Ident(i) if &*i.sym == "module");
    let prop_is_exports = match &m.prop {
        MemberProp::Ident(p) => &*p.sym == "exports",
        MemberProp::Computed(c) => matches!(&*c.expr, Expr::Lit(Lit::Str(s)) if &*s.value == "exports"),
        MemberProp::PrivateName(_) => false,
    };
    obj_is_module && prop_is_exports
}

/// Non-computed `.prop` or computed string-literal `["prop"]`.
pub fn simple_member_prop(prop: &MemberProp) -> Option<String> {
    match prop {
        MemberProp::Ident(p) => Some(p.sym.to_string()),
        MemberProp::Computed(c) => match &*c.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            _ => None,
        },
        MemberProp::PrivateName(_) => None,
    }
}

/// Whether a binding pattern introduces a name `exports`.
fn binds_exports(pat: &Pat) -> bool {
    match pat {
        Pat::Ident(b) => &*b.id.sym == "exports",
        Pat::Assign(a) => binds_exports(&a.left),
        Pat::Rest(r) => binds_exports(&r.arg),
        Pat::Array(a) => a.elems.iter().flatten().any(binds_exports),
        Pat::Object(o) => o.props.iter().any(|p| match p {
            ObjectPatProp::KeyValue(kv) => binds_exports(&kv.value),
            ObjectPatProp::Assign(a) => &*a.key.id.sym == "exports",
            ObjectPatProp::Rest(r) => binds_exports(&r.arg),
        }),
        _ => false,
    }
}

fn declares_exports(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| match s {
        Stmt::Decl(Decl::Var(v)) => v.decls.iter().any(|d| binds_exports(&d.name)),
        _ => false,
    })
}

fn require_specifier(call: &CallExpr) -> Option<String> {
    match call.args.as_slice() {
        [ExprOrSpread { spread: None, expr }] => match &**expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            _ => None,
        },
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// Locator
// -----------------------------------------------------------------------------

pub fn locate(path: &str, module: &Module) -> Result<Located> {
    let mut locator = Locator {
        path,
        out: Located::default(),
        hints: HashMap::new(),
        anchor: 0,
        depth: 0,
        shadowed: 0,
        assign_left: false,
        next_id: 0,
        error: None,
    };
    for (anchor, item) in module.body.iter().enumerate() {
        locator.anchor = anchor;
        match item {
            ModuleItem::Stmt(stmt) => stmt.visit_children_with(&mut locator),
            ModuleItem::ModuleDecl(decl) => decl.visit_children_with(&mut locator),
        }
        if let Some(err) = locator.error.take() {
            return Err(err);
        }
    }

    let Locator { mut out, hints, .. } = locator;
    for site in &mut out.requires {
        if let Some(h) = hints.get(&site.span) {
            site.hints = h.clone();
        }
    }
    Ok(out)
}

struct Locator<'a> {
    path: &'a str,
    out: Located,
    hints: HashMap<Span, RequireHints>,
    anchor: usize,
    /// Statements entered below the anchor.
    depth: usize,
    /// Functions entered that bind their own `exports`.
    shadowed: usize,
    assign_left: bool,
    next_id: u32,
    error: Option<MzError>,
}

impl Locator<'_> {
    fn fail(&mut self, err: MzError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn next_id(&mut self, span: Span) -> SiteId {
        let id = SiteId(self.next_id);
        self.next_id += 1;
        self.out.by_span.insert(span, id);
        id
    }

    fn record_export(&mut self, span: Span, kind: ExportRefKind) {
        if self.depth > 0 {
            self.fail(MzError::export_form(
                self.path,
                "exports expressions must be at the top-level of the program",
            ));
            return;
        }
        let id = self.next_id(span);
        self.out.exports.push(ExportSite { id, anchor: self.anchor, kind, span });
    }

    fn current_kind(&self) -> ExportRefKind {
        if self.assign_left {
            ExportRefKind::Assignment
        } else {
            ExportRefKind::Read
        }
    }

    fn nested<F: FnOnce(&mut Self)>(&mut self, shadows: bool, f: F) {
        self.depth += 1;
        self.shadowed += usize::from(shadows);
        self.with_assign_left(false, f);
        self.shadowed -= usize::from(shadows);
        self.depth -= 1;
    }

    fn with_assign_left<F: FnOnce(&mut Self)>(&mut self, value: bool, f: F) {
        let prev = self.assign_left;
        self.assign_left = value;
        f(self);
        self.assign_left = prev;
    }
}

impl Visit for Locator<'_> {
    fn visit_stmt(&mut self, n: &Stmt) {
        self.depth += 1;
        self.with_assign_left(false, |this| n.visit_children_with(this));
        self.depth -= 1;
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        if is_require_callee(n) {
            let Some(specifier) = require_specifier(n) else {
                self.fail(MzError::require_form(
                    self.path,
                    "require(..) statement without a single string-literal argument",
                ));
                return;
            };
            if self.depth > 0 {
                self.fail(MzError::require_form(
                    self.path,
                    format!("require({specifier:?}) must be at the top-level of the program"),
                ));
                return;
            }
            let id = self.next_id(n.span);
            self.out.requires.push(RequireSite {
                id,
                specifier,
                anchor: self.anchor,
                span: n.span,
                hints: RequireHints::default(),
            });
            return;
        }

        if let Callee::Expr(callee) = &n.callee {
            if let Expr::Member(m) = &**callee {
                if let Expr::Call(inner) = &*m.obj {
                    if is_require_callee(inner) {
                        self.hints.entry(inner.span).or_default().member_is_callee = true;
                    }
                }
            }
        }
        self.with_assign_left(false, |this| n.visit_children_with(this));
    }

    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if is_module_exports_member(n) {
            let kind = self.current_kind();
            self.record_export(n.span, kind);
            return;
        }
        if let Expr::Call(call) = &*n.obj {
            if is_require_callee(call) {
                if let Some(prop) = simple_member_prop(&n.prop) {
                    self.hints.entry(call.span).or_default().member = Some(prop);
                }
            }
        }
        n.obj.visit_with(self);
        if let MemberProp::Computed(c) = &n.prop {
            // x[exports] is not an exports reference
            if !matches!(&*c.expr, Expr::Ident(i) if &*i.sym == "exports") {
                self.with_assign_left(false, |this| c.visit_with(this));
            }
        }
    }

    fn visit_expr(&mut self, n: &Expr) {
        match n {
            // only a member chain keeps the assignment target
            Expr::Member(_) | Expr::Paren(_) | Expr::Ident(_) => n.visit_children_with(self),
            _ => self.with_assign_left(false, |this| n.visit_children_with(this)),
        }
    }

    fn visit_ident(&mut self, n: &Ident) {
        self.out.taken.insert(n.sym.to_string());
        if &*n.sym == "exports" && self.shadowed == 0 {
            let kind = self.current_kind();
            self.record_export(n.span, kind);
        }
    }

    fn visit_binding_ident(&mut self, n: &BindingIdent) {
        // declarations and parameters named `exports` are not references
        self.out.taken.insert(n.id.sym.to_string());
    }

    fn visit_fn_decl(&mut self, n: &FnDecl) {
        self.out.taken.insert(n.ident.sym.to_string());
        n.function.visit_with(self);
    }

    fn visit_fn_expr(&mut self, n: &FnExpr) {
        if let Some(id) = &n.ident {
            self.out.taken.insert(id.sym.to_string());
        }
        n.function.visit_with(self);
    }

    fn visit_class_decl(&mut self, n: &ClassDecl) {
        self.out.taken.insert(n.ident.sym.to_string());
        n.class.visit_with(self);
    }

    fn visit_function(&mut self, n: &Function) {
        let shadows = n.params.iter().any(|p| binds_exports(&p.pat))
            || n.body.as_ref().map_or(false, |b| declares_exports(&b.stmts));
        self.nested(shadows, |this| n.visit_children_with(this));
    }

    fn visit_arrow_expr(&mut self, n: &ArrowExpr) {
        let shadows = n.params.iter().any(binds_exports)
            || matches!(&*n.body, BlockStmtOrExpr::BlockStmt(b) if declares_exports(&b.stmts));
        self.nested(shadows, |this| n.visit_children_with(this));
    }

    fn visit_class(&mut self, n: &Class) {
        self.nested(false, |this| n.visit_children_with(this));
    }

    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        match &n.left {
            AssignTarget::Simple(SimpleAssignTarget::Ident(b))
                if &*b.id.sym == "exports" && self.shadowed == 0 =>
            {
                self.out.taken.insert(b.id.sym.to_string());
                self.record_export(b.id.span, ExportRefKind::Assignment);
            }
            AssignTarget::Simple(SimpleAssignTarget::Ident(b)) => {
                self.out.taken.insert(b.id.sym.to_string());
            }
            left => self.with_assign_left(true, |this| left.visit_with(this)),
        }
        self.with_assign_left(false, |this| n.right.visit_with(this));
    }

    fn visit_assign_pat(&mut self, n: &AssignPat) {
        n.left.visit_with(self);
        self.with_assign_left(false, |this| n.right.visit_with(this));
    }

    fn visit_assign_pat_prop(&mut self, n: &AssignPatProp) {
        self.out.taken.insert(n.key.id.sym.to_string());
        if let Some(value) = &n.value {
            self.with_assign_left(false, |this| value.visit_with(this));
        }
    }
}
