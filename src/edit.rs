use std::collections::{BTreeMap, HashMap};

use swc_core::{
    common::Span,
    ecma::{
        ast::*,
        visit::{VisitMut, VisitMutWith},
    },
};

use crate::{locate::is_module_exports_member, syntax::ident};

// -----------------------------------------------------------------------------
// In-place site substitution
// -----------------------------------------------------------------------------

/// Swaps located `require(..)` calls and exports references, identified by
/// their source span, for replacement expressions.
#[derive(Default)]
pub struct SiteRewriter {
    calls: HashMap<Span, Box<Expr>>,
    /// `require(..).prop` as a whole; keyed by the call's span.
    members: HashMap<Span, Box<Expr>>,
    exports: HashMap<Span, String>,
}

impl SiteRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_call(&mut self, call: Span, with: Box<Expr>) {
        self.calls.insert(call, with);
    }

    pub fn replace_member_of_call(&mut self, call: Span, with: Box<Expr>) {
        self.members.insert(call, with);
    }

    pub fn replace_export_ref(&mut self, site: Span, collector: &str) {
        self.exports.insert(site, collector.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.members.is_empty() && self.exports.is_empty()
    }

    pub fn rewrite(mut self, body: &mut [ModuleItem]) {
        if self.is_empty() {
            return;
        }
        for item in body {
            item.visit_mut_with(&mut self);
        }
    }

    fn export_replacement(&self, span: Span) -> Option<Ident> {
        self.exports.get(&span).map(|name| ident(name))
    }
}

impl VisitMut for SiteRewriter {
    fn visit_mut_expr(&mut self, n: &mut Expr) {
        let replacement = match n {
            Expr::Call(call) => self.calls.get(&call.span).cloned(),
            Expr::Member(m) => match &*m.obj {
                Expr::Call(call) => self.members.get(&call.span).cloned(),
                _ if is_module_exports_member(m) => {
                    self.export_replacement(m.span).map(|i| Box::new(Expr::Ident(i)))
                }
                _ => None,
            },
            Expr::Ident(i) if &*i.sym == "exports" => {
                self.export_replacement(i.span).map(|i| Box::new(Expr::Ident(i)))
            }
            _ => None,
        };
        match replacement {
            Some(expr) => *n = *expr,
            None => n.visit_mut_children_with(self),
        }
    }

    fn visit_mut_simple_assign_target(&mut self, n: &mut SimpleAssignTarget) {
        let span = match n {
            SimpleAssignTarget::Ident(b) if &*b.id.sym == "exports" => Some(b.id.span),
            SimpleAssignTarget::Member(m) if is_module_exports_member(m) => Some(m.span),
            _ => None,
        };
        match span.and_then(|span| self.export_replacement(span)) {
            Some(collector) => *n = SimpleAssignTarget::Ident(BindingIdent::from(collector)),
            None => n.visit_mut_children_with(self),
        }
    }
}

// -----------------------------------------------------------------------------
// Pending edits
// -----------------------------------------------------------------------------

#[derive(Default)]
struct AnchorEdits {
    before: Vec<ModuleItem>,
    replacement: Option<Vec<ModuleItem>>,
    after: Vec<ModuleItem>,
}

/// Statement-level edits keyed by top-level anchor, applied in a single pass
/// that builds a new body. Indices always refer to the original body.
#[derive(Default)]
pub struct Edits {
    anchors: BTreeMap<usize, AnchorEdits>,
}

impl Edits {
    pub fn new() -> Self {
        Self::default()
    }

    fn at(&mut self, anchor: usize) -> &mut AnchorEdits {
        self.anchors.entry(anchor).or_default()
    }

    pub fn insert_before(&mut self, anchor: usize, items: impl IntoIterator<Item = ModuleItem>) {
        self.at(anchor).before.extend(items);
    }

    pub fn insert_after(&mut self, anchor: usize, items: impl IntoIterator<Item = ModuleItem>) {
        self.at(anchor).after.extend(items);
    }

    /// Repeated calls for one anchor accumulate.
    pub fn replace(&mut self, anchor: usize, items: impl IntoIterator<Item = ModuleItem>) {
        self.at(anchor).replacement.get_or_insert_with(Vec::new).extend(items);
    }

    pub fn remove(&mut self, anchor: usize) {
        self.replace(anchor, []);
    }

    pub fn is_replaced(&self, anchor: usize) -> bool {
        self.anchors.get(&anchor).map_or(false, |e| e.replacement.is_some())
    }

    pub fn apply(mut self, body: Vec<ModuleItem>) -> Vec<ModuleItem> {
        let mut out = Vec::with_capacity(body.len());
        for (anchor, item) in body.into_iter().enumerate() {
            match self.anchors.remove(&anchor) {
                Some(edits) => {
                    out.extend(edits.before);
                    match edits.replacement {
                        Some(items) => out.extend(items),
                        None => out.push(item),
                    }
                    out.extend(edits.after);
                }
                None => out.push(item),
            }
        }
        out
    }
}

/// Drops the given declarators; `None` when nothing is left of the statement.
pub fn without_declarators(stmt: Stmt, consumed: &[usize]) -> Option<Stmt> {
    match stmt {
        Stmt::Decl(Decl::Var(mut var)) => {
            var.decls = var
                .decls
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !consumed.contains(i))
                .map(|(_, d)| d)
                .collect();
            (!var.decls.is_empty()).then(|| Stmt::Decl(Decl::Var(var)))
        }
        other => Some(other),
    }
}
