use swc_core::{
    common::{
        comments::SingleThreadedComments, sync::Lrc, FileName, SourceMap, Span, SyntaxContext,
        DUMMY_SP,
    },
    ecma::{
        ast::*,
        codegen::{text_writer::JsWriter, Config as CodegenConfig, Emitter},
        parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax},
        visit::{VisitMut, VisitMutWith},
    },
};

use crate::error::{MzError, Result};

// -----------------------------------------------------------------------------
// Parse / print
// -----------------------------------------------------------------------------

/// A parsed CommonJS source, lifted into a module body so that emitters can
/// splice import/export declarations into it.
pub struct SourceModule {
    pub cm: Lrc<SourceMap>,
    pub comments: SingleThreadedComments,
    pub module: Module,
}

pub fn parse_module(path: &str, code: &str) -> Result<SourceModule> {
    let cm: Lrc<SourceMap> = Default::default();
    let comments = SingleThreadedComments::default();
    let fm = cm.new_source_file(FileName::Custom(path.to_string()).into(), code.to_string());

    let syntax = Syntax::Es(EsSyntax {
        export_default_from: true,
        allow_return_outside_function: true,
        ..Default::default()
    });
    let lexer = Lexer::new(syntax, EsVersion::Es2022, StringInput::from(&*fm), Some(&comments));
    let mut parser = Parser::new_from(lexer);

    // CommonJS is script code, not module code.
    let script = parser.parse_script().map_err(|err| MzError::Parse {
        path: path.to_string(),
        message: err.into_kind().msg().to_string(),
    })?;
    if let Some(err) = parser.take_errors().into_iter().next() {
        return Err(MzError::Parse {
            path: path.to_string(),
            message: err.into_kind().msg().to_string(),
        });
    }

    let module = Module {
        span: script.span,
        body: script.body.into_iter().map(ModuleItem::Stmt).collect(),
        shebang: script.shebang,
    };
    Ok(SourceModule { cm, comments, module })
}

pub fn print_module(cm: &Lrc<SourceMap>, comments: Option<&SingleThreadedComments>, module: &Module) -> Result<String> {
    let mut buf = Vec::new();
    {
        let mut emitter = Emitter {
            cfg: CodegenConfig::default(),
            cm: cm.clone(),
            comments: comments.map(|c| c as &dyn swc_core::common::comments::Comments),
            wr: JsWriter::new(cm.clone(), "\n", &mut buf, None),
        };
        emitter
            .emit_module(module)
            .map_err(|err| MzError::Codegen(err.to_string()))?;
    }
    String::from_utf8(buf).map_err(|err| MzError::Codegen(err.to_string()))
}

/// Parses one of the bundled wrapper skeletons. Spans are dropped so the nodes
/// can be mixed into trees from other source maps.
pub fn parse_template(name: &'static str, code: &str) -> Result<Module> {
    let mut parsed = parse_module(name, code).map_err(|_| MzError::Template(name))?;
    parsed.module.visit_mut_with(&mut DropSpans);
    Ok(parsed.module)
}

pub struct DropSpans;

impl VisitMut for DropSpans {
    fn visit_mut_span(&mut self, span: &mut Span) {
        *span = DUMMY_SP;
    }
}

pub fn is_use_strict(item: &ModuleItem) -> bool {
    match item {
        ModuleItem::Stmt(Stmt::Expr(ExprStmt { expr, .. })) => match &**expr {
            Expr::Lit(Lit::Str(s)) => &*s.value == "use strict",
            _ => false,
        },
        _ => false,
    }
}

pub fn unwrap_parens(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(p) => unwrap_parens(&p.expr),
        other => other,
    }
}

// -----------------------------------------------------------------------------
// Node builders
// -----------------------------------------------------------------------------

pub fn ident(sym: &str) -> Ident {
    Ident::new(sym.into(), DUMMY_SP, SyntaxContext::empty())
}

pub fn ident_expr(sym: &str) -> Box<Expr> {
    Box::new(Expr::Ident(ident(sym)))
}

pub fn str_lit(value: &str) -> Str {
    Str { span: DUMMY_SP, value: value.into(), raw: None }
}

pub fn str_expr(value: &str) -> Box<Expr> {
    Box::new(Expr::Lit(Lit::Str(str_lit(value))))
}

pub fn is_valid_ident(sym: &str) -> bool {
    Ident::verify_symbol(sym).is_ok()
}

pub fn module_export_name(sym: &str) -> ModuleExportName {
    if sym == "default" || is_valid_ident(sym) {
        ModuleExportName::Ident(ident(sym))
    } else {
        ModuleExportName::Str(str_lit(sym))
    }
}

/// `obj.prop`, or `obj["prop"]` when `prop` is not an identifier name.
fn member_prop(prop: &str) -> MemberProp {
    if is_valid_ident(prop) {
        MemberProp::Ident(IdentName::new(prop.into(), DUMMY_SP))
    } else {
        MemberProp::Computed(ComputedPropName { span: DUMMY_SP, expr: str_expr(prop) })
    }
}

pub fn member_expr(obj: Box<Expr>, prop: &str) -> Box<Expr> {
    Box::new(Expr::Member(MemberExpr { span: DUMMY_SP, obj, prop: member_prop(prop) }))
}

pub fn stmt_item(stmt: Stmt) -> ModuleItem {
    ModuleItem::Stmt(stmt)
}

pub fn expr_stmt(expr: Box<Expr>) -> ModuleItem {
    stmt_item(Stmt::Expr(ExprStmt { span: DUMMY_SP, expr }))
}

/// `target = value;`
pub fn assign_stmt(target: &str, value: Box<Expr>) -> ModuleItem {
    expr_stmt(Box::new(Expr::Assign(AssignExpr {
        span: DUMMY_SP,
        op: AssignOp::Assign,
        left: AssignTarget::Simple(SimpleAssignTarget::Ident(BindingIdent::from(ident(target)))),
        right: value,
    })))
}

/// `obj.prop = value;`, or `obj["prop"]` when `prop` is not an identifier.
pub fn member_assign_stmt(obj: &str, prop: &str, value: Box<Expr>) -> ModuleItem {
    let target = MemberExpr { span: DUMMY_SP, obj: ident_expr(obj), prop: member_prop(prop) };
    expr_stmt(Box::new(Expr::Assign(AssignExpr {
        span: DUMMY_SP,
        op: AssignOp::Assign,
        left: AssignTarget::Simple(SimpleAssignTarget::Member(target)),
        right: value,
    })))
}

pub fn var_decl(kind: VarDeclKind, name: Pat, init: Option<Box<Expr>>) -> Box<VarDecl> {
    Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        kind,
        declare: false,
        decls: vec![VarDeclarator { span: DUMMY_SP, name, init, definite: false }],
    })
}

pub fn binding_pat(sym: &str) -> Pat {
    Pat::Ident(BindingIdent::from(ident(sym)))
}

/// `var name = {};`
pub fn empty_object_decl(name: &str) -> ModuleItem {
    let init = Box::new(Expr::Object(ObjectLit { span: DUMMY_SP, props: vec![] }));
    stmt_item(Stmt::Decl(Decl::Var(var_decl(VarDeclKind::Var, binding_pat(name), Some(init)))))
}

pub fn return_stmt(arg: Box<Expr>) -> Stmt {
    Stmt::Return(ReturnStmt { span: DUMMY_SP, arg: Some(arg) })
}

pub fn import_decl(specifiers: Vec<ImportSpecifier>, src: &str) -> ModuleItem {
    ModuleItem::ModuleDecl(ModuleDecl::Import(ImportDecl {
        span: DUMMY_SP,
        specifiers,
        src: Box::new(str_lit(src)),
        type_only: false,
        with: None,
        phase: ImportPhase::Evaluation,
    }))
}

pub fn import_default(local: &str) -> ImportSpecifier {
    ImportSpecifier::Default(ImportDefaultSpecifier { span: DUMMY_SP, local: ident(local) })
}

pub fn import_namespace(local: &str) -> ImportSpecifier {
    ImportSpecifier::Namespace(ImportStarAsSpecifier { span: DUMMY_SP, local: ident(local) })
}

/// `{ source as local }`; a `default` source becomes a default specifier.
pub fn import_named(source: &str, local: &str) -> ImportSpecifier {
    if source == "default" {
        return import_default(local);
    }
    ImportSpecifier::Named(ImportNamedSpecifier {
        span: DUMMY_SP,
        local: ident(local),
        imported: (source != local).then(|| module_export_name(source)),
        is_type_only: false,
    })
}

/// `export { orig as exported, … } [from "src"];`
pub fn export_named<O: AsRef<str>, E: AsRef<str>>(pairs: &[(O, E)], src: Option<&str>) -> ModuleItem {
    let specifiers = pairs
        .iter()
        .map(|(orig, exported)| {
            let (orig, exported) = (orig.as_ref(), exported.as_ref());
            ExportSpecifier::Named(ExportNamedSpecifier {
                span: DUMMY_SP,
                orig: module_export_name(orig),
                exported: (orig != exported).then(|| module_export_name(exported)),
                is_type_only: false,
            })
        })
        .collect();
    ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(NamedExport {
        span: DUMMY_SP,
        specifiers,
        src: src.map(|s| Box::new(str_lit(s))),
        type_only: false,
        with: None,
    }))
}

/// `export * as name from "src";`
pub fn export_namespace_from(name: &str, src: &str) -> ModuleItem {
    ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(NamedExport {
        span: DUMMY_SP,
        specifiers: vec![ExportSpecifier::Namespace(ExportNamespaceSpecifier {
            span: DUMMY_SP,
            name: module_export_name(name),
        })],
        src: Some(Box::new(str_lit(src))),
        type_only: false,
        with: None,
    }))
}

pub fn export_default_expr(expr: Box<Expr>) -> ModuleItem {
    ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(ExportDefaultExpr { span: DUMMY_SP, expr }))
}

pub fn export_decl(decl: Decl) -> ModuleItem {
    ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl { span: DUMMY_SP, decl }))
}

/// `{ a, b, c }` as an expression.
pub fn shorthand_object(names: &[&str]) -> Box<Expr> {
    let props = names
        .iter()
        .map(|name| PropOrSpread::Prop(Box::new(Prop::Shorthand(ident(name)))))
        .collect();
    Box::new(Expr::Object(ObjectLit { span: DUMMY_SP, props }))
}

/// `{ "key": "value", … }` with string keys and values.
pub fn string_table<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Expr> {
    let props = entries
        .into_iter()
        .map(|(key, value)| {
            PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
                key: PropName::Str(str_lit(key)),
                value: str_expr(value),
            })))
        })
        .collect();
    Box::new(Expr::Object(ObjectLit { span: DUMMY_SP, props }))
}

pub fn param(sym: &str) -> Param {
    Param { span: DUMMY_SP, decorators: vec![], pat: binding_pat(sym) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_script() {
        let parsed = parse_module("a.js", "var a = require(\"./b.js\");\n").unwrap();
        assert_eq!(parsed.module.body.len(), 1);
        let out = print_module(&parsed.cm, None, &parsed.module).unwrap();
        assert!(out.contains("require(\"./b.js\")"));
    }

    #[test]
    fn top_level_return_is_allowed() {
        assert!(parse_module("a.js", "return 1;").is_ok());
    }

    #[test]
    fn reports_parse_errors() {
        let err = parse_module("bad.js", "var = ;").err().unwrap();
        assert!(matches!(err, MzError::Parse { ref path, .. } if path == "bad.js"));
    }

    #[test]
    fn recognises_strict_prologue() {
        let parsed = parse_module("a.js", "\"use strict\";\nfoo();").unwrap();
        assert!(is_use_strict(&parsed.module.body[0]));
        assert!(!is_use_strict(&parsed.module.body[1]));
    }

    #[test]
    fn builds_import_and_export_nodes() {
        let module = Module {
            span: DUMMY_SP,
            body: vec![
                import_decl(vec![import_named("v", "v4")], "./4.js"),
                export_named(&[("y", "x")], Some("./dep.js")),
                export_namespace_from("ns", "./ns.js"),
            ],
            shebang: None,
        };
        let cm: Lrc<SourceMap> = Default::default();
        let out = print_module(&cm, None, &module).unwrap();
        assert!(out.contains("import { v as v4 } from \"./4.js\";"));
        assert!(out.contains("export { y as x } from \"./dep.js\";"));
        assert!(out.contains("export * as ns from \"./ns.js\";"));
    }
}
