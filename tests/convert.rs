mod common;

use std::collections::HashSet;

use common::{config, squash, Project};
use moduloze::{build, DepKey, MzError};

#[test]
fn bare_import() {
    let mut project = Project::new(config(""), &["main.js", "a.js"]);
    let esm = project.esm("main.js", "require(\"./a.js\");").unwrap();
    assert_eq!(squash(&esm.code), "import \"./a.js\";");

    let umd = project.umd("main.js", "require(\"./a.js\");").unwrap();
    let name = &umd.table["./a.js"];
    assert!(squash(&umd.code).contains(&format!("function DEF({name}) {{}}")));
}

#[test]
fn destructured_require() {
    let mut project = Project::new(config(""), &["main.js", "11.js"]);
    let esm = project.esm("main.js", "var { v: v11 } = require(\"./11.js\");").unwrap();
    assert_eq!(squash(&esm.code), "import { v as v11 } from \"./11.js\";");
}

#[test]
fn bare_name_resolves_to_known_file() {
    let mut project = Project::new(config(""), &["main.js", "4.js"]);
    let esm = project.esm("main.js", "var v4 = require(\"4.js\").v;").unwrap();
    assert_eq!(squash(&esm.code), "import { v as v4 } from \"./4.js\";");
    assert!(esm.dependencies.contains_key("./4.js"));
}

#[test]
fn indirect_reassignment() {
    let mut project = Project::new(config(""), &["main.js", "6.js"]);
    let esm = project.esm("main.js", "var v6;\nv6 = require(\"./6.js\");").unwrap();
    assert_eq!(squash(&esm.code), "var v6; import * as _imp from \"./6.js\"; v6 = _imp;");

    let mut project = Project::new(config(r#"{ "namespaceImport": false }"#), &["main.js", "6.js"]);
    let esm = project.esm("main.js", "v6 = require(\"./6.js\");").unwrap();
    assert_eq!(squash(&esm.code), "import _imp from \"./6.js\"; v6 = _imp;");
}

#[test]
fn indirect_names_avoid_existing_bindings() {
    let mut project = Project::new(config(""), &["main.js", "6.js"]);
    let esm = project.esm("main.js", "var _imp = 1;\nx = require(\"./6.js\").y;").unwrap();
    assert_eq!(
        squash(&esm.code),
        "var _imp = 1; import { y as _imp2 } from \"./6.js\"; x = _imp2;"
    );
}

#[test]
fn combo_require_export() {
    let mut project = Project::new(config(""), &["main.js", "dep.js"]);
    let esm = project.esm("main.js", "module.exports.x = require(\"./dep.js\").y;").unwrap();
    assert_eq!(squash(&esm.code), "export { y as x } from \"./dep.js\";");

    let umd = project.umd("main.js", "module.exports.x = require(\"./dep.js\").y;").unwrap();
    let dep = &umd.table["./dep.js"];
    assert!(squash(&umd.code).contains(&format!("var _exp = {{}}; _exp.x = {dep}.y; return _exp;")));
}

#[test]
fn exports_read_back_agree_across_formats() {
    let code = "exports.a = 1;\nvar b = exports.a + 1;";
    let mut project = Project::new(config(""), &["main.js"]);
    let esm = project.esm("main.js", code).unwrap();
    assert_eq!(
        squash(&esm.code),
        "var _exp = {}; let _exp2 = 1; export { _exp2 as a }; _exp.a = _exp2; var b = _exp.a + 1; export default _exp;"
    );

    let umd = project.umd("main.js", code).unwrap();
    assert!(squash(&umd.code).contains("var _exp = {}; _exp.a = 1; var b = _exp.a + 1; return _exp;"));
}

#[test]
fn substitute_default_call() {
    let code = "require(\"./dep.js\").init();";
    let mut project = Project::new(config(""), &["main.js", "dep.js"]);
    let esm = project.esm("main.js", code).unwrap();
    assert_eq!(squash(&esm.code), "import * as _imp from \"./dep.js\"; _imp.init();");

    let umd = project.umd("main.js", code).unwrap();
    let dep = &umd.table["./dep.js"];
    let out = squash(&umd.code);
    assert!(out.contains(&format!("{dep}.init();")));
    assert!(!out.contains("require("));
}

#[test]
fn exports_parameter_is_left_alone() {
    let code = "var f = function (exports) { return exports.x; };\nexports.y = f;";
    let mut project = Project::new(config(""), &["main.js"]);
    let esm = project.esm("main.js", code).unwrap();
    let out = squash(&esm.code);
    assert!(out.contains("return exports.x;"));
    assert!(out.ends_with("export { f as y };"));

    let umd = project.umd("main.js", code).unwrap();
    let out = squash(&umd.code);
    assert!(out.contains("return exports.x;"));
    assert!(out.contains("_exp.y = f; return _exp;"));
}

#[test]
fn dynamic_require_is_rejected() {
    let mut project = Project::new(config(""), &["main.js"]);
    let before = project.map.clone();
    let err = project.esm("main.js", "require(moduleNameVar);").unwrap_err();
    assert!(matches!(err, MzError::UnsupportedRequireForm { .. }));
    assert_eq!(project.map, before);
}

#[test]
fn at_most_one_default_export() {
    let mut project = Project::new(config(""), &["main.js"]);
    let err = project
        .esm("main.js", "module.exports = function a() {};\nmodule.exports = function b() {};")
        .unwrap_err();
    assert!(matches!(err, MzError::MultipleDefaultExports { .. }));

    let esm = project.esm("main.js", "module.exports = function a() {};").unwrap();
    assert_eq!(squash(&esm.code), "export default function a() {};");
}

#[test]
fn self_reference_is_rejected() {
    let mut project = Project::new(config(""), &["lib/a.js"]);
    let err = project.umd("lib/a.js", "var me = require(\"./a.js\");").unwrap_err();
    assert!(matches!(err, MzError::IllegalSelfReference { .. }));
}

#[test]
fn unknown_dependencies() {
    let mut project = Project::new(config(""), &["main.js"]);
    let err = project.esm("main.js", "var x = require(\"./missing.js\");").unwrap_err();
    assert!(matches!(err, MzError::UnknownDependency { ref specifier, .. } if specifier == "./missing.js"));

    let mut project = Project::new(config(r#"{ "ignoreUnknownDependency": true }"#), &["main.js"]);
    project.esm("main.js", "var x = require(\"./missing.js\");").unwrap();
    assert!(project.map.contains(&DepKey::Path("./missing.js".to_string())));
}

#[test]
fn generated_names_are_unique_across_modules() {
    let mut project = Project::new(config(r#"{ "ignoreUnknownDependency": true }"#), &["a.js", "b.js"]);
    project
        .umd("a.js", "var x = require(\"./x.js\");\nvar l = require(\"left-pad\");")
        .unwrap();
    project
        .umd("b.js", "var y = require(\"./y.js\");\nvar l = require(\"left-pad\");\nvar x = require(\"./x.js\");")
        .unwrap();

    let names: Vec<&str> = project.map.iter().map(|(_, name)| name).collect();
    let unique: HashSet<&str> = names.iter().copied().collect();
    assert_eq!(names.len(), 5);
    assert_eq!(unique.len(), names.len());
}

#[test]
fn nested_modules_use_relative_specifiers() {
    let mut project = Project::new(config(""), &["lib/a.js", "b.js"]);
    let esm = project.esm("lib/a.js", "var b = require(\"../b.js\");").unwrap();
    assert_eq!(squash(&esm.code), "import b from \"../b.js\";");
    assert_eq!(esm.path, "./lib/a.js");

    let umd = project.umd("lib/a.js", "var b = require(\"../b.js\");").unwrap();
    assert!(umd.table.contains_key("../b.js"));
    assert!(umd.dependencies.contains_key("./b.js"));
}

#[test]
fn package_dependencies() {
    let mut project = Project::new(config(r#"{ "depMap": { "lodash": "_" } }"#), &["main.js"]);
    let code = "var _ = require(\"lodash\");\n_.noop();";
    let esm = project.esm("main.js", code).unwrap();
    assert_eq!(squash(&esm.code), "import _ from \"lodash\"; _.noop();");

    let umd = project.umd("main.js", code).unwrap();
    assert_eq!(umd.table["lodash"], "_");
    assert!(squash(&umd.code).contains("function DEF(_) { _.noop(); }"));
}

#[test]
fn build_produces_enabled_formats() {
    let config = config(r#"{ "buildUMD": true, ".mjs": true, "depMap": { "a.js": "A" } }"#);
    let mut project = Project::new(config, &["main.js"]);
    let out = build(
        &project.config,
        "main.js",
        "\"use strict\";\nvar a = require(\"./a.js\");\nexports.b = a.b;",
        &mut project.map,
        &mut project.names,
    )
    .unwrap();

    let esm = out.esm.unwrap();
    assert_eq!(esm.path, "./main.mjs");
    assert_eq!(squash(&esm.code), "import a from \"./a.mjs\"; export let { b } = a;");

    let umd = out.umd.unwrap();
    assert_eq!(umd.path, "./main.js");
    assert!(squash(&umd.code).contains("function DEF(A) { \"use strict\"; var a = A; var _exp = {}; _exp.b = a.b; return _exp; }"));
}
