//! End-to-end pipeline tests: compose → resolve → construct.

use confit_compose::{Loader, Value};
use std::io::Write;

fn load(source: &str) -> Value {
    Loader::new().load_source(source, "<test>").unwrap()
}

#[test]
fn merge_key_document_resolves() {
    let value = load("a: 1\nb: 2\n<<{+<}: {b: 3, c: 4}");
    let map = value.as_mapping().unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(map["a"].as_i64(), Some(1));
    assert_eq!(map["b"].as_i64(), Some(3));
    assert_eq!(map["c"].as_i64(), Some(4));
}

#[test]
fn default_merge_key_keeps_existing() {
    let value = load("a: 1\nb: 2\n<<: {b: 9, c: 4}");
    let map = value.as_mapping().unwrap();
    assert_eq!(map["b"].as_i64(), Some(2));
    assert_eq!(map["c"].as_i64(), Some(4));
}

#[test]
fn interpolation_resolves_to_typed_value() {
    let value = load("value: ${1 + 2}");
    assert_eq!(value.as_mapping().unwrap()["value"].as_i64(), Some(3));
}

#[test]
fn keypath_reference_interpolation() {
    let value = load("x: 10\ny: \"${@/x} plus one\"");
    assert_eq!(
        value.as_mapping().unwrap()["y"].as_str(),
        Some("10 plus one")
    );
}

#[test]
fn anchor_alias_includes_do_not_alias_each_other() {
    let source = "\
base: &tmpl
  settings:
    x: 1
first: *tmpl
second: *tmpl
";
    let mut loader = Loader::new();
    let comp = loader.compose_source(source, "<test>").unwrap();

    // both stand-ins are fully expanded copies
    let first = comp
        .get(&confit_keypath::KeyPath::parse("/first.settings.x"))
        .unwrap();
    assert!(matches!(first, confit_compose::Node::Scalar(s) if s.value == "1"));

    // mutating one copy leaves the other untouched
    let mut comp = comp;
    comp.set_at(
        &confit_keypath::KeyPath::parse("/first.settings.x"),
        confit_compose::Node::Scalar(confit_yaml::ScalarNode::new(
            confit_yaml::INT_TAG,
            "99",
        )),
    )
    .unwrap();
    let second = comp
        .get(&confit_keypath::KeyPath::parse("/second.settings.x"))
        .unwrap();
    assert!(matches!(second, confit_compose::Node::Scalar(s) if s.value == "1"));
}

#[test]
fn merge_with_anchor_alias() {
    let source = "\
defaults: &defaults
  lr: 1
  epochs: 10
model:
  <<{+<}: *defaults
  lr: 5
";
    let value = load(source);
    let model = value.as_mapping().unwrap()["model"].as_mapping().unwrap();
    // the alias expands, then the merge applies with new-wins priority:
    // the merged-in defaults override the local value
    assert_eq!(model["epochs"].as_i64(), Some(10));
    assert_eq!(model["lr"].as_i64(), Some(1));
}

#[test]
fn file_include_with_subpath() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "model:\n  lr: 3\n  name: net").unwrap();

    let mut loader = Loader::new();
    loader.env.search_paths.push(dir.path().to_path_buf());

    let value = loader
        .load_source("sub: !include file:params.yaml@model.lr", "<test>")
        .unwrap();
    assert_eq!(value.as_mapping().unwrap()["sub"].as_i64(), Some(3));
}

#[test]
fn nested_file_includes_resolve_relative_to_their_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("outer.yaml"), "inner: !include file:inner.yaml").unwrap();
    std::fs::write(dir.path().join("inner.yaml"), "deep: 7").unwrap();

    let mut loader = Loader::new();
    loader.env.search_paths.push(dir.path().to_path_buf());
    let value = loader
        .load_source("top: !include file:outer.yaml", "<test>")
        .unwrap();
    let inner = value.as_mapping().unwrap()["top"].as_mapping().unwrap()["inner"]
        .as_mapping()
        .unwrap();
    assert_eq!(inner["deep"].as_i64(), Some(7));
}

#[test]
fn env_include() {
    std::env::set_var("CONFIT_PIPELINE_TEST_VALUE", "17");
    let value = load("port: !include env:CONFIT_PIPELINE_TEST_VALUE");
    assert_eq!(value.as_mapping().unwrap()["port"].as_i64(), Some(17));
}

#[test]
fn unknown_loader_fails() {
    let mut loader = Loader::new();
    let err = loader
        .load_source("x: !include nosuch:path", "<test>")
        .unwrap_err();
    assert!(matches!(
        err.kind,
        confit_compose::ErrorKind::UnknownLoader { ref name } if name == "nosuch"
    ));
}

#[test]
fn missing_file_error_carries_include_trace() {
    let mut loader = Loader::new();
    let err = loader
        .load_source("x: !include file:definitely_missing.yaml", "<test>")
        .unwrap_err();
    assert!(matches!(
        err.kind,
        confit_compose::ErrorKind::IncludeNotFound { .. }
    ));
    assert!(!err.trace.is_empty());
}

#[test]
fn define_binds_variable_and_disappears() {
    let value = load("!define scale: 3\nv: ${scale * 2}");
    let map = value.as_mapping().unwrap();
    assert!(!map.contains_key("scale"));
    assert_eq!(map["v"].as_i64(), Some(6));
}

#[test]
fn set_default_does_not_override() {
    let mut loader = Loader::new().with_context("scale", Value::Int(10));
    let value = loader
        .load_source("!set_default scale: 3\nv: ${scale}", "<test>")
        .unwrap();
    assert_eq!(value.as_mapping().unwrap()["v"].as_i64(), Some(10));
}

#[test]
fn if_shorthand_keeps_or_drops_content() {
    let kept = load("!if true:\n  a: 1\nb: 2");
    let map = kept.as_mapping().unwrap();
    assert_eq!(map["a"].as_i64(), Some(1));
    assert_eq!(map["b"].as_i64(), Some(2));

    let dropped = load("!if false:\n  a: 1\nb: 2");
    let map = dropped.as_mapping().unwrap();
    assert!(!map.contains_key("a"));
    assert_eq!(map["b"].as_i64(), Some(2));
}

#[test]
fn if_then_else_selects_branch() {
    let value = load("!if ${1 == 2}:\n  then:\n    x: 1\n  else:\n    x: 2");
    assert_eq!(value.as_mapping().unwrap()["x"].as_i64(), Some(2));
}

#[test]
fn each_expands_sequence_items() {
    let source = "\
items:
  - !each(i) ${range(3)}:
      - item_${i}
";
    let value = load(source);
    let items = value.as_mapping().unwrap()["items"].as_sequence().unwrap();
    let rendered: Vec<&str> = items.iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(rendered, vec!["item_0", "item_1", "item_2"]);
}

#[test]
fn each_expands_mapping_template_with_dynamic_keys() {
    let source = "\
!each(i) ${range(2)}:
  key_${i}: ${i * 10}
fixed: yes
";
    let value = load(source);
    let map = value.as_mapping().unwrap();
    assert_eq!(map["key_0"].as_i64(), Some(0));
    assert_eq!(map["key_1"].as_i64(), Some(10));
    assert!(map.contains_key("fixed"));
}

#[test]
fn generate_fans_out_documents() {
    let source = "\
name: !generate
  - alpha
  - beta
size: 1
";
    let mut loader = Loader::new();
    let values = loader.load_source_all(source, "<test>").unwrap();
    assert_eq!(values.len(), 2);
    let names: Vec<&str> = values
        .iter()
        .map(|v| v.as_mapping().unwrap()["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    for value in &values {
        assert_eq!(value.as_mapping().unwrap()["size"].as_i64(), Some(1));
    }
}

#[test]
fn independent_generators_produce_cartesian_product() {
    let source = "\
a: !generate [1, 2]
b: !generate [x, y]
";
    let mut loader = Loader::new();
    let values = loader.load_source_all(source, "<test>").unwrap();
    assert_eq!(values.len(), 4);
}

#[test]
fn unset_values_are_dropped() {
    let value = load("keep: 1\ngone: __!UNSET!__");
    let map = value.as_mapping().unwrap();
    assert!(map.contains_key("keep"));
    assert!(!map.contains_key("gone"));
}

#[test]
fn merge_consumes_unset_to_remove_keys() {
    let value = load("a: 1\nb: 2\n<<{+<}: {b: __!UNSET!__}");
    let map = value.as_mapping().unwrap();
    assert!(map.contains_key("a"));
    assert!(!map.contains_key("b"));
}

#[test]
fn in_memory_include_from_context() {
    let mut loader = Loader::new();
    let mut snippet = indexmap::IndexMap::new();
    snippet.insert("x".to_string(), Value::Int(5));
    loader.context.insert(
        "snippet".to_string(),
        Value::Mapping(snippet),
    );
    let value = loader
        .load_source("sub: !include $snippet", "<test>")
        .unwrap();
    assert_eq!(
        value.as_mapping().unwrap()["sub"].as_mapping().unwrap()["x"].as_i64(),
        Some(5)
    );
}

#[test]
fn absolute_include_within_document() {
    let value = load("shared:\n  x: 1\ncopy: !include /shared");
    let copy = value.as_mapping().unwrap()["copy"].as_mapping().unwrap();
    assert_eq!(copy["x"].as_i64(), Some(1));
}

#[test]
fn dollar_var_shorthand_in_values() {
    let mut loader = Loader::new().with_context("stage", Value::String("prod".into()));
    let value = loader.load_source("name: app-$stage", "<test>").unwrap();
    assert_eq!(value.as_mapping().unwrap()["name"].as_str(), Some("app-prod"));
}
