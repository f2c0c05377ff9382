//! The composer: YAML event stream → composed node tree.
//!
//! Built on `yaml-rust2`'s marked event stream, like a plain parser, with
//! three composition-specific twists:
//!
//! - a plain (unquoted) scalar starting with `<<` is retagged as a merge
//!   instruction *before* generic tag resolution: a merge key must never
//!   be treated as ordinary data;
//! - an alias is never an error, even when its anchor has not been seen
//!   yet: it becomes an include placeholder carrying the anchor name, to
//!   be resolved once anchors have been fully indexed;
//! - scalars containing interpolation syntax become interpolable nodes,
//!   with their outermost spans pre-parsed.
//!
//! The parser events expose anchors by numeric id only; names are
//! recovered positionally from the scanner token stream.

use crate::composition::CompositionResult;
use crate::error::{Error, Result};
use crate::interp::{outermost_interpolation_exprs, transform_dollar_vars};
use crate::node::{
    IncludeNode, InterpolableNode, MappingNode, MergeNode, Node, ScalarNode, SequenceNode,
    BOOL_TAG, DEFAULT_MAP_TAG, DEFAULT_SEQ_TAG, DEFAULT_STR_TAG, FLOAT_TAG, INCLUDE_TAG, INT_TAG,
    NULL_TAG,
};
use confit_source_map::{FileId, Location, SourceInfo};
use std::collections::VecDeque;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser, Tag};
use yaml_rust2::scanner::{Marker, TScalarStyle, TokenType};

/// Options controlling composition.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Detect `<<`-style merge keys
    pub merging_enabled: bool,
    /// Detect `${...}` interpolation
    pub interpolation_enabled: bool,
    /// Rewrite `$VAR` shorthands to `${VAR}`
    pub shorthand_vars: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        ComposeOptions {
            merging_enabled: true,
            interpolation_enabled: true,
            shorthand_vars: true,
        }
    }
}

/// Compose a single document from a string.
pub fn compose_str(content: &str, file: Option<FileId>) -> Result<CompositionResult> {
    compose_str_with(content, file, &ComposeOptions::default())
}

/// Compose a single document with explicit options.
pub fn compose_str_with(
    content: &str,
    file: Option<FileId>,
    options: &ComposeOptions,
) -> Result<CompositionResult> {
    let (anchor_names, alias_names) = scan_names(content);
    let mut builder = Builder {
        file,
        options: options.clone(),
        stack: Vec::new(),
        root: None,
        error: None,
        anchor_names,
        alias_names,
    };

    let mut parser = Parser::new_from_str(content);
    parser.load(&mut builder, false).map_err(|e| {
        let marker = *e.marker();
        Error::Parse {
            message: e.to_string(),
            location: Some(source_from_marker(file, &marker, 0)),
        }
    })?;

    if let Some(error) = builder.error {
        return Err(error);
    }
    let root = builder.root.ok_or(Error::EmptyStream)?;
    Ok(CompositionResult::new(root))
}

/// Collect anchor-definition and alias-use names in document order.
///
/// The parser assigns numeric ids in the same order the scanner emits the
/// corresponding tokens, so popping names positionally reunites them with
/// their events.
fn scan_names(content: &str) -> (VecDeque<String>, VecDeque<String>) {
    let mut anchors = VecDeque::new();
    let mut aliases = VecDeque::new();
    let scanner = yaml_rust2::scanner::Scanner::new(content.chars());
    for token in scanner {
        match token.1 {
            TokenType::Anchor(name) => anchors.push_back(name),
            TokenType::Alias(name) => aliases.push_back(name),
            _ => {}
        }
    }
    (anchors, aliases)
}

enum BuildFrame {
    Sequence {
        tag: Option<String>,
        anchor: Option<String>,
        start: Location,
        items: Vec<Node>,
    },
    Mapping {
        tag: Option<String>,
        anchor: Option<String>,
        start: Location,
        entries: Vec<(Node, Option<Node>)>,
    },
}

struct Builder {
    file: Option<FileId>,
    options: ComposeOptions,
    stack: Vec<BuildFrame>,
    root: Option<Node>,
    error: Option<Error>,
    anchor_names: VecDeque<String>,
    alias_names: VecDeque<String>,
}

impl Builder {
    fn push_complete(&mut self, node: Node) {
        match self.stack.last_mut() {
            None => self.root = Some(node),
            Some(BuildFrame::Sequence { items, .. }) => items.push(node),
            Some(BuildFrame::Mapping { entries, .. }) => match entries.last_mut() {
                Some((_, value @ None)) => *value = Some(node),
                _ => entries.push((node, None)),
            },
        }
    }

    fn take_anchor(&mut self, anchor_id: usize) -> Option<String> {
        if anchor_id > 0 {
            self.anchor_names.pop_front()
        } else {
            None
        }
    }

    fn on_scalar(
        &mut self,
        value: String,
        style: TScalarStyle,
        anchor: Option<String>,
        tag: Option<&Tag>,
        marker: &Marker,
    ) {
        let source = source_from_marker(self.file, marker, value.len());
        let explicit_tag = tag.map(tag_to_string);

        // include references, before anything else looks at the value
        if explicit_tag.as_deref() == Some(INCLUDE_TAG) {
            self.push_complete(Node::Include(IncludeNode {
                reference: value,
                source,
                anchor,
                context: Default::default(),
            }));
            return;
        }

        // merge keys beat generic tag resolution
        if self.options.merging_enabled
            && style == TScalarStyle::Plain
            && value.starts_with("<<")
        {
            self.push_complete(Node::Merge(MergeNode {
                raw: value,
                source,
                anchor,
            }));
            return;
        }

        let resolved_tag =
            explicit_tag.unwrap_or_else(|| infer_scalar_tag(&value, style).to_string());

        if self.options.interpolation_enabled {
            let scan_value = if self.options.shorthand_vars {
                transform_dollar_vars(&value)
            } else {
                value.clone()
            };
            let scan_tag = if self.options.shorthand_vars {
                transform_dollar_vars(&resolved_tag)
            } else {
                resolved_tag.clone()
            };
            let value_spans = outermost_interpolation_exprs(&scan_value);
            let tag_spans = outermost_interpolation_exprs(&scan_tag);
            if !value_spans.is_empty() || !tag_spans.is_empty() {
                self.push_complete(Node::Interpolable(InterpolableNode {
                    raw: scan_value,
                    tag: scan_tag,
                    source,
                    anchor,
                    context: Default::default(),
                    spans: Some(value_spans),
                    ref_root: None,
                }));
                return;
            }
        }

        self.push_complete(Node::Scalar(ScalarNode {
            tag: resolved_tag,
            value,
            source,
            anchor,
        }));
    }
}

impl MarkedEventReceiver for Builder {
    fn on_event(&mut self, ev: Event, marker: Marker) {
        if self.error.is_some() {
            return;
        }
        match ev {
            Event::Nothing
            | Event::StreamStart
            | Event::StreamEnd
            | Event::DocumentStart
            | Event::DocumentEnd => {}

            Event::Scalar(value, style, anchor_id, tag) => {
                let anchor = self.take_anchor(anchor_id);
                self.on_scalar(value, style, anchor, tag.as_ref(), &marker);
            }

            Event::SequenceStart(anchor_id, tag) => {
                let anchor = self.take_anchor(anchor_id);
                self.stack.push(BuildFrame::Sequence {
                    tag: tag.as_ref().map(tag_to_string),
                    anchor,
                    start: location_from_marker(&marker),
                    items: Vec::new(),
                });
            }

            Event::SequenceEnd => {
                let frame = self.stack.pop().expect("SequenceEnd without SequenceStart");
                if let BuildFrame::Sequence {
                    tag,
                    anchor,
                    start,
                    items,
                } = frame
                {
                    let node = Node::Sequence(SequenceNode {
                        tag: tag.unwrap_or_else(|| DEFAULT_SEQ_TAG.to_string()),
                        items,
                        source: SourceInfo::spanning(
                            self.file,
                            start,
                            location_from_marker(&marker),
                        ),
                        anchor,
                    });
                    self.push_complete(node);
                } else {
                    self.error = Some(Error::InvalidStructure {
                        message: "sequence end without matching start".into(),
                        location: None,
                    });
                }
            }

            Event::MappingStart(anchor_id, tag) => {
                let anchor = self.take_anchor(anchor_id);
                self.stack.push(BuildFrame::Mapping {
                    tag: tag.as_ref().map(tag_to_string),
                    anchor,
                    start: location_from_marker(&marker),
                    entries: Vec::new(),
                });
            }

            Event::MappingEnd => {
                let frame = self.stack.pop().expect("MappingEnd without MappingStart");
                if let BuildFrame::Mapping {
                    tag,
                    anchor,
                    start,
                    entries,
                } = frame
                {
                    let mut pairs = Vec::with_capacity(entries.len());
                    for (key, value) in entries {
                        match value {
                            Some(value) => pairs.push((key, value)),
                            None => {
                                self.error = Some(Error::InvalidStructure {
                                    message: "mapping entry without value".into(),
                                    location: Some(key.source().clone()),
                                });
                                return;
                            }
                        }
                    }
                    match MappingNode::with_pairs(
                        tag.unwrap_or_else(|| DEFAULT_MAP_TAG.to_string()),
                        pairs,
                    ) {
                        Ok(mut mapping) => {
                            mapping.source = SourceInfo::spanning(
                                self.file,
                                start,
                                location_from_marker(&marker),
                            );
                            mapping.anchor = anchor;
                            self.push_complete(Node::Mapping(mapping));
                        }
                        Err(error) => self.error = Some(error),
                    }
                } else {
                    self.error = Some(Error::InvalidStructure {
                        message: "mapping end without matching start".into(),
                        location: None,
                    });
                }
            }

            Event::Alias(_anchor_id) => {
                // forward or backward, an alias becomes an include
                // placeholder carrying the anchor name
                let name = self.alias_names.pop_front().unwrap_or_default();
                let source = source_from_marker(self.file, &marker, name.len());
                self.push_complete(Node::Include(IncludeNode {
                    reference: name,
                    source,
                    anchor: None,
                    context: Default::default(),
                }));
            }
        }
    }
}

fn location_from_marker(marker: &Marker) -> Location {
    Location {
        offset: marker.index(),
        row: marker.line().saturating_sub(1),
        column: marker.col(),
    }
}

fn source_from_marker(file: Option<FileId>, marker: &Marker, len: usize) -> SourceInfo {
    SourceInfo::at(
        file,
        marker.index(),
        marker.line().saturating_sub(1),
        marker.col(),
        len,
    )
}

fn tag_to_string(tag: &Tag) -> String {
    if tag.handle == "!" {
        format!("!{}", tag.suffix)
    } else if tag.handle == "!!" || tag.handle == "tag:yaml.org,2002:" {
        format!("tag:yaml.org,2002:{}", tag.suffix)
    } else if tag.handle.is_empty() {
        tag.suffix.clone()
    } else {
        format!("{}{}", tag.handle, tag.suffix)
    }
}

/// Resolve the implicit tag of a plain scalar from its shape; quoted
/// scalars are always strings.
fn infer_scalar_tag(value: &str, style: TScalarStyle) -> &'static str {
    if style != TScalarStyle::Plain {
        return DEFAULT_STR_TAG;
    }
    match value {
        "null" | "Null" | "NULL" | "~" | "" => return NULL_TAG,
        "true" | "True" | "TRUE" | "false" | "False" | "FALSE" => return BOOL_TAG,
        _ => {}
    }
    if value.parse::<i64>().is_ok() {
        return INT_TAG;
    }
    if value.parse::<f64>().is_ok() {
        return FLOAT_TAG;
    }
    DEFAULT_STR_TAG
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_keypath::KeyPath;

    #[test]
    fn test_compose_scalar_types() {
        let comp = compose_str("a: 42\nb: true\nc: hello\nd: 3.5\ne: null", None).unwrap();
        let mapping = comp.root.as_mapping().unwrap();
        assert_eq!(mapping.get("a").unwrap().tag(), INT_TAG);
        assert_eq!(mapping.get("b").unwrap().tag(), BOOL_TAG);
        assert_eq!(mapping.get("c").unwrap().tag(), DEFAULT_STR_TAG);
        assert_eq!(mapping.get("d").unwrap().tag(), FLOAT_TAG);
        assert_eq!(mapping.get("e").unwrap().tag(), NULL_TAG);
    }

    #[test]
    fn test_quoted_scalar_stays_string() {
        let comp = compose_str("a: \"42\"", None).unwrap();
        let mapping = comp.root.as_mapping().unwrap();
        assert_eq!(mapping.get("a").unwrap().tag(), DEFAULT_STR_TAG);
    }

    #[test]
    fn test_merge_key_detected() {
        let comp = compose_str("a: 1\n<<{+<}: {b: 2}", None).unwrap();
        assert_eq!(comp.special.merges.len(), 1);
        let key_path = &comp.special.merges[0];
        assert!(key_path.is_mapping_key());
        let node = comp.get(key_path).unwrap();
        assert!(matches!(node, Node::Merge(m) if m.raw == "<<{+<}"));
    }

    #[test]
    fn test_quoted_merge_key_is_data() {
        let comp = compose_str("\"<<\": 1", None).unwrap();
        assert!(comp.special.merges.is_empty());
    }

    #[test]
    fn test_include_tag() {
        let comp = compose_str("sub: !include file:other.yaml", None).unwrap();
        assert_eq!(comp.special.includes.len(), 1);
        let node = comp.get(&KeyPath::parse("/sub")).unwrap();
        assert!(matches!(node, Node::Include(i) if i.reference == "file:other.yaml"));
    }

    #[test]
    fn test_alias_becomes_include_placeholder() {
        let comp = compose_str("base: &base\n  x: 1\nother: *base", None).unwrap();
        let node = comp.get(&KeyPath::parse("/other")).unwrap();
        assert!(matches!(node, Node::Include(i) if i.reference == "base"));
        assert_eq!(
            comp.anchor_paths.get("base"),
            Some(&KeyPath::parse("/base"))
        );
    }

    #[test]
    fn test_forward_alias_is_not_an_error() {
        let comp = compose_str("first: *late\nlate: &late 5", None).unwrap();
        let node = comp.get(&KeyPath::parse("/first")).unwrap();
        assert!(matches!(node, Node::Include(i) if i.reference == "late"));
    }

    #[test]
    fn test_interpolable_detection() {
        let comp = compose_str("v: ${1 + 2}", None).unwrap();
        assert_eq!(comp.special.interpolables.len(), 1);
        let node = comp.get(&KeyPath::parse("/v")).unwrap();
        match node {
            Node::Interpolable(i) => {
                assert_eq!(i.raw, "${1 + 2}");
                assert_eq!(i.spans.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected interpolable, got {:?}", other),
        }
    }

    #[test]
    fn test_dollar_shorthand_normalized() {
        let comp = compose_str("v: $HOME/config", None).unwrap();
        let node = comp.get(&KeyPath::parse("/v")).unwrap();
        assert!(matches!(node, Node::Interpolable(i) if i.raw == "${HOME}/config"));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let result = compose_str("a: 1\na: 2", None);
        assert!(matches!(result, Err(Error::DuplicateKey { .. })));
    }

    #[test]
    fn test_nested_structure_and_paths() {
        let comp = compose_str("outer:\n  items:\n    - 1\n    - 2", None).unwrap();
        let node = comp.get(&KeyPath::parse("/outer.items.1")).unwrap();
        assert!(matches!(node, Node::Scalar(s) if s.value == "2"));
    }

    #[test]
    fn test_source_locations_tracked() {
        let comp = compose_str("a: 1\nb: two", None).unwrap();
        let b = comp.get(&KeyPath::parse("/b")).unwrap();
        assert_eq!(b.source().range.start.row, 1);
        assert_eq!(b.source().range.start.column, 3);
    }

    #[test]
    fn test_anchor_on_nested_scalar() {
        let comp = compose_str("a:\n  b: &deep 1", None).unwrap();
        assert_eq!(
            comp.anchor_paths.get("deep"),
            Some(&KeyPath::parse("/a.b"))
        );
    }

    #[test]
    fn test_user_tag_kept() {
        let comp = compose_str("a: !custom 5", None).unwrap();
        let node = comp.get(&KeyPath::parse("/a")).unwrap();
        assert_eq!(node.tag(), "!custom");
    }

    #[test]
    fn test_deferred_tag_indexed() {
        let comp = compose_str("sub: !deferred\n  x: 1", None).unwrap();
        assert_eq!(comp.special.deferred.len(), 1);
        assert_eq!(comp.special.deferred[0], KeyPath::parse("/sub"));
    }
}
