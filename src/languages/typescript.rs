use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tracing::warn;
use tree_sitter::{Query, StreamingIterator};

use super::Extractor;
use crate::graph::{Edge, EdgeType, Node, NodeKind};
use crate::indexer::extractor::{
    file_node, is_constant_name, visibility, ExtractOptions, ExtractionOutput, FileExtraction,
};
use crate::indexer::parser::{end_line, has_child_kind, named_children, start_line, ParsedFile};

pub struct TypeScriptExtractor;

// Queries are tied to the grammar they were compiled for.
static TS_IMPORTS_QUERY: OnceCell<Query> = OnceCell::new();
static TSX_IMPORTS_QUERY: OnceCell<Query> = OnceCell::new();
static TS_CALLS_QUERY: OnceCell<Query> = OnceCell::new();
static TSX_CALLS_QUERY: OnceCell<Query> = OnceCell::new();

const IMPORTS_QUERY: &str = r#"
(import_statement source: (string) @source)
"#;

const CALLS_QUERY: &str = r#"
(call_expression
    function: [
        (identifier) @name
        (member_expression property: (_) @name)
    ]) @call
"#;

const FUNCTION_VALUE_KINDS: &[&str] = &["arrow_function", "function_expression", "function", "generator_function"];

const NESTED_SCOPE_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "function",
    "generator_function",
    "arrow_function",
    "method_definition",
    "class_declaration",
    "class",
];

impl Extractor for TypeScriptExtractor {
    fn name(&self) -> &'static str {
        "typescript"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["ts", "tsx", "js", "jsx"]
    }

    fn language(&self, ext: &str) -> tree_sitter::Language {
        if ext == "ts" {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        }
    }

    fn lang_label(&self, ext: &str) -> &'static str {
        match ext {
            "js" | "jsx" => "javascript",
            _ => "typescript",
        }
    }

    fn extract(&self, parsed: &ParsedFile<'_>, rel_path: &str, options: &ExtractOptions) -> ExtractionOutput {
        let ext = rel_path.rsplit('.').next().unwrap_or("");
        let lang = self.lang_label(ext);
        let file = file_node(rel_path, lang, parsed.source);

        let mut walker = TsWalker {
            parsed,
            fx: FileExtraction::new(file, lang, *options),
            function_spans: Vec::new(),
        };
        walker.walk();

        let language = self.language(ext);
        let tsx = ext != "ts";
        let imports_cell = if tsx { &TSX_IMPORTS_QUERY } else { &TS_IMPORTS_QUERY };
        if let Some(query) = cached_query(imports_cell, &language, IMPORTS_QUERY) {
            walker.collect_imports(query);
        }
        let calls_cell = if tsx { &TSX_CALLS_QUERY } else { &TS_CALLS_QUERY };
        if let Some(query) = cached_query(calls_cell, &language, CALLS_QUERY) {
            walker.collect_calls(query);
        }
        walker.fx.finish()
    }
}

fn cached_query(
    cell: &'static OnceCell<Query>,
    language: &tree_sitter::Language,
    source: &str,
) -> Option<&'static Query> {
    cell.get_or_try_init(|| Query::new(language, source))
        .map_err(|e| warn!("Invalid extractor query: {}", e))
        .ok()
}

struct Owner {
    id: String,
    name: String,
}

struct TsWalker<'p, 'src> {
    parsed: &'p ParsedFile<'src>,
    fx: FileExtraction,
    /// Byte ranges of registered functions and methods, for call attribution.
    function_spans: Vec<(usize, usize, String)>,
}

impl<'p, 'src> TsWalker<'p, 'src> {
    fn text(&self, node: &tree_sitter::Node) -> &'src str {
        self.parsed.node_text(node)
    }

    fn field_text(&self, node: &tree_sitter::Node, field: &str) -> Option<&'src str> {
        node.child_by_field_name(field).map(|n| self.text(&n))
    }

    /// Pre-order walk over the whole tree, declarations inside function bodies
    /// included.
    fn walk(&mut self) {
        let mut stack = vec![self.parsed.root_node()];
        while let Some(node) = stack.pop() {
            match node.kind() {
                "class_declaration" | "abstract_class_declaration" => self.visit_class(&node),
                "function_declaration" | "generator_function_declaration" => {
                    if let Some(name) = self.field_text(&node, "name") {
                        self.visit_function(&node, &node, name, None, Vec::new());
                    }
                }
                "variable_declarator" => self.visit_declarator(&node),
                _ => {}
            }
            let mut children = named_children(&node);
            children.reverse();
            stack.extend(children);
        }
    }

    fn visit_class(&mut self, node: &tree_sitter::Node) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };
        let bases = self.extends_names(node);
        let mut class = Node::new(
            NodeKind::Class,
            self.fx.rel_path(),
            Some(name.to_string()),
            Some(start_line(node)),
            Some(end_line(node)),
        );
        if self.fx.enrich() {
            class = class.with_doc(json!({
                "lang": self.fx.lang(),
                "bases": bases,
                "visibility": visibility(name),
            }));
        }
        for base in &bases {
            let dst = self.fx.lookup(base).unwrap_or(base.as_str()).to_string();
            self.fx.add_edge(Edge::new(class.node_id.clone(), dst, EdgeType::Inherit, base.as_str()));
        }
        let file_id = self.fx.file_id().to_string();
        let owner = Owner {
            id: self.fx.add_symbol(class, &file_id),
            name: name.to_string(),
        };

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut decorators = Vec::new();
        for member in named_children(&body) {
            match member.kind() {
                "decorator" => {
                    decorators.push(self.text(&member).trim_start_matches('@').trim().to_string());
                }
                "method_definition" | "method_signature" | "abstract_method_signature" => {
                    let pending = std::mem::take(&mut decorators);
                    if let Some(method_name) = self.field_text(&member, "name") {
                        self.visit_function(&member, &member, method_name, Some(&owner), pending);
                    }
                }
                _ => decorators.clear(),
            }
        }
    }

    fn extends_names(&self, class: &tree_sitter::Node) -> Vec<String> {
        let mut names = Vec::new();
        for heritage in named_children(class).iter().filter(|c| c.kind() == "class_heritage") {
            for clause in named_children(heritage).iter().filter(|c| c.kind() == "extends_clause") {
                let mut cursor = clause.walk();
                for value in clause.children_by_field_name("value", &mut cursor) {
                    let name = match value.kind() {
                        "member_expression" => self.field_text(&value, "property"),
                        _ => Some(self.text(&value)),
                    };
                    if let Some(name) = name {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names
    }

    fn visit_declarator(&mut self, node: &tree_sitter::Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        if name_node.kind() != "identifier" {
            return;
        }
        let name = self.text(&name_node);
        match node.child_by_field_name("value") {
            Some(value) if FUNCTION_VALUE_KINDS.contains(&value.kind()) => {
                self.visit_function(node, &value, name, None, Vec::new());
            }
            _ if is_constant_name(name) => {
                let constant = Node::new(
                    NodeKind::Const,
                    self.fx.rel_path(),
                    Some(name.to_string()),
                    Some(start_line(node)),
                    Some(end_line(node)),
                );
                let file_id = self.fx.file_id().to_string();
                self.fx.add_symbol(constant, &file_id);
            }
            _ => {}
        }
    }

    /// Registers a function or method. `span` sets the node's lines; `function`
    /// carries the parameters, body and modifiers.
    fn visit_function(
        &mut self,
        span: &tree_sitter::Node,
        function: &tree_sitter::Node,
        name: &str,
        owner: Option<&Owner>,
        decorators: Vec<String>,
    ) {
        let params_node = function
            .child_by_field_name("parameters")
            .or_else(|| function.child_by_field_name("parameter"));
        let signature = match params_node {
            Some(p) if p.kind() == "formal_parameters" => collapse_whitespace(self.text(&p)),
            Some(p) => format!("({})", self.text(&p)),
            None => "()".to_string(),
        };
        let returns = self
            .field_text(function, "return_type")
            .map(|t| t.trim_start_matches(':').trim().to_string());
        let is_async = has_child_kind(function, "async");
        let is_generator = function.kind().contains("generator") || has_child_kind(function, "*");

        let kind = if owner.is_some() { NodeKind::Block } else { NodeKind::Func };
        let mut func = Node::new(
            kind,
            self.fx.rel_path(),
            Some(name.to_string()),
            Some(start_line(span)),
            Some(end_line(span)),
        )
        .with_signature(signature);

        self.fx.stats.funcs_total += 1;
        if self.fx.enrich() {
            let params = params_node.map(|p| self.parse_params(&p)).unwrap_or_default();
            let mut raises = Vec::new();
            if let Some(body) = function.child_by_field_name("body") {
                self.collect_throws(&body, &mut raises);
            }

            let stats = &mut self.fx.stats;
            if params_node.is_some() {
                stats.funcs_with_params += 1;
            }
            if returns.is_some() {
                stats.funcs_with_returns += 1;
            }
            if !raises.is_empty() {
                stats.funcs_with_raises += 1;
                stats.raises_extracted_total += raises.len();
            }
            if !decorators.is_empty() {
                stats.funcs_with_decorators += 1;
            }

            let mut doc = json!({
                "lang": self.fx.lang(),
                "params": params,
                "returns": returns,
                "raises": raises,
                "decorators": decorators,
                "visibility": self.member_visibility(function, name),
                "is_async": is_async,
                "flags": { "async": is_async, "generator": is_generator },
                "is_method": owner.is_some(),
            });
            if let Some(owner) = owner {
                doc["owner"] = json!(owner.name);
            }
            func = func.with_doc(doc);
        }

        let parent_id = owner.map_or_else(|| self.fx.file_id().to_string(), |o| o.id.clone());
        let id = self.fx.add_symbol(func, &parent_id);
        self.function_spans.push((span.start_byte(), span.end_byte(), id));
    }

    fn member_visibility(&self, function: &tree_sitter::Node, name: &str) -> &'static str {
        let modifier = named_children(function)
            .into_iter()
            .find(|c| c.kind() == "accessibility_modifier")
            .map(|m| self.text(&m));
        match modifier {
            Some("private") => "private",
            Some("protected") => "protected",
            Some(_) => "public",
            None if name.starts_with('#') => "private",
            None => visibility(name),
        }
    }

    fn parse_params(&self, params: &tree_sitter::Node) -> Vec<Value> {
        if params.kind() == "identifier" {
            return vec![json!({ "name": self.text(params), "kind": "param" })];
        }
        named_children(params)
            .iter()
            .filter_map(|param| {
                let (pattern, default) = match param.kind() {
                    "required_parameter" | "optional_parameter" => (
                        param.child_by_field_name("pattern")?,
                        self.field_text(param, "value"),
                    ),
                    "assignment_pattern" => (
                        param.child_by_field_name("left")?,
                        self.field_text(param, "right"),
                    ),
                    "identifier" | "rest_pattern" => (*param, None),
                    _ => return None,
                };
                let (name, kind) = if pattern.kind() == "rest_pattern" {
                    (self.text(&pattern).trim_start_matches("...").trim(), "rest")
                } else if param.kind() == "optional_parameter" {
                    (self.text(&pattern), "optional")
                } else {
                    (self.text(&pattern), "param")
                };
                let mut value = json!({ "name": name, "kind": kind });
                if let Some(annotation) = self.field_text(param, "type") {
                    value["type"] = json!(annotation.trim_start_matches(':').trim());
                }
                if let Some(default) = default {
                    value["default"] = json!(default);
                }
                Some(value)
            })
            .collect()
    }

    fn collect_throws(&self, node: &tree_sitter::Node, out: &mut Vec<String>) {
        for child in named_children(node) {
            if NESTED_SCOPE_KINDS.contains(&child.kind()) {
                continue;
            }
            if child.kind() == "throw_statement" {
                if let Some(thrown) = child.named_child(0) {
                    let name = match thrown.kind() {
                        "new_expression" => self.field_text(&thrown, "constructor"),
                        "call_expression" => self.field_text(&thrown, "function"),
                        _ => Some(self.text(&thrown)),
                    };
                    if let Some(name) = name {
                        out.push(name.to_string());
                    }
                }
            }
            self.collect_throws(&child, out);
        }
    }

    fn collect_imports(&mut self, query: &Query) {
        let mut sources = Vec::new();
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, self.parsed.root_node(), self.parsed.source.as_bytes());
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let source = self.text(&capture.node).trim_matches(|c| c == '"' || c == '\'' || c == '`');
                if !source.is_empty() {
                    sources.push(source.to_string());
                }
            }
        }
        let file_id = self.fx.file_id().to_string();
        for source in sources {
            self.fx.add_edge(Edge::new(file_id.clone(), source.clone(), EdgeType::Import, source));
        }
    }

    /// Attributes each call to the smallest registered function enclosing it.
    /// Calls outside any function are ignored.
    fn collect_calls(&mut self, query: &Query) {
        let mut calls = Vec::new();
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, self.parsed.root_node(), self.parsed.source.as_bytes());
        while let Some(m) = matches.next() {
            let mut name = None;
            let mut call = None;
            for capture in m.captures {
                match query.capture_names()[capture.index as usize] {
                    "name" => name = Some(capture.node),
                    "call" => call = Some(capture.node),
                    _ => {}
                }
            }
            let (Some(name), Some(call)) = (name, call) else {
                continue;
            };
            let Some(caller) = self.enclosing_function(call.start_byte()) else {
                continue;
            };
            let display = call
                .child_by_field_name("function")
                .map(|f| self.text(&f))
                .unwrap_or_else(|| self.text(&name));
            calls.push((
                caller.to_string(),
                self.text(&name),
                display,
                start_line(&call),
                self.text(&call),
            ));
        }
        for (caller, name, display, line, snippet) in calls {
            self.fx.record_call(&caller, name, display, line, snippet);
        }
    }

    fn enclosing_function(&self, byte: usize) -> Option<&str> {
        self.function_spans
            .iter()
            .filter(|(start, end, _)| *start <= byte && byte < *end)
            .min_by_key(|(start, end, _)| end - start)
            .map(|(_, _, id)| id.as_str())
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CalleeRef;
    use crate::indexer::extractor::extract_source;

    const LOADER_TS: &str = r#"import { readFile } from "fs/promises";
import * as path from 'path';

export const MAX_RETRIES = 3;
const timeoutMs = 100;

export class Loader extends BaseLoader {
  private cache = new Map();

  async load(file: string, ...rest: string[]): Promise<string> {
    const text = await readFile(path.join(file));
    return this.parse(text);
  }

  parse(text: string, strict?: boolean) {
    if (!text) {
      throw new Error("empty");
    }
    return JSON.parse(text);
  }
}

export function* walk(root = ".") {
  yield root;
}

export const loadConfig = async (file: string) => {
  const loader = new Loader();
  return loader.load(file);
};
"#;

    fn extract(path: &str, source: &str, enrich: bool) -> ExtractionOutput {
        extract_source(
            &TypeScriptExtractor,
            path,
            source,
            &ExtractOptions {
                enrich,
                callsite_cap: 200,
            },
        )
    }

    fn find<'a>(out: &'a ExtractionOutput, symbol: &str) -> &'a Node {
        out.nodes
            .iter()
            .find(|n| n.symbol.as_deref() == Some(symbol))
            .unwrap()
    }

    fn calls_from<'a>(out: &'a ExtractionOutput, src: &str) -> Vec<(&'a str, &'a str)> {
        out.edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Call && e.src == src)
            .map(|e| (e.dst.as_str(), e.detail.as_deref().unwrap_or("")))
            .collect()
    }

    #[test]
    fn test_extracts_structure() {
        let out = extract("web/loader.ts", LOADER_TS, false);
        let symbols: Vec<(NodeKind, &str)> = out.nodes.iter().map(|n| (n.kind, n.symbol_or_empty())).collect();
        assert_eq!(
            symbols,
            vec![
                (NodeKind::File, "loader.ts"),
                (NodeKind::Const, "MAX_RETRIES"),
                (NodeKind::Class, "Loader"),
                (NodeKind::Block, "load"),
                (NodeKind::Block, "parse"),
                (NodeKind::Func, "walk"),
                (NodeKind::Func, "loadConfig"),
            ]
        );
        assert!(out.nodes.iter().all(|n| n.lang == "typescript"));

        let loader = find(&out, "Loader");
        assert_eq!((loader.start_line, loader.end_line), (Some(7), Some(21)));
        assert_eq!(find(&out, "load").parent_id.as_deref(), Some(loader.node_id.as_str()));
        assert_eq!(
            find(&out, "load").signature.as_deref(),
            Some("(file: string, ...rest: string[])")
        );

        let load_config = find(&out, "loadConfig");
        assert_eq!((load_config.start_line, load_config.end_line), (Some(27), Some(30)));
        assert_eq!(load_config.parent_id.as_deref(), Some(out.nodes[0].node_id.as_str()));
    }

    #[test]
    fn test_extracts_edges() {
        let out = extract("web/loader.ts", LOADER_TS, false);
        let imports: Vec<&str> = out
            .edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Import)
            .map(|e| e.dst.as_str())
            .collect();
        assert_eq!(imports, vec!["fs/promises", "path"]);

        let inherits: Vec<&str> = out
            .edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Inherit)
            .map(|e| e.dst.as_str())
            .collect();
        assert_eq!(inherits, vec!["BaseLoader"]);

        let load = find(&out, "load");
        let parse = find(&out, "parse");
        assert_eq!(
            calls_from(&out, &load.node_id),
            vec![
                ("join", "join"),
                (parse.node_id.as_str(), "parse"),
                ("readFile", "readFile"),
            ]
        );
        assert_eq!(
            calls_from(&out, &find(&out, "loadConfig").node_id),
            vec![(load.node_id.as_str(), "load")]
        );
        assert!(calls_from(&out, &find(&out, "walk").node_id).is_empty());
    }

    #[test]
    fn test_enrichment_metadata() {
        let out = extract("web/loader.ts", LOADER_TS, true);

        let load = &find(&out, "load").extra["doc"];
        assert_eq!(
            load["params"],
            json!([
                {"name": "file", "kind": "param", "type": "string"},
                {"name": "rest", "kind": "rest", "type": "string[]"},
            ])
        );
        assert_eq!(load["returns"], "Promise<string>");
        assert_eq!(load["is_async"], true);
        assert_eq!(load["owner"], "Loader");
        assert_eq!(load["is_method"], true);

        let parse = &find(&out, "parse").extra["doc"];
        assert_eq!(parse["params"][1], json!({"name": "strict", "kind": "optional", "type": "boolean"}));
        assert_eq!(parse["raises"], json!(["Error"]));

        let walk = &find(&out, "walk").extra["doc"];
        assert_eq!(walk["flags"], json!({"async": false, "generator": true}));
        assert_eq!(walk["params"], json!([{"name": "root", "kind": "param", "default": "\".\""}]));

        let load_config = &find(&out, "loadConfig").extra["doc"];
        assert_eq!(load_config["is_async"], true);
        assert_eq!(load_config["is_method"], false);

        assert_eq!(out.stats.funcs_total, 4);
        assert_eq!(out.stats.funcs_with_params, 4);
        assert_eq!(out.stats.funcs_with_returns, 1);
        assert_eq!(out.stats.funcs_with_raises, 1);
        assert_eq!(out.stats.callsites_total, 5);
        assert_eq!(out.callsites.len(), 5);
    }

    #[test]
    fn test_callsite_resolution() {
        let out = extract("web/loader.ts", LOADER_TS, true);
        let load_config = find(&out, "loadConfig");
        let site = out
            .callsites
            .iter()
            .find(|c| c.caller_id == load_config.node_id)
            .unwrap();
        assert_eq!(site.line, 29);
        assert_eq!(site.snippet, "loader.load(file)");
        assert!(matches!(
            &site.callee_ref,
            CalleeRef::NodeId { value, .. } if *value == find(&out, "load").node_id
        ));
    }

    #[test]
    fn test_javascript_with_jsx() {
        let source = "export function App() {\n  return <div onClick={() => track(\"x\")}>Hi</div>;\n}\n";
        let out = extract("web/App.jsx", source, false);
        assert!(out.nodes.iter().all(|n| n.lang == "javascript"));
        let app = find(&out, "App");
        assert_eq!(app.kind, NodeKind::Func);
        assert_eq!(calls_from(&out, &app.node_id), vec![("track", "track")]);
    }

    #[test]
    fn test_top_level_calls_are_ignored() {
        let out = extract("web/main.js", "init();\nfunction init() {}\n", false);
        assert!(out.edges.iter().all(|e| e.edge_type != EdgeType::Call));
    }
}
