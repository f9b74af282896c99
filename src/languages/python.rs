use serde_json::{json, Value};

use super::Extractor;
use crate::graph::{Edge, EdgeType, Node, NodeKind};
use crate::indexer::extractor::{
    file_node, first_doc_line, is_constant_name, visibility, ExtractOptions, ExtractionOutput,
    FileExtraction,
};
use crate::indexer::parser::{end_line, has_child_kind, named_children, start_line, ParsedFile};

const LANG: &str = "python";

pub struct PythonExtractor;

impl Extractor for PythonExtractor {
    fn name(&self) -> &'static str {
        LANG
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["py"]
    }

    fn language(&self, _ext: &str) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn extract(&self, parsed: &ParsedFile<'_>, rel_path: &str, options: &ExtractOptions) -> ExtractionOutput {
        let root = parsed.root_node();
        let docstring = docstring_of(parsed, &root);
        let file = file_node(rel_path, LANG, parsed.source)
            .with_summary(docstring.as_deref().and_then(first_doc_line));

        let mut walker = PythonWalker {
            parsed,
            fx: FileExtraction::new(file, LANG, *options),
        };
        walker.visit_module_level(&root);
        walker.fx.finish()
    }
}

struct Owner {
    id: String,
    name: String,
}

struct Param {
    name: String,
    kind: &'static str,
    annotation: Option<String>,
    default: Option<String>,
}

impl Param {
    fn to_json(&self) -> Value {
        let mut value = json!({ "name": self.name, "kind": self.kind });
        if let Some(annotation) = &self.annotation {
            value["annotation"] = json!(annotation);
        }
        if let Some(default) = &self.default {
            value["default"] = json!(default);
        }
        value
    }
}

#[derive(Default)]
struct BodyScan {
    calls: Vec<(String, String, u32, String)>,
    raises: Vec<String>,
    generator: bool,
}

struct PythonWalker<'p, 'src> {
    parsed: &'p ParsedFile<'src>,
    fx: FileExtraction,
}

impl<'p, 'src> PythonWalker<'p, 'src> {
    fn text(&self, node: &tree_sitter::Node) -> &'src str {
        self.parsed.node_text(node)
    }

    fn field_text(&self, node: &tree_sitter::Node, field: &str) -> Option<&'src str> {
        node.child_by_field_name(field).map(|n| self.text(&n))
    }

    /// Statements at module level, including those nested in `if`/`try` blocks.
    /// Function bodies are not descended into.
    fn visit_module_level(&mut self, node: &tree_sitter::Node) {
        for child in named_children(node) {
            match child.kind() {
                "class_definition" => self.visit_class(&child, Vec::new()),
                "function_definition" => self.visit_function(&child, Vec::new(), None),
                "decorated_definition" => self.visit_decorated(&child, None),
                "import_statement" => self.visit_import(&child),
                "import_from_statement" => self.visit_import_from(&child),
                "expression_statement" => self.visit_assignment(&child),
                "lambda" | "comment" => {}
                _ => self.visit_module_level(&child),
            }
        }
    }

    fn visit_decorated(&mut self, node: &tree_sitter::Node, owner: Option<&Owner>) {
        let decorators: Vec<String> = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "decorator")
            .filter_map(|d| d.named_child(0).map(|expr| self.text(&expr).to_string()))
            .collect();
        let Some(definition) = node.child_by_field_name("definition") else {
            return;
        };
        match (definition.kind(), owner) {
            ("function_definition", _) => self.visit_function(&definition, decorators, owner),
            ("class_definition", None) => self.visit_class(&definition, decorators),
            _ => {}
        }
    }

    fn visit_class(&mut self, node: &tree_sitter::Node, decorators: Vec<String>) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };
        let docstring = node
            .child_by_field_name("body")
            .and_then(|body| docstring_of(self.parsed, &body));
        let bases = self.base_names(node);

        let mut class = Node::new(
            NodeKind::Class,
            self.fx.rel_path(),
            Some(name.to_string()),
            Some(start_line(node)),
            Some(end_line(node)),
        )
        .with_summary(docstring.as_deref().and_then(first_doc_line));
        if self.fx.enrich() {
            class = class.with_doc(json!({
                "lang": LANG,
                "bases": bases,
                "decorators": decorators,
                "visibility": visibility(name),
                "docstring": docstring,
            }));
        }

        for base in &bases {
            let dst = self.fx.lookup(base).unwrap_or(base.as_str()).to_string();
            self.fx.add_edge(Edge::new(class.node_id.clone(), dst, EdgeType::Inherit, base.as_str()));
        }
        let file_id = self.fx.file_id().to_string();
        let class_id = self.fx.add_symbol(class, &file_id);

        let owner = Owner {
            id: class_id,
            name: name.to_string(),
        };
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        for child in named_children(&body) {
            match child.kind() {
                "function_definition" => self.visit_function(&child, Vec::new(), Some(&owner)),
                "decorated_definition" => self.visit_decorated(&child, Some(&owner)),
                _ => {}
            }
        }
    }

    fn base_names(&self, class: &tree_sitter::Node) -> Vec<String> {
        let Some(superclasses) = class.child_by_field_name("superclasses") else {
            return Vec::new();
        };
        named_children(&superclasses)
            .iter()
            .filter_map(|base| match base.kind() {
                "identifier" => Some(self.text(base)),
                "attribute" => self.field_text(base, "attribute"),
                "subscript" => base.child_by_field_name("value").and_then(|value| match value.kind() {
                    "identifier" => Some(self.text(&value)),
                    "attribute" => self.field_text(&value, "attribute"),
                    _ => None,
                }),
                _ => None,
            })
            .map(str::to_string)
            .collect()
    }

    fn visit_function(&mut self, node: &tree_sitter::Node, decorators: Vec<String>, owner: Option<&Owner>) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };
        let params_node = node.child_by_field_name("parameters");
        let params = params_node.map(|p| self.parse_params(&p)).unwrap_or_default();
        let signature = format!(
            "({})",
            params
                .iter()
                .filter(|p| p.kind == "param")
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let returns = self.field_text(node, "return_type").map(str::to_string);
        let body = node.child_by_field_name("body");
        let docstring = body.as_ref().and_then(|b| docstring_of(self.parsed, b));
        let mut scan = BodyScan::default();
        if let Some(body) = &body {
            self.scan_body(body, false, &mut scan);
        }
        let is_async = has_child_kind(node, "async");

        let kind = if owner.is_some() { NodeKind::Block } else { NodeKind::Func };
        let mut func = Node::new(
            kind,
            self.fx.rel_path(),
            Some(name.to_string()),
            Some(start_line(node)),
            Some(end_line(node)),
        )
        .with_signature(signature)
        .with_summary(docstring.as_deref().and_then(first_doc_line));

        self.fx.stats.funcs_total += 1;
        if self.fx.enrich() {
            let stats = &mut self.fx.stats;
            if params_node.is_some() {
                stats.funcs_with_params += 1;
            }
            if returns.is_some() {
                stats.funcs_with_returns += 1;
            }
            if !scan.raises.is_empty() {
                stats.funcs_with_raises += 1;
                stats.raises_extracted_total += scan.raises.len();
            }
            if !decorators.is_empty() {
                stats.funcs_with_decorators += 1;
            }

            let mut doc = json!({
                "lang": LANG,
                "params": params.iter().map(Param::to_json).collect::<Vec<_>>(),
                "returns": returns,
                "raises": scan.raises,
                "decorators": decorators,
                "docstring": docstring,
                "visibility": visibility(name),
                "is_async": is_async,
                "flags": { "async": is_async, "generator": scan.generator },
                "is_method": owner.is_some(),
            });
            if let Some(owner) = owner {
                doc["owner"] = json!(owner.name);
            }
            func = func.with_doc(doc);
        }

        let parent_id = owner.map_or_else(|| self.fx.file_id().to_string(), |o| o.id.clone());
        let func_id = self.fx.add_symbol(func, &parent_id);
        for (callee, display, line, snippet) in &scan.calls {
            self.fx.record_call(&func_id, callee, display, *line, snippet);
        }
    }

    fn parse_params(&self, params: &tree_sitter::Node) -> Vec<Param> {
        let mut out = Vec::new();
        let mut keyword_only = false;
        let positional = |keyword_only: bool| if keyword_only { "keyword_only" } else { "param" };

        for child in named_children(params) {
            let annotation = self.field_text(&child, "type").map(str::to_string);
            match child.kind() {
                "identifier" => out.push(Param {
                    name: self.text(&child).to_string(),
                    kind: positional(keyword_only),
                    annotation: None,
                    default: None,
                }),
                "default_parameter" | "typed_default_parameter" => {
                    let Some(name) = self.field_text(&child, "name") else {
                        continue;
                    };
                    out.push(Param {
                        name: name.to_string(),
                        kind: positional(keyword_only),
                        annotation,
                        default: self.field_text(&child, "value").map(str::to_string),
                    });
                }
                "typed_parameter" => {
                    let Some(inner) = child.named_child(0) else {
                        continue;
                    };
                    let kind = match inner.kind() {
                        "list_splat_pattern" => {
                            keyword_only = true;
                            "vararg"
                        }
                        "dictionary_splat_pattern" => "kwarg",
                        _ => positional(keyword_only),
                    };
                    out.push(Param {
                        name: self.text(&inner).trim_start_matches('*').to_string(),
                        kind,
                        annotation,
                        default: None,
                    });
                }
                "list_splat_pattern" => {
                    keyword_only = true;
                    out.push(Param {
                        name: self.text(&child).trim_start_matches('*').to_string(),
                        kind: "vararg",
                        annotation: None,
                        default: None,
                    });
                }
                "dictionary_splat_pattern" => out.push(Param {
                    name: self.text(&child).trim_start_matches('*').to_string(),
                    kind: "kwarg",
                    annotation: None,
                    default: None,
                }),
                "keyword_separator" => keyword_only = true,
                _ => {}
            }
        }
        out
    }

    /// Collects calls anywhere in the body; raises and yields only outside
    /// nested functions.
    fn scan_body(&self, node: &tree_sitter::Node, nested: bool, scan: &mut BodyScan) {
        for child in named_children(node) {
            match child.kind() {
                "call" => {
                    if let Some((callee, display)) = self.callee_names(&child) {
                        scan.calls.push((
                            callee.to_string(),
                            display.to_string(),
                            start_line(&child),
                            self.text(&child).to_string(),
                        ));
                    }
                    self.scan_body(&child, nested, scan);
                }
                "raise_statement" if !nested => {
                    if let Some(raised) = child.named_child(0).and_then(|e| self.raised_name(&e)) {
                        scan.raises.push(raised.to_string());
                    }
                    self.scan_body(&child, nested, scan);
                }
                "yield" if !nested => {
                    scan.generator = true;
                    self.scan_body(&child, nested, scan);
                }
                "function_definition" | "lambda" | "class_definition" => self.scan_body(&child, true, scan),
                _ => self.scan_body(&child, nested, scan),
            }
        }
    }

    fn callee_names(&self, call: &tree_sitter::Node) -> Option<(&'src str, &'src str)> {
        let function = call.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => {
                let name = self.text(&function);
                Some((name, name))
            }
            "attribute" => Some((self.field_text(&function, "attribute")?, self.text(&function))),
            _ => None,
        }
    }

    fn raised_name(&self, expr: &tree_sitter::Node) -> Option<&'src str> {
        match expr.kind() {
            "call" => expr.child_by_field_name("function").map(|f| self.text(&f)),
            "identifier" | "attribute" => Some(self.text(expr)),
            "comment" => None,
            _ => Some(self.text(expr)),
        }
    }

    fn visit_import(&mut self, node: &tree_sitter::Node) {
        let mut cursor = node.walk();
        let names: Vec<_> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (target, alias) = self.import_name(&name);
            self.add_import(target.to_string(), alias.to_string());
        }
    }

    fn visit_import_from(&mut self, node: &tree_sitter::Node) {
        let module = self
            .field_text(node, "module_name")
            .map(|m| m.trim_start_matches('.'))
            .unwrap_or("");
        let mut cursor = node.walk();
        let mut imported: Vec<(&str, &str)> = node
            .children_by_field_name("name", &mut cursor)
            .map(|n| self.import_name(&n))
            .collect();
        if imported.is_empty() && has_child_kind(node, "wildcard_import") {
            imported.push(("*", "*"));
        }
        for (name, alias) in imported {
            let target = if module.is_empty() {
                name.to_string()
            } else {
                format!("{module}.{name}")
            };
            self.add_import(target, alias.to_string());
        }
    }

    /// `(imported name, local alias)` for a `dotted_name` or `aliased_import`.
    fn import_name(&self, node: &tree_sitter::Node) -> (&'src str, &'src str) {
        if node.kind() == "aliased_import" {
            let name = self.field_text(node, "name").unwrap_or("");
            let alias = self.field_text(node, "alias").unwrap_or(name);
            (name, alias)
        } else {
            let name = self.text(node);
            (name, name)
        }
    }

    fn add_import(&mut self, target: String, alias: String) {
        if target.is_empty() {
            return;
        }
        let file_id = self.fx.file_id().to_string();
        self.fx.add_edge(Edge::new(file_id, target, EdgeType::Import, alias));
    }

    fn visit_assignment(&mut self, stmt: &tree_sitter::Node) {
        let Some(mut assignment) = stmt.named_child(0) else {
            return;
        };
        if assignment.kind() != "assignment" {
            return;
        }
        loop {
            if let Some(left) = assignment.child_by_field_name("left") {
                let name = self.text(&left);
                if left.kind() == "identifier" && name.len() >= 2 && is_constant_name(name) {
                    let constant = Node::new(
                        NodeKind::Const,
                        self.fx.rel_path(),
                        Some(name.to_string()),
                        Some(start_line(stmt)),
                        Some(end_line(stmt)),
                    );
                    let file_id = self.fx.file_id().to_string();
                    self.fx.add_symbol(constant, &file_id);
                }
            }
            match assignment.child_by_field_name("right") {
                Some(right) if right.kind() == "assignment" => assignment = right,
                _ => break,
            }
        }
    }
}

/// Docstring of a module or block: a string literal as its first statement.
fn docstring_of(parsed: &ParsedFile<'_>, body: &tree_sitter::Node) -> Option<String> {
    let first = named_children(body).into_iter().find(|c| c.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first.named_child(0).filter(|n| n.kind() == "string")?;
    let raw = named_children(&literal)
        .iter()
        .filter(|c| c.kind() == "string_content")
        .map(|c| parsed.node_text(c))
        .collect::<String>();
    let cleaned = raw
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}
