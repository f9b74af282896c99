use crate::error::{CodeIndexError, Result};

/// Parses `source` with the given tree-sitter language.
pub fn parse_source<'a>(source: &'a str, language: &tree_sitter::Language) -> Result<ParsedFile<'a>> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(language)
        .map_err(|e| CodeIndexError::Parse(e.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CodeIndexError::Parse("Failed to parse source".to_string()))?;

    Ok(ParsedFile { tree, source })
}

pub struct ParsedFile<'a> {
    pub tree: tree_sitter::Tree,
    pub source: &'a str,
}

impl<'a> ParsedFile<'a> {
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn node_text(&self, node: &tree_sitter::Node) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }
}

/// 1-based first line of a syntax node.
pub fn start_line(node: &tree_sitter::Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based last line of a syntax node.
pub fn end_line(node: &tree_sitter::Node) -> u32 {
    node.end_position().row as u32 + 1
}

/// Named children of a node, collected eagerly.
pub fn named_children<'t>(node: &tree_sitter::Node<'t>) -> Vec<tree_sitter::Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Whether any direct child (named or anonymous) has the given kind.
pub fn has_child_kind(node: &tree_sitter::Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_python_source() {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let parsed = parse_source("def hello():\n    pass\n", &language).unwrap();
        let root = parsed.root_node();
        assert_eq!(root.kind(), "module");
        assert!(!parsed.has_errors());

        let func = root.named_child(0).unwrap();
        assert_eq!(func.kind(), "function_definition");
        assert_eq!(start_line(&func), 1);
        assert_eq!(end_line(&func), 2);
        let name = func.child_by_field_name("name").unwrap();
        assert_eq!(parsed.node_text(&name), "hello");
    }

    #[test]
    fn test_parse_typescript_source() {
        let language: tree_sitter::Language = tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into();
        let parsed = parse_source("export async function run(): Promise<void> {}", &language).unwrap();
        assert_eq!(parsed.root_node().kind(), "program");
        assert!(!parsed.has_errors());
    }

    #[test]
    fn test_parse_reports_syntax_errors() {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let parsed = parse_source("def broken(:\n", &language).unwrap();
        assert!(parsed.has_errors());
    }
}
