/// Splits an identifier on non-alphanumerics and camelCase boundaries.
///
/// Every uppercase letter that is not the first character of a segment starts
/// a new part, so `HTTPServer` yields `h t t p server`.
pub fn split_identifier(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for segment in name.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut current = String::new();
        for (i, ch) in segment.char_indices() {
            if i > 0 && ch.is_ascii_uppercase() && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(current);
        }
    }
    parts
        .into_iter()
        .map(|p| p.to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Tokenizes free text or code into lowercase terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .flat_map(split_identifier)
        .collect()
}
