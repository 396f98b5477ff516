//! RFC 6901 JSON Pointer parsing and escaping, used by the model API's
//! path-based accessors.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JsonPointerError {
    #[error("json pointer must be absolute or empty")]
    NotAbsolute,
}

/// Unescapes one JSON Pointer token component.
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    component.replace("~1", "/").replace("~0", "~")
}

/// Escapes one JSON Pointer token component.
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Parse RFC6901 absolute pointer into unescaped path components.
///
/// Examples:
/// - `"" -> []`
/// - `"/" -> [""]`
/// - `"/a~1b/~0k/0" -> ["a/b", "~k", "0"]`
pub fn parse_json_pointer(pointer: &str) -> Result<Vec<String>, JsonPointerError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(JsonPointerError::NotAbsolute);
    }
    Ok(pointer.split('/').skip(1).map(unescape_component).collect())
}

/// Parse a pointer leniently: a string with no leading `/` is accepted by
/// prefixing one before parsing.
pub fn parse_json_pointer_relaxed(pointer: &str) -> Result<Vec<String>, JsonPointerError> {
    if pointer.starts_with('/') || pointer.is_empty() {
        return parse_json_pointer(pointer);
    }
    let mut absolute = String::with_capacity(pointer.len() + 1);
    absolute.push('/');
    absolute.push_str(pointer);
    parse_json_pointer(&absolute)
}

/// Format unescaped path components into RFC6901 pointer.
pub fn format_json_pointer(path: &[String]) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for component in path {
        out.push('/');
        out.push_str(&escape_component(component));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_unescapes_tilde_and_slash() {
        assert_eq!(parse_json_pointer("").unwrap(), Vec::<String>::new());
        assert_eq!(parse_json_pointer("/").unwrap(), vec![""]);
        assert_eq!(
            parse_json_pointer("/a~1b/~0k/0").unwrap(),
            vec!["a/b".to_string(), "~k".to_string(), "0".to_string()]
        );
    }

    #[test]
    fn rejects_non_absolute_pointers() {
        assert_eq!(parse_json_pointer("a/b"), Err(JsonPointerError::NotAbsolute));
    }

    #[test]
    fn relaxed_parsing_prefixes_missing_leading_slash() {
        assert_eq!(
            parse_json_pointer_relaxed("a/b").unwrap(),
            parse_json_pointer("/a/b").unwrap()
        );
    }

    #[test]
    fn format_and_parse_round_trip() {
        let path = vec!["a/b".to_string(), "~k".to_string(), "".to_string()];
        let pointer = format_json_pointer(&path);
        assert_eq!(parse_json_pointer(&pointer).unwrap(), path);
    }
}
