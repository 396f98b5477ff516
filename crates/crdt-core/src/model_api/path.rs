use serde_json::Value;

use super::ModelApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
    Append,
}

pub fn get_path_mut<'a>(value: &'a mut Value, path: &[PathStep]) -> Option<&'a mut Value> {
    let mut cur = value;
    for step in path {
        match (step, cur) {
            (PathStep::Key(key), Value::Object(map)) => {
                cur = map.get_mut(key)?;
            }
            (PathStep::Index(idx), Value::Array(arr)) => {
                cur = arr.get_mut(*idx)?;
            }
            _ => return None,
        }
    }
    Some(cur)
}

pub fn value_at_path<'a>(value: &'a Value, path: &[PathStep]) -> Option<&'a Value> {
    let mut cur = value;
    for step in path {
        cur = match (step, cur) {
            (PathStep::Key(key), Value::Object(map)) => map.get(key)?,
            (PathStep::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            (PathStep::Append, _) => return None,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn split_parent(path: &[PathStep]) -> Result<(&[PathStep], &PathStep), ModelApiError> {
    if path.is_empty() {
        return Err(ModelApiError::InvalidPathOp);
    }
    let (parent, leaf) = path.split_at(path.len() - 1);
    Ok((parent, &leaf[0]))
}

pub fn parse_json_pointer(path: &str) -> Result<Vec<PathStep>, ModelApiError> {
    if path.is_empty() || path == "/" {
        return Ok(Vec::new());
    }
    let normalized = if path.starts_with('/') {
        path
    } else {
        // Accept relative pointer strings for convenience.
        // Example: "doc/items/0" => "/doc/items/0".
        return parse_json_pointer(&format!("/{path}"));
    };

    let mut out = Vec::new();
    for raw in normalized.split('/').skip(1) {
        let token = raw.replace("~1", "/").replace("~0", "~");
        if token == "-" {
            out.push(PathStep::Append);
            continue;
        }
        if let Ok(idx) = token.parse::<usize>() {
            out.push(PathStep::Index(idx));
        } else {
            out.push(PathStep::Key(token));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_json_pointer_splits_keys_indices_and_append() {
        let steps = parse_json_pointer("/doc/items/0/-").unwrap();
        assert_eq!(
            steps,
            vec![
                PathStep::Key("doc".to_string()),
                PathStep::Key("items".to_string()),
                PathStep::Index(0),
                PathStep::Append,
            ]
        );
    }

    #[test]
    fn parse_json_pointer_unescapes_tilde_tokens() {
        let steps = parse_json_pointer("/a~1b/~0k").unwrap();
        assert_eq!(
            steps,
            vec![
                PathStep::Key("a/b".to_string()),
                PathStep::Key("~k".to_string()),
            ]
        );
    }

    #[test]
    fn parse_json_pointer_accepts_relative_strings() {
        assert_eq!(
            parse_json_pointer("doc/items").unwrap(),
            parse_json_pointer("/doc/items").unwrap()
        );
    }

    #[test]
    fn empty_and_root_pointers_yield_no_steps() {
        assert_eq!(parse_json_pointer("").unwrap(), Vec::new());
        assert_eq!(parse_json_pointer("/").unwrap(), Vec::new());
    }

    #[test]
    fn value_at_path_walks_nested_objects_and_arrays() {
        let value = json!({"items": [1, 2, {"name": "x"}]});
        let path = parse_json_pointer("/items/2/name").unwrap();
        assert_eq!(value_at_path(&value, &path), Some(&json!("x")));
    }

    #[test]
    fn value_at_path_returns_none_for_missing_key() {
        let value = json!({"a": 1});
        let path = parse_json_pointer("/b").unwrap();
        assert_eq!(value_at_path(&value, &path), None);
    }

    #[test]
    fn get_path_mut_allows_in_place_mutation() {
        let mut value = json!({"a": [1, 2]});
        let path = parse_json_pointer("/a/1").unwrap();
        *get_path_mut(&mut value, &path).unwrap() = json!(42);
        assert_eq!(value, json!({"a": [1, 42]}));
    }

    #[test]
    fn split_parent_separates_leaf_from_prefix() {
        let path = parse_json_pointer("/a/b/c").unwrap();
        let (parent, leaf) = split_parent(&path).unwrap();
        assert_eq!(parent, &[PathStep::Key("a".to_string()), PathStep::Key("b".to_string())]);
        assert_eq!(leaf, &PathStep::Key("c".to_string()));
    }

    #[test]
    fn split_parent_rejects_empty_path() {
        assert!(split_parent(&[]).is_err());
    }
}
