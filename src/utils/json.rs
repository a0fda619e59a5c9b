//! src/utils/json.rs
//! Dotted/bracketed JSON path selection over response payloads.

use serde_json::Value;

/// One segment of a parsed selector path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse a dotted/bracketed selector like `user.roles[0].name`.
///
/// An empty path selects the root. Bracket indices must be non-negative
/// integers; quoted keys are not supported.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }

    for part in path.split('.') {
        if part.is_empty() {
            return Err(format!("empty segment in path '{}'", path));
        }
        let mut rest = part;
        // Leading identifier before any brackets
        if let Some(bracket) = rest.find('[') {
            if bracket > 0 {
                segments.push(PathSegment::Key(rest[..bracket].to_string()));
            }
            rest = &rest[bracket..];
        } else {
            segments.push(PathSegment::Key(rest.to_string()));
            continue;
        }
        // One or more [n] suffixes
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Err(format!("malformed brackets in path '{}'", path));
            }
            let close = rest
                .find(']')
                .ok_or_else(|| format!("unclosed bracket in path '{}'", path))?;
            let idx: usize = rest[1..close]
                .parse()
                .map_err(|_| format!("non-numeric index in path '{}'", path))?;
            segments.push(PathSegment::Index(idx));
            rest = &rest[close + 1..];
        }
    }

    Ok(segments)
}

/// Select a value at `path` within `root`. Returns None when any segment
/// does not resolve.
pub fn select<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path).ok()?;
    let mut current = root;
    for seg in &segments {
        current = match seg {
            PathSegment::Key(k) => current.get(k.as_str())?,
            PathSegment::Index(i) => current.get(*i)?,
        };
    }
    Some(current)
}

/// Flatten a JSON value into `(path, leaf)` pairs, depth-first, with paths in
/// the same dotted/bracketed syntax `select` accepts. Scalars yield a single
/// pair with their own path; empty containers yield their container.
pub fn flatten(root: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(root, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                let child = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(v, child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, format!("{}[{}]", prefix, i), out);
            }
        }
        other => out.push((prefix, other.clone())),
    }
}
