//! Node, namespace and topic name validation.
//!
//! ```text
//! node "talker", namespace "/demo"
//!   "chatter"     → "/demo/chatter"
//!   "/chatter"    → "/chatter"
//!   "~/status"    → "/demo/talker/status"
//! ```

use crate::domain::{RclError, RclResult};

fn valid_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Node names are a single token.
pub(crate) fn validate_node_name(name: &str) -> RclResult<()> {
    if valid_token(name) {
        Ok(())
    } else {
        Err(RclError::InvalidArgument(format!(
            "invalid node name '{}': use [A-Za-z0-9_], not starting with a digit",
            name
        )))
    }
}

/// Normalize a namespace: empty becomes `/`, otherwise absolute tokens.
pub(crate) fn normalize_namespace(namespace: &str) -> RclResult<String> {
    if namespace.is_empty() || namespace == "/" {
        return Ok("/".to_string());
    }
    let invalid = || RclError::InvalidArgument(format!("invalid namespace '{}'", namespace));
    let rest = namespace.strip_prefix('/').ok_or_else(invalid)?;
    if rest.split('/').all(valid_token) {
        Ok(namespace.to_string())
    } else {
        Err(invalid())
    }
}

/// Fully qualified node name.
pub(crate) fn fully_qualified(namespace: &str, node: &str) -> String {
    if namespace == "/" {
        format!("/{}", node)
    } else {
        format!("{}/{}", namespace, node)
    }
}

/// Expand a topic or service name against the node's namespace.
pub(crate) fn expand_topic_name(name: &str, node: &str, namespace: &str) -> RclResult<String> {
    let invalid = |why: &str| {
        RclError::InvalidArgument(format!("invalid topic name '{}': {}", name, why))
    };

    let expanded = if let Some(rest) = name.strip_prefix('~') {
        let private = fully_qualified(namespace, node);
        match rest {
            "" => private,
            _ if rest.starts_with('/') => format!("{}{}", private, rest),
            _ => return Err(invalid("'~' must be followed by '/'")),
        }
    } else if name.starts_with('/') {
        name.to_string()
    } else if namespace == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", namespace, name)
    };

    let body = expanded
        .strip_prefix('/')
        .ok_or_else(|| invalid("not absolute"))?;
    if body.is_empty() {
        return Err(invalid("empty"));
    }
    if !body.split('/').all(valid_token) {
        return Err(invalid("use [A-Za-z0-9_] tokens separated by '/'"));
    }
    Ok(expanded)
}
