use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Flatten,
}

/// The subset of JMESPath that waiter definitions use: dotted identifiers and
/// `[]` flatten projections, e.g. `CommandInvocations[].Status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty field path".to_string());
        }

        let mut segments = Vec::new();
        for (idx, part) in trimmed.split('.').enumerate() {
            let mut rest = part;
            let name_end = rest.find('[').unwrap_or(rest.len());
            let name = &rest[..name_end];
            if name.is_empty() {
                // `[]` may only lead the path or follow another bracket.
                if idx != 0 || name_end == rest.len() {
                    return Err(format!("invalid field path {trimmed:?}: empty identifier"));
                }
            } else {
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(format!(
                        "invalid field path {trimmed:?}: bad identifier {name:?}"
                    ));
                }
                segments.push(Segment::Field(name.to_string()));
            }
            rest = &rest[name_end..];
            while !rest.is_empty() {
                if let Some(tail) = rest.strip_prefix("[]") {
                    rest = tail;
                } else if let Some(tail) = rest.strip_prefix("[*]") {
                    rest = tail;
                } else {
                    return Err(format!(
                        "invalid field path {trimmed:?}: unsupported selector {rest:?}"
                    ));
                }
                segments.push(Segment::Flatten);
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_projection(&self) -> bool {
        self.segments.contains(&Segment::Flatten)
    }

    /// Splits `a[].b.c` at its last projection into `a[]` and `b.c`, so two
    /// paths over the same collection can be evaluated element by element.
    pub fn split_projection(&self) -> Option<(FieldPath, FieldPath)> {
        let idx = self.segments.iter().rposition(|s| *s == Segment::Flatten)?;
        let (parent, rest) = self.segments.split_at(idx + 1);
        Some((Self::from_segments(parent), Self::from_segments(rest)))
    }

    fn from_segments(segments: &[Segment]) -> Self {
        let mut raw = String::new();
        for segment in segments {
            match segment {
                Segment::Field(name) => {
                    if !raw.is_empty() {
                        raw.push('.');
                    }
                    raw.push_str(name);
                }
                Segment::Flatten => raw.push_str("[]"),
            }
        }
        Self {
            raw,
            segments: segments.to_vec(),
        }
    }

    /// Evaluates the path. Projections yield one entry per element and drop
    /// elements where the projected field is missing or null.
    pub fn search<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        let mut current: Vec<&'a Value> = vec![doc];
        for segment in &self.segments {
            let mut next = Vec::with_capacity(current.len());
            match segment {
                Segment::Field(name) => {
                    for value in current {
                        if let Some(v) = value.get(name.as_str())
                            && !v.is_null()
                        {
                            next.push(v);
                        }
                    }
                }
                Segment::Flatten => {
                    for value in current {
                        if let Value::Array(items) = value {
                            next.extend(items.iter().filter(|v| !v.is_null()));
                        }
                    }
                }
            }
            current = next;
        }
        current
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Compares a polled value with an acceptor's expected string.
pub fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Bool(b) => expected.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
        Value::Number(n) => n.to_string() == expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn projects_status_of_every_invocation() {
        let doc = json!({
            "CommandInvocations": [
                { "CommandId": "c-1", "Status": "Success" },
                { "CommandId": "c-1", "Status": "InProgress" },
                { "CommandId": "c-1" }
            ]
        });
        let path = FieldPath::parse("CommandInvocations[].Status").unwrap();
        assert!(path.is_projection());
        assert_eq!(
            path.search(&doc),
            vec![&json!("Success"), &json!("InProgress")]
        );
    }

    #[test]
    fn plain_field_path_returns_single_value() {
        let doc = json!({ "Command": { "Status": "Pending" } });
        let path = FieldPath::parse("Command.Status").unwrap();
        assert!(!path.is_projection());
        assert_eq!(path.search(&doc), vec![&json!("Pending")]);
    }

    #[test]
    fn missing_collection_yields_nothing() {
        let path = FieldPath::parse("Snapshots[].State").unwrap();
        assert!(path.search(&json!({})).is_empty());
        assert!(path.search(&json!({ "Snapshots": "oops" })).is_empty());
    }

    #[test]
    fn nested_flatten_projections() {
        let doc = json!({
            "Reservations": [
                { "Instances": [ { "State": "running" }, { "State": "stopped" } ] },
                { "Instances": [ { "State": "running" } ] }
            ]
        });
        let path = FieldPath::parse("Reservations[].Instances[].State").unwrap();
        assert_eq!(path.search(&doc).len(), 3);
    }

    #[test]
    fn splits_at_the_last_projection() {
        let path = FieldPath::parse("Reservations[*].Instances[].State.Name").unwrap();
        let (parent, rest) = path.split_projection().unwrap();
        assert_eq!(parent.as_str(), "Reservations[].Instances[]");
        assert_eq!(rest.as_str(), "State.Name");
        assert_eq!(
            parent,
            FieldPath::parse("Reservations[].Instances[]").unwrap()
        );
        assert!(FieldPath::parse("Command.Status").unwrap().split_projection().is_none());
    }

    #[test]
    fn rejects_unsupported_syntax() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("Snapshots[0].State").is_err());
        assert!(FieldPath::parse("Snapshots[?State=='x']").is_err());
        assert!(FieldPath::parse("a..b").is_err());
    }

    #[test]
    fn value_matching_handles_scalars() {
        assert!(value_matches(&json!("completed"), "completed"));
        assert!(!value_matches(&json!("pending"), "completed"));
        assert!(value_matches(&json!(true), "true"));
        assert!(value_matches(&json!(3), "3"));
        assert!(!value_matches(&json!(["completed"]), "completed"));
    }
}
