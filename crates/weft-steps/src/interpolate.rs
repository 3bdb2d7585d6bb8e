//! `${expr}` template expansion.
//!
//! A single left-to-right scan with brace-depth tracking:
//! - `$${` emits a literal `${`;
//! - `${path}` is replaced by the rendered value at `path` (`a`, `a.b`, `items.0.name`);
//! - unresolved paths and expressions containing braces render as the empty string;
//! - an unterminated `${` is copied through verbatim.

use serde_json::Value;

use crate::coerce::to_text;

/// Expand every `${expr}` in `template` using `lookup` for the first path segment.
pub fn interpolate<'v, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'v Value>,
{
    if !template.contains("${") {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$${") {
            out.push_str("${");
            rest = after;
            continue;
        }

        if let Some(body) = tail.strip_prefix("${") {
            match closing_brace(body) {
                Some(end) => {
                    out.push_str(&render_expr(&body[..end], &lookup));
                    rest = &body[end + 1..];
                }
                None => {
                    out.push_str(tail);
                    return out;
                }
            }
            continue;
        }

        out.push('$');
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}

/// Byte offset of the `}` that closes an expression body, honoring nesting.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn render_expr<'v, F>(expr: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<&'v Value>,
{
    if expr.contains('{') || expr.contains('}') {
        return String::new();
    }
    resolve_path(expr.trim(), lookup)
        .map(to_text)
        .unwrap_or_default()
}

/// Walk a dotted path: object keys by name, array elements by index.
pub fn resolve_path<'v, F>(path: &str, lookup: &F) -> Option<&'v Value>
where
    F: Fn(&str) -> Option<&'v Value>,
{
    if path.is_empty() {
        return None;
    }
    let mut segments = path.split('.');
    let mut current = lookup(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
