//! Positional placeholder expansion.
//!
//! Queries are written with `?` markers and a parallel argument list.
//! Before a query reaches a driver every marker is matched against its
//! argument:
//!
//! - a scalar keeps its `?`
//! - a list becomes `(?, ?, ...)` with one marker per element, or `(NULL)`
//!   when empty
//! - a [`RawSql`](crate::models::RawSql) is spliced in as text, and its own
//!   arguments take its place in the list
//!
//! Expansion is applied again to whatever a list or raw fragment produced,
//! so nested lists become nested tuples. Once the arguments run out the rest
//! of the text is copied unchanged; surplus arguments are appended as-is.

use crate::models::Value;

const MARKER: char = '?';

/// Expand list and raw arguments into the query text.
pub fn preprocess(query: &str, args: Vec<Value>) -> (String, Vec<Value>) {
    if args.is_empty() || !query.contains(MARKER) {
        return (query.to_string(), args);
    }

    let mut out = String::with_capacity(query.len() + args.len() * 2);
    let mut out_args = Vec::with_capacity(args.len());
    let mut pending = args.into_iter();
    let mut rest = query;

    while let Some(pos) = rest.find(MARKER) {
        let Some(arg) = pending.next() else {
            break;
        };
        out.push_str(&rest[..pos]);
        rest = &rest[pos + MARKER.len_utf8()..];

        match expand_argument(arg) {
            Expansion::Marker(value) => {
                out.push(MARKER);
                out_args.push(value);
            }
            Expansion::Text(text, inner) => {
                let (text, inner) = preprocess(&text, inner);
                out.push_str(&text);
                out_args.extend(inner);
            }
        }
    }

    out.push_str(rest);
    out_args.extend(pending);
    (out, out_args)
}

enum Expansion {
    Marker(Value),
    Text(String, Vec<Value>),
}

fn expand_argument(arg: Value) -> Expansion {
    match arg {
        Value::Raw(raw) => Expansion::Text(raw.text, raw.args),
        Value::List(items) if items.is_empty() => Expansion::Text("(NULL)".to_string(), vec![]),
        Value::List(items) => {
            let markers = vec!["?"; items.len()].join(", ");
            Expansion::Text(format!("({})", markers), items)
        }
        other => Expansion::Marker(other),
    }
}

/// Rewrite sequential `?` markers as `$1, $2, ...`.
///
/// A doubled `??` is written out as a single literal `?` and does not take a
/// number.
pub fn replace_with_dollar_sign(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + query.matches(MARKER).count() * 2);
    let mut n = 1usize;
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        if c != MARKER {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&MARKER) {
            chars.next();
            out.push(MARKER);
            continue;
        }
        out.push('$');
        out.push_str(&n.to_string());
        n += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawSql, raw};
    use rand::Rng;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn test_list_expands_in_place() {
        let (sql, args) = preprocess(
            "?, ?, ?",
            vec![Value::from(1), Value::from(vec![2, 3, 4]), Value::from(5)],
        );
        assert_eq!(sql, "?, (?, ?, ?), ?");
        assert_eq!(args, ints(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_doubled_marker_with_lists() {
        let args = vec![
            Value::from(vec![1, 2, 3]),
            Value::List(vec![]),
            Value::from(vec![4, 5]),
            Value::List(vec![]),
        ];
        let (sql, args) = preprocess("??", args);
        assert_eq!(sql, "(?, ?, ?)(NULL)");
        assert_eq!(
            args,
            vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::from(vec![4, 5]),
                Value::List(vec![]),
            ]
        );
    }

    #[test]
    fn test_empty_list_becomes_null_tuple() {
        let (sql, args) = preprocess("id IN ?", vec![Value::List(vec![])]);
        assert_eq!(sql, "id IN (NULL)");
        assert!(args.is_empty());
    }

    #[test]
    fn test_raw_spliced_with_own_args() {
        let (sql, args) = preprocess(
            "a = ? AND b = ? AND c = ?",
            vec![
                Value::from(1),
                Value::from(RawSql::with_args("LOWER(?)", vec![Value::from("X")])),
                Value::from(raw("NOW()")),
            ],
        );
        assert_eq!(sql, "a = ? AND b = LOWER(?) AND c = NOW()");
        assert_eq!(args, vec![Value::Int(1), Value::from("X")]);
    }

    #[test]
    fn test_nested_lists_become_tuples() {
        let (sql, args) = preprocess(
            "(a, b) IN ?",
            vec![Value::List(vec![
                Value::from(vec![1, 2]),
                Value::from(vec![3, 4]),
            ])],
        );
        assert_eq!(sql, "(a, b) IN ((?, ?), (?, ?))");
        assert_eq!(args, ints(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_missing_args_leave_markers() {
        let (sql, args) = preprocess("a = ? AND b = ?", vec![Value::from(vec![1, 2])]);
        assert_eq!(sql, "a = (?, ?) AND b = ?");
        assert_eq!(args, ints(&[1, 2]));
    }

    #[test]
    fn test_no_args_passthrough() {
        let (sql, args) = preprocess("SELECT 1", vec![]);
        assert_eq!(sql, "SELECT 1");
        assert!(args.is_empty());
    }

    #[test]
    fn test_dollar_sign_numbering() {
        assert_eq!(
            replace_with_dollar_sign("a = ? AND b IN (?, ?)"),
            "a = $1 AND b IN ($2, $3)"
        );
        assert_eq!(
            replace_with_dollar_sign("data ?? 'key' AND id = ?"),
            "data ? 'key' AND id = $1"
        );
        assert_eq!(replace_with_dollar_sign("no markers"), "no markers");
    }

    #[test]
    fn test_random_lists_grow_args_by_len_minus_one() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let slots = rng.gen_range(1..8);
            let template = vec!["?"; slots].join(" AND ");
            let mut args = Vec::new();
            let mut expected_args = 0usize;
            let mut expected_markers = 0usize;
            let mut null_tuples = 0usize;

            for _ in 0..slots {
                if rng.gen_bool(0.5) {
                    let n = rng.gen_range(0..6);
                    args.push(Value::List((0..n).map(|i| Value::Int(i as i64)).collect()));
                    expected_args += n;
                    expected_markers += n;
                    if n == 0 {
                        null_tuples += 1;
                    }
                } else {
                    args.push(Value::Int(rng.gen_range(0..100)));
                    expected_args += 1;
                    expected_markers += 1;
                }
            }

            let (sql, out) = preprocess(&template, args);
            assert_eq!(out.len(), expected_args, "template: {}", sql);
            assert_eq!(sql.matches('?').count(), expected_markers);
            assert_eq!(sql.matches("(NULL)").count(), null_tuples);
            assert!(out.iter().all(|v| !v.is_expandable()));
        }
    }
}
