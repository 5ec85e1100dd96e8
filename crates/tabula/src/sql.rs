//! Fluent SQL fragment builder
//!
//! A [`Sql`] is a fragment of text plus its arguments and a list of appended
//! child fragments. Nothing is stitched together until [`Sql::build`] walks
//! the chain: fragments join with newlines, consecutive `WHERE` fragments
//! coalesce with `AND`, consecutive `ORDER BY` fragments coalesce with a
//! comma, and every parameter marker is rebound against the flattened
//! argument list. The coalescing checks are textual prefix checks, not a
//! SQL grammar.

use crate::error::Result;
use crate::params;
use crate::types::Value;

const WHERE_PREFIX: &str = "WHERE ";
const ORDER_BY_PREFIX: &str = "ORDER BY ";

fn starts_with_ci(text: &str, prefix: &str) -> bool {
    // Byte-wise: a multi-byte character may straddle the prefix length.
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Composable SQL fragment with deferred building
#[derive(Debug, Clone, Default)]
pub struct Sql {
    text: String,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
    children: Vec<Sql>,
}

impl Sql {
    /// Empty root fragment
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment from raw text and positional arguments
    pub fn raw(sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            text: sql.into(),
            positional: args.into_iter().collect(),
            named: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Fragment from raw text and named arguments
    pub fn raw_named(
        sql: impl Into<String>,
        named: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        Self {
            text: sql.into(),
            positional: Vec::new(),
            named: named.into_iter().collect(),
            children: Vec::new(),
        }
    }

    /// Append another fragment
    pub fn append(mut self, other: Sql) -> Self {
        self.children.push(other);
        self
    }

    /// Append raw text with positional arguments
    pub fn append_raw(self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.append(Sql::raw(sql, args))
    }

    /// Append `SELECT <columns>`
    pub fn select(self, columns: &[&str]) -> Self {
        self.append(Sql::raw(format!("SELECT {}", columns.join(", ")), []))
    }

    /// Append `FROM <tables>`
    pub fn from(self, tables: &[&str]) -> Self {
        self.append(Sql::raw(format!("FROM {}", tables.join(", ")), []))
    }

    /// Append a parenthesized `WHERE` condition; consecutive conditions
    /// combine with `AND`
    pub fn where_clause(self, condition: &str, args: impl IntoIterator<Item = Value>) -> Self {
        self.append(Sql::raw(format!("WHERE ({condition})"), args))
    }

    /// Append `ORDER BY <columns>`; consecutive orderings combine with a comma
    pub fn order_by(self, columns: &[&str]) -> Self {
        self.append(Sql::raw(format!("ORDER BY {}", columns.join(", ")), []))
    }

    /// Append `GROUP BY <columns>`
    pub fn group_by(self, columns: &[&str]) -> Self {
        self.append(Sql::raw(format!("GROUP BY {}", columns.join(", ")), []))
    }

    /// Append `INNER JOIN <table>`, returning the ON-completer
    pub fn inner_join(self, table: &str) -> JoinClause {
        self.join("INNER JOIN ", table)
    }

    /// Append `LEFT JOIN <table>`, returning the ON-completer
    pub fn left_join(self, table: &str) -> JoinClause {
        self.join("LEFT JOIN ", table)
    }

    fn join(self, join_type: &str, table: &str) -> JoinClause {
        JoinClause {
            sql: self.append(Sql::raw(format!("{join_type}{table}"), [])),
        }
    }

    /// Walk the chain, producing the final SQL text and flattened arguments
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        let mut text = String::new();
        let mut args = Vec::new();
        let mut last: Option<&str> = None;
        self.build_into(&mut text, &mut args, &mut last)?;
        Ok((text, args))
    }

    fn build_into<'a>(
        &'a self,
        out: &mut String,
        args: &mut Vec<Value>,
        last: &mut Option<&'a str>,
    ) -> Result<()> {
        if !self.text.is_empty() {
            let mut fragment = params::process(&self.text, &self.positional, &self.named, args)?;

            if let Some(prev) = last {
                if starts_with_ci(prev, WHERE_PREFIX) && starts_with_ci(&self.text, WHERE_PREFIX) {
                    fragment = format!("AND {}", &fragment[WHERE_PREFIX.len()..]);
                } else if starts_with_ci(prev, ORDER_BY_PREFIX)
                    && starts_with_ci(&self.text, ORDER_BY_PREFIX)
                {
                    fragment = format!(", {}", &fragment[ORDER_BY_PREFIX.len()..]);
                }
            }

            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&fragment);
            *last = Some(&self.text);
        }

        for child in &self.children {
            child.build_into(out, args, last)?;
        }
        Ok(())
    }
}

/// A join awaiting its ON condition
#[derive(Debug)]
pub struct JoinClause {
    sql: Sql,
}

impl JoinClause {
    /// Complete the join with `ON <condition>`
    pub fn on(self, condition: &str, args: impl IntoIterator<Item = Value>) -> Sql {
        self.sql.append(Sql::raw(format!("ON {condition}"), args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_fragment_passes_through() {
        let (text, args) =
            Sql::raw("SELECT * FROM widget WHERE id = @0", [Value::Int32(7)])
                .build()
                .unwrap();
        assert_eq!(text, "SELECT * FROM widget WHERE id = @0");
        assert_eq!(args, vec![Value::Int32(7)]);
    }

    #[test]
    fn test_consecutive_where_coalesces_to_and() {
        let (text, args) = Sql::new()
            .append_raw("SELECT * FROM widget", [])
            .where_clause("grade = @0", [Value::String("a".into())])
            .where_clause("weight > @0", [Value::Float64(1.5)])
            .build()
            .unwrap();
        assert_eq!(
            text,
            "SELECT * FROM widget\nWHERE (grade = @0)\nAND (weight > @1)"
        );
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_consecutive_order_by_coalesces_to_comma() {
        let (text, _) = Sql::new()
            .append_raw("SELECT * FROM widget", [])
            .order_by(&["grade"])
            .order_by(&["name DESC"])
            .build()
            .unwrap();
        assert_eq!(text, "SELECT * FROM widget\nORDER BY grade\n, name DESC");
    }

    #[test]
    fn test_where_then_order_by_does_not_coalesce() {
        let (text, _) = Sql::new()
            .append_raw("SELECT * FROM widget", [])
            .where_clause("id = @0", [Value::Int32(1)])
            .order_by(&["id"])
            .build()
            .unwrap();
        assert!(text.contains("WHERE (id = @0)\nORDER BY id"));
    }

    #[test]
    fn test_arguments_rebind_across_fragments() {
        let (text, args) = Sql::new()
            .append_raw("SELECT * FROM widget WHERE a = @0", [Value::Int32(10)])
            .append_raw("AND b = @0", [Value::Int32(20)])
            .build()
            .unwrap();
        assert_eq!(text, "SELECT * FROM widget WHERE a = @0\nAND b = @1");
        assert_eq!(args, vec![Value::Int32(10), Value::Int32(20)]);
    }

    #[test]
    fn test_select_from_helpers() {
        let (text, _) = Sql::new()
            .select(&["id", "name"])
            .from(&["widget"])
            .build()
            .unwrap();
        assert_eq!(text, "SELECT id, name\nFROM widget");
    }

    #[test]
    fn test_join_clause() {
        let (text, args) = Sql::new()
            .select(&["w.id", "c.label"])
            .from(&["widget w"])
            .inner_join("category c")
            .on("c.id = w.category_id AND c.kind = @0", [Value::Int32(2)])
            .where_clause("w.id > @0", [Value::Int32(100)])
            .build()
            .unwrap();
        assert_eq!(
            text,
            "SELECT w.id, c.label\nFROM widget w\nINNER JOIN category c\nON c.id = w.category_id AND c.kind = @0\nWHERE (w.id > @1)"
        );
        assert_eq!(args, vec![Value::Int32(2), Value::Int32(100)]);
    }

    #[test]
    fn test_left_join() {
        let (text, _) = Sql::new()
            .select(&["*"])
            .from(&["widget w"])
            .left_join("category c")
            .on("c.id = w.category_id", [])
            .build()
            .unwrap();
        assert!(text.contains("LEFT JOIN category c\nON c.id = w.category_id"));
    }

    #[test]
    fn test_nested_append_preserves_flattened_order() {
        let inner = Sql::raw("WHERE (a = @0)", [Value::Int32(1)])
            .append_raw("WHERE (b = @0)", [Value::Int32(2)]);
        let (text, args) = Sql::raw("SELECT * FROM t", [])
            .append(inner)
            .append_raw("WHERE (c = @0)", [Value::Int32(3)])
            .build()
            .unwrap();
        assert_eq!(
            text,
            "SELECT * FROM t\nWHERE (a = @0)\nAND (b = @1)\nAND (c = @2)"
        );
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_named_fragment_arguments() {
        let (text, args) = Sql::new()
            .append_raw("UPDATE widget", [])
            .append(Sql::raw_named(
                "SET name = @name WHERE id = @id",
                [
                    ("name".to_string(), Value::String("x".into())),
                    ("id".to_string(), Value::Int32(4)),
                ],
            ))
            .build()
            .unwrap();
        assert_eq!(text, "UPDATE widget\nSET name = @0 WHERE id = @1");
        assert_eq!(args, vec![Value::String("x".into()), Value::Int32(4)]);
    }

    #[test]
    fn test_array_argument_expands_during_build() {
        let (text, args) = Sql::new()
            .append_raw("SELECT * FROM widget", [])
            .where_clause(
                "id IN (@0)",
                [Value::Array(vec![Value::Int32(1), Value::Int32(2)])],
            )
            .build()
            .unwrap();
        assert!(text.contains("WHERE (id IN (@0,@1))"));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_build_is_repeatable() {
        let sql = Sql::raw("SELECT @0", [Value::Int32(1)]);
        let first = sql.build().unwrap();
        let second = sql.build().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_multibyte_fragment_appends_without_coalescing() {
        // 'é' straddles the WHERE-prefix length; the check must not split it.
        let (text, args) = Sql::new()
            .append_raw("SELECT * FROM menu", [])
            .where_clause("kind = @0", [Value::Int32(1)])
            .append_raw("marché = @0", [Value::Int32(2)])
            .build()
            .unwrap();
        assert_eq!(text, "SELECT * FROM menu\nWHERE (kind = @0)\nmarché = @1");
        assert_eq!(args.len(), 2);
    }
}
