//! Paged-query synthesis
//!
//! Splits a SELECT into column list, body, and trailing ORDER BY with a
//! small scanner that tracks parenthesis depth and skips string literals,
//! quoted identifiers, and comments, then emits two statements: a COUNT form
//! with the ORDER BY stripped, and a page-fetch form in the active dialect's
//! idiom (ROW_NUMBER window, OFFSET/FETCH, or LIMIT/OFFSET). Paging
//! arguments are appended to the caller's argument list; the synthesized
//! markers reference them by position.

use crate::dialect::{Dialect, PageIdiom};
use crate::error::{Error, Result};
use crate::types::Value;

/// One page of a larger result
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// 1-based page number this page holds
    pub current_page: u64,
    /// Requested page size
    pub items_per_page: u64,
    /// Rows matching the unpaged query
    pub total_items: u64,
    /// `ceil(total_items / items_per_page)`
    pub total_pages: u64,
    /// Rows on this page
    pub items: Vec<T>,
}

/// Count and page-fetch statements synthesized for one paged query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQueries {
    /// COUNT form with ORDER BY stripped
    pub count_sql: String,
    /// Page-fetch form in the dialect's idiom
    pub page_sql: String,
}

/// Page count for `total_items` rows at `items_per_page` per page
pub fn total_pages(total_items: u64, items_per_page: u64) -> Result<u64> {
    if items_per_page == 0 {
        return Err(Error::parameter("page size must be greater than zero"));
    }
    Ok(total_items.div_ceil(items_per_page))
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            // doubled quote escapes inside the literal
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_bracketed(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b']' {
            if bytes.get(i + 1) == Some(&b']') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Byte mask of `sql`: true where the byte is statement text at parenthesis
/// depth zero, outside string literals, quoted identifiers, and comments
fn top_level_mask(sql: &str) -> Vec<bool> {
    let bytes = sql.as_bytes();
    let mut mask = vec![false; bytes.len()];
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i, bytes[i]),
            b'[' => i = skip_bracketed(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            _ => {
                if depth == 0 {
                    mask[i] = true;
                }
                i += 1;
            }
        }
    }
    mask
}

/// Whether `word` occurs at `at` as a standalone keyword with every byte at
/// top level. Comparison is byte-wise: `at` may fall inside a multi-byte
/// character, which can never match an ASCII keyword.
fn word_at(sql: &str, mask: &[bool], word: &str, at: usize) -> bool {
    let bytes = sql.as_bytes();
    let end = at + word.len();
    if end > bytes.len() {
        return false;
    }
    if !bytes[at..end].eq_ignore_ascii_case(word.as_bytes()) {
        return false;
    }
    if at > 0 && is_word_byte(bytes[at - 1]) {
        return false;
    }
    if end < bytes.len() && is_word_byte(bytes[end]) {
        return false;
    }
    mask[at..end].iter().all(|&m| m)
}

fn find_word(sql: &str, mask: &[bool], word: &str, from: usize) -> Option<usize> {
    (from..sql.len()).find(|&i| word_at(sql, mask, word, i))
}

/// Last top-level `ORDER BY`, returning the index of `ORDER`
fn find_last_order_by(sql: &str, mask: &[bool], from: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut found = None;
    let mut i = from;
    while let Some(at) = find_word(sql, mask, "ORDER", i) {
        let mut j = at + "ORDER".len();
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if word_at(sql, mask, "BY", j) {
            found = Some(at);
        }
        i = at + 1;
    }
    found
}

/// A SELECT statement split for paging
#[derive(Debug)]
struct SplitQuery {
    /// COUNT form, ORDER BY stripped
    count_sql: String,
    /// Text from the column list to the end, ORDER BY stripped
    body: String,
    /// Trailing ORDER BY clause as written, if present
    order_by: Option<String>,
    distinct: bool,
}

fn split_for_paging(sql: &str) -> Result<SplitQuery> {
    let unparsable =
        || Error::query_with_sql("unable to parse SELECT statement for paging", sql);

    let mask = top_level_mask(sql);
    let select_at = sql.len() - sql.trim_start().len();
    if !word_at(sql, &mask, "SELECT", select_at) {
        return Err(unparsable());
    }

    let columns_at = {
        let after = select_at + "SELECT".len();
        after
            + sql[after..]
                .find(|c: char| !c.is_whitespace())
                .ok_or_else(unparsable)?
    };
    let from_at = find_word(sql, &mask, "FROM", columns_at).ok_or_else(unparsable)?;
    let column_list = sql[columns_at..from_at].trim();
    if column_list.is_empty() {
        return Err(unparsable());
    }

    let order_at = find_last_order_by(sql, &mask, from_at);
    let body_end = order_at.unwrap_or(sql.len());
    let order_by = order_at.map(|at| sql[at..].trim_end().to_string());

    let distinct = word_at(sql, &mask, "DISTINCT", columns_at);
    let count_expr = if distinct {
        format!("COUNT({column_list}) ")
    } else {
        "COUNT(*) ".to_string()
    };

    let count_sql = format!(
        "{}{}{}",
        &sql[..columns_at],
        count_expr,
        sql[from_at..body_end].trim_end()
    );
    let body = sql[columns_at..body_end].trim_end().to_string();

    Ok(SplitQuery {
        count_sql,
        body,
        order_by,
        distinct,
    })
}

fn page_arg(n: u64) -> Result<Value> {
    let n = i64::try_from(n).map_err(|_| Error::parameter("paging argument out of range"))?;
    Ok(Value::Int64(n))
}

/// Synthesize count and page-fetch statements for `skip`/`take` over `sql`,
/// appending the paging arguments to `args`.
///
/// Row-number pages append `[skip, skip + take]`, OFFSET/FETCH pages append
/// `[skip, take]`, LIMIT/OFFSET pages append `[take, skip]`; markers in the
/// synthesized text reference the appended positions.
pub fn build_page_queries(
    dialect: Dialect,
    skip: u64,
    take: u64,
    sql: &str,
    args: &mut Vec<Value>,
) -> Result<PageQueries> {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    let split = split_for_paging(sql)?;
    let n = args.len();

    let page_sql = match dialect.page_idiom() {
        PageIdiom::RowNumber => {
            let order = split
                .order_by
                .as_deref()
                .unwrap_or_else(|| dialect.null_order_clause());
            let body = if split.distinct {
                format!("_inner.* FROM (SELECT {}) _inner", split.body)
            } else {
                split.body.clone()
            };
            let upper = skip
                .checked_add(take)
                .ok_or_else(|| Error::parameter("paging argument out of range"))?;
            args.push(page_arg(skip)?);
            args.push(page_arg(upper)?);
            format!(
                "SELECT * FROM (SELECT ROW_NUMBER() OVER ({order}) _rn, {body}) _paged \
                 WHERE _rn > @{n} AND _rn <= @{}",
                n + 1
            )
        }
        PageIdiom::OffsetFetch => {
            args.push(page_arg(skip)?);
            args.push(page_arg(take)?);
            let base = match split.order_by {
                Some(_) => sql.to_string(),
                None => format!("{sql}\n{}", dialect.null_order_clause()),
            };
            format!(
                "{base}\nOFFSET @{n} ROWS FETCH NEXT @{} ROWS ONLY",
                n + 1
            )
        }
        PageIdiom::LimitOffset => {
            args.push(page_arg(take)?);
            args.push(page_arg(skip)?);
            format!("{sql}\nLIMIT @{n} OFFSET @{}", n + 1)
        }
    };

    Ok(PageQueries {
        count_sql: split.count_sql,
        page_sql,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlServerVersion;

    #[test]
    fn test_split_basic_select() {
        let split =
            split_for_paging("SELECT a, b FROM t WHERE x = @0 ORDER BY a DESC").unwrap();
        assert_eq!(split.count_sql, "SELECT COUNT(*) FROM t WHERE x = @0");
        assert_eq!(split.body, "a, b FROM t WHERE x = @0");
        assert_eq!(split.order_by.as_deref(), Some("ORDER BY a DESC"));
        assert!(!split.distinct);
    }

    #[test]
    fn test_split_ignores_nested_subqueries() {
        let sql = "SELECT (SELECT name FROM u WHERE u.id = t.owner ORDER BY name) owner, b \
                   FROM t ORDER BY b";
        let split = split_for_paging(sql).unwrap();
        assert!(split.count_sql.starts_with("SELECT COUNT(*) FROM t"));
        assert_eq!(split.order_by.as_deref(), Some("ORDER BY b"));
    }

    #[test]
    fn test_split_ignores_keywords_in_string_literals() {
        let sql = "SELECT a FROM t WHERE note = 'pick FROM list ORDER BY hand'";
        let split = split_for_paging(sql).unwrap();
        assert_eq!(
            split.count_sql,
            "SELECT COUNT(*) FROM t WHERE note = 'pick FROM list ORDER BY hand'"
        );
        assert!(split.order_by.is_none());
    }

    #[test]
    fn test_split_ignores_comments_and_quoted_identifiers() {
        let sql = "SELECT a, \"from\" FROM t -- ORDER BY ignored\nWHERE a > 0";
        let split = split_for_paging(sql).unwrap();
        assert_eq!(split.body, "a, \"from\" FROM t -- ORDER BY ignored\nWHERE a > 0");
        assert!(split.order_by.is_none());
    }

    #[test]
    fn test_split_distinct_counts_distinct() {
        let split = split_for_paging("SELECT DISTINCT kind FROM t").unwrap();
        assert_eq!(split.count_sql, "SELECT COUNT(DISTINCT kind) FROM t");
        assert!(split.distinct);
    }

    #[test]
    fn test_split_word_boundaries() {
        let split = split_for_paging("SELECT from_date, ordering FROM t").unwrap();
        assert_eq!(split.count_sql, "SELECT COUNT(*) FROM t");
        assert!(split.order_by.is_none());
    }

    #[test]
    fn test_split_handles_multibyte_text() {
        let mut args = Vec::new();
        let queries = build_page_queries(
            Dialect::Sqlite,
            0,
            5,
            "SELECT a FROM t WHERE note = 'café' AND id > 0",
            &mut args,
        )
        .unwrap();
        assert_eq!(
            queries.count_sql,
            "SELECT COUNT(*) FROM t WHERE note = 'café' AND id > 0"
        );
        assert_eq!(
            queries.page_sql,
            "SELECT a FROM t WHERE note = 'café' AND id > 0\nLIMIT @0 OFFSET @1"
        );

        // multi-byte identifiers at top level around a trailing ORDER BY
        let split = split_for_paging("SELECT séance FROM réunion ORDER BY séance").unwrap();
        assert_eq!(split.count_sql, "SELECT COUNT(*) FROM réunion");
        assert_eq!(split.order_by.as_deref(), Some("ORDER BY séance"));
    }

    #[test]
    fn test_split_rejects_non_select() {
        assert!(split_for_paging("UPDATE t SET a = 1").is_err());
        assert!(split_for_paging("SELECT no_from_here").is_err());
    }

    #[test]
    fn test_limit_offset_appends_take_then_skip() {
        let mut args = vec![Value::Int64(9)];
        let queries = build_page_queries(
            Dialect::Sqlite,
            20,
            10,
            "SELECT a FROM t WHERE x = @0 ORDER BY a",
            &mut args,
        )
        .unwrap();
        assert_eq!(
            queries.page_sql,
            "SELECT a FROM t WHERE x = @0 ORDER BY a\nLIMIT @1 OFFSET @2"
        );
        assert_eq!(queries.count_sql, "SELECT COUNT(*) FROM t WHERE x = @0");
        assert_eq!(
            args,
            vec![Value::Int64(9), Value::Int64(10), Value::Int64(20)]
        );
    }

    #[test]
    fn test_offset_fetch_appends_skip_then_take() {
        let mut args = Vec::new();
        let queries = build_page_queries(
            Dialect::SqlServer(SqlServerVersion::V2012),
            20,
            10,
            "SELECT a FROM t ORDER BY a",
            &mut args,
        )
        .unwrap();
        assert_eq!(
            queries.page_sql,
            "SELECT a FROM t ORDER BY a\nOFFSET @0 ROWS FETCH NEXT @1 ROWS ONLY"
        );
        assert_eq!(args, vec![Value::Int64(20), Value::Int64(10)]);
    }

    #[test]
    fn test_offset_fetch_injects_null_ordering() {
        let mut args = Vec::new();
        let queries = build_page_queries(
            Dialect::SqlServer(SqlServerVersion::V2012),
            0,
            5,
            "SELECT a FROM t",
            &mut args,
        )
        .unwrap();
        assert_eq!(
            queries.page_sql,
            "SELECT a FROM t\nORDER BY (SELECT NULL)\nOFFSET @0 ROWS FETCH NEXT @1 ROWS ONLY"
        );
    }

    #[test]
    fn test_row_number_appends_skip_then_upper_bound() {
        let mut args = Vec::new();
        let queries = build_page_queries(
            Dialect::SqlServer(SqlServerVersion::V2008),
            20,
            10,
            "SELECT a, b FROM t ORDER BY a",
            &mut args,
        )
        .unwrap();
        assert_eq!(
            queries.page_sql,
            "SELECT * FROM (SELECT ROW_NUMBER() OVER (ORDER BY a) _rn, a, b FROM t) _paged \
             WHERE _rn > @0 AND _rn <= @1"
        );
        assert_eq!(args, vec![Value::Int64(20), Value::Int64(30)]);
    }

    #[test]
    fn test_row_number_without_order_uses_null_ordering() {
        let mut args = Vec::new();
        let queries = build_page_queries(
            Dialect::SqlServer(SqlServerVersion::V2008),
            0,
            3,
            "SELECT a FROM t",
            &mut args,
        )
        .unwrap();
        assert!(queries
            .page_sql
            .contains("ROW_NUMBER() OVER (ORDER BY (SELECT NULL))"));
    }

    #[test]
    fn test_row_number_wraps_distinct() {
        let mut args = Vec::new();
        let queries = build_page_queries(
            Dialect::SqlServer(SqlServerVersion::V2008),
            0,
            3,
            "SELECT DISTINCT kind FROM t ORDER BY kind",
            &mut args,
        )
        .unwrap();
        assert!(queries
            .page_sql
            .contains("_inner.* FROM (SELECT DISTINCT kind FROM t) _inner"));
        assert_eq!(queries.count_sql, "SELECT COUNT(DISTINCT kind) FROM t");
    }

    #[test]
    fn test_trailing_semicolon_tolerated() {
        let mut args = Vec::new();
        let queries =
            build_page_queries(Dialect::Sqlite, 0, 5, "SELECT a FROM t ORDER BY a;", &mut args)
                .unwrap();
        assert_eq!(
            queries.page_sql,
            "SELECT a FROM t ORDER BY a\nLIMIT @0 OFFSET @1"
        );
    }

    #[test]
    fn test_total_pages_arithmetic() {
        assert_eq!(total_pages(100, 10).unwrap(), 10);
        assert_eq!(total_pages(101, 10).unwrap(), 11);
        assert_eq!(total_pages(0, 10).unwrap(), 0);
        assert!(total_pages(10, 0).is_err());
    }
}
