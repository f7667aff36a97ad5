//! SQL construction shared by the relational adapters.
//!
//! Statements are always parameterized; the inline-literal rendering here
//! exists only for diagnostic previews and is never executed.

use super::{Row, WritePlan};
use serde_json::Value as JsonValue;

/// Relational dialect differences: identifier quoting and placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Postgres,
    MySql,
    SqlServer,
}

impl Dialect {
    fn quote(self, identifier: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{identifier}\""),
            Dialect::MySql => format!("`{identifier}`"),
            Dialect::SqlServer => format!("[{identifier}]"),
        }
    }

    /// 1-based positional placeholder.
    fn placeholder(self, position: usize) -> String {
        match self {
            Dialect::Postgres => format!("${position}"),
            Dialect::MySql => "?".to_string(),
            Dialect::SqlServer => format!("@P{position}"),
        }
    }
}

/// Column names of a record, in stable (map) order.
pub(crate) fn column_names(record: &Row) -> Vec<String> {
    record.keys().cloned().collect()
}

/// Builds the parameterized insert or upsert statement for a batch record
/// with the given column set.
pub(crate) fn write_statement(dialect: Dialect, plan: &WritePlan, columns: &[String]) -> String {
    let placeholders = (1..=columns.len())
        .map(|i| dialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ");
    statement_with_values(dialect, plan, columns, &placeholders)
}

fn statement_with_values(
    dialect: Dialect,
    plan: &WritePlan,
    columns: &[String],
    values_list: &str,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote(&plan.table),
        column_list,
        values_list
    );

    // Upserts need key columns to identify the existing row; without them
    // the statement degrades to a plain insert
    if !plan.update_on_conflict || plan.conflict_columns.is_empty() {
        return insert;
    }

    match dialect {
        Dialect::Postgres => {
            let conflict_list = plan
                .conflict_columns
                .iter()
                .map(|c| dialect.quote(c))
                .collect::<Vec<_>>()
                .join(", ");
            let assignments = non_key_columns(columns, plan)
                .map(|c| format!("{q} = EXCLUDED.{q}", q = dialect.quote(c)))
                .collect::<Vec<_>>()
                .join(", ");
            if assignments.is_empty() {
                // Every column is a key column; nothing to update
                format!("{insert} ON CONFLICT ({conflict_list}) DO NOTHING")
            } else {
                format!("{insert} ON CONFLICT ({conflict_list}) DO UPDATE SET {assignments}")
            }
        }
        Dialect::MySql => {
            let mut assignments = non_key_columns(columns, plan)
                .map(|c| format!("{q} = VALUES({q})", q = dialect.quote(c)))
                .collect::<Vec<_>>();
            if assignments.is_empty() {
                // ON DUPLICATE KEY UPDATE requires at least one assignment;
                // a self-assignment makes the conflict a no-op
                if let Some(first) = columns.first() {
                    let q = dialect.quote(first);
                    assignments.push(format!("{q} = {q}"));
                }
            }
            format!(
                "{insert} ON DUPLICATE KEY UPDATE {}",
                assignments.join(", ")
            )
        }
        // T-SQL has no single-statement upsert short of MERGE; conflicting
        // rows surface as constraint violations on the plain insert
        Dialect::SqlServer => insert,
    }
}

fn non_key_columns<'a>(
    columns: &'a [String],
    plan: &'a WritePlan,
) -> impl Iterator<Item = &'a String> {
    columns
        .iter()
        .filter(move |c| !plan.conflict_columns.contains(c))
}

/// Renders the write statement with inline literals for diagnostics.
pub(crate) fn render_preview(dialect: Dialect, plan: &WritePlan, record: &Row) -> String {
    let columns = column_names(record);
    let values_list = columns
        .iter()
        .map(|c| literal(record.get(c).unwrap_or(&JsonValue::Null)))
        .collect::<Vec<_>>()
        .join(", ");
    let statement = statement_with_values(dialect, plan, &columns, &values_list);
    format!("{statement};")
}

/// SQL literal rendering for previews.
pub(crate) fn literal(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// True for statements that produce a row set.
pub(crate) fn is_select_like(query: &str) -> bool {
    let head = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();
    matches!(head.as_str(), "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "VALUES")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(upsert: bool, conflict: &[&str]) -> WritePlan {
        WritePlan {
            table: "users".to_string(),
            update_on_conflict: upsert,
            conflict_columns: conflict.iter().map(ToString::to_string).collect(),
        }
    }

    fn row(pairs: &[(&str, JsonValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_postgres_insert_statement() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let sql = write_statement(Dialect::Postgres, &plan(false, &[]), &columns);
        assert_eq!(sql, r#"INSERT INTO "users" ("id", "name") VALUES ($1, $2)"#);
    }

    #[test]
    fn test_postgres_upsert_excludes_key_columns() {
        let columns = vec!["id".to_string(), "name".to_string(), "email".to_string()];
        let sql = write_statement(Dialect::Postgres, &plan(true, &["id"]), &columns);
        assert!(sql.contains(r#"ON CONFLICT ("id") DO UPDATE SET"#));
        assert!(sql.contains(r#""name" = EXCLUDED."name""#));
        assert!(sql.contains(r#""email" = EXCLUDED."email""#));
        assert!(!sql.contains(r#""id" = EXCLUDED."id""#));
    }

    #[test]
    fn test_postgres_upsert_all_key_columns_does_nothing() {
        let columns = vec!["id".to_string()];
        let sql = write_statement(Dialect::Postgres, &plan(true, &["id"]), &columns);
        assert!(sql.ends_with(r#"ON CONFLICT ("id") DO NOTHING"#));
    }

    #[test]
    fn test_upsert_without_conflict_columns_is_plain_insert() {
        let columns = vec!["id".to_string(), "name".to_string()];
        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::SqlServer] {
            let sql = write_statement(dialect, &plan(true, &[]), &columns);
            assert!(!sql.contains("ON CONFLICT"), "{sql}");
            assert!(!sql.contains("ON DUPLICATE KEY"), "{sql}");
            assert!(sql.starts_with("INSERT INTO"), "{sql}");
        }
        // The diagnostic preview degrades the same way
        let preview = render_preview(Dialect::Postgres, &plan(true, &[]), &row(&[("id", json!(1))]));
        assert!(!preview.contains("ON CONFLICT"), "{preview}");
    }

    #[test]
    fn test_mysql_insert_statement() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let sql = write_statement(Dialect::MySql, &plan(false, &[]), &columns);
        assert_eq!(sql, "INSERT INTO `users` (`id`, `name`) VALUES (?, ?)");
    }

    #[test]
    fn test_mysql_upsert_uses_values_function() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let sql = write_statement(Dialect::MySql, &plan(true, &["id"]), &columns);
        assert!(sql.contains("ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"));
        assert!(!sql.contains("`id` = VALUES(`id`)"));
    }

    #[test]
    fn test_sqlserver_insert_statement() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let sql = write_statement(Dialect::SqlServer, &plan(false, &[]), &columns);
        assert_eq!(sql, "INSERT INTO [users] ([id], [name]) VALUES (@P1, @P2)");
    }

    #[test]
    fn test_sqlserver_upsert_falls_back_to_insert() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let sql = write_statement(Dialect::SqlServer, &plan(true, &["id"]), &columns);
        assert_eq!(sql, "INSERT INTO [users] ([id], [name]) VALUES (@P1, @P2)");
    }

    #[test]
    fn test_preview_inlines_literals() {
        let record = row(&[
            ("id", json!(7)),
            ("name", json!("O'Brien")),
            ("active", json!(true)),
        ]);
        let preview = render_preview(Dialect::Postgres, &plan(false, &[]), &record);
        assert!(preview.contains("7"));
        assert!(preview.contains("'O''Brien'"));
        assert!(preview.contains("TRUE"));
        assert!(preview.ends_with(';'));
        assert!(!preview.contains('$'));
    }

    #[test]
    fn test_preview_upsert_shows_on_conflict() {
        let record = row(&[("id", json!(1)), ("name", json!("Ada"))]);
        let upsert = render_preview(Dialect::Postgres, &plan(true, &["id"]), &record);
        assert!(upsert.contains("ON CONFLICT"));
        let insert = render_preview(Dialect::Postgres, &plan(false, &[]), &record);
        assert!(!insert.contains("ON CONFLICT"));
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(literal(&json!(null)), "NULL");
        assert_eq!(literal(&json!(3.5)), "3.5");
        assert_eq!(literal(&json!("a'b")), "'a''b'");
        assert_eq!(literal(&json!({"k": 1})), r#"'{"k":1}'"#);
    }

    #[test]
    fn test_is_select_like() {
        assert!(is_select_like("SELECT 1"));
        assert!(is_select_like("  with t as (select 1) select * from t"));
        assert!(is_select_like("SHOW TABLES"));
        assert!(!is_select_like("INSERT INTO t VALUES (1)"));
        assert!(!is_select_like("UPDATE t SET a = 1"));
    }
}
