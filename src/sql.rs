use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Column order used when an INSERT lists no columns.
const SLOT_COLUMNS: [&str; 4] = ["subject_name", "message", "start_time", "photo"];

/// Parsed command from SQL input. Values stay raw text here; the schedule
/// service owns validation and time parsing.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSlot {
        subject_name: Option<String>,
        message: Option<String>,
        start_time: Option<String>,
        /// `data:<type>;base64,<bytes>`
        photo: Option<String>,
    },
    SelectActive {
        /// Resolve at this instant instead of the current time.
        as_of: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "slots" {
        return Err(SqlError::UnknownTable(table));
    }

    let columns: Vec<String> = if insert.columns.is_empty() {
        SLOT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| column_key(&c.to_string())).collect()
    };
    let values = extract_insert_values(insert)?;
    if values.len() > columns.len() {
        return Err(SqlError::WrongArity("slots", columns.len(), values.len()));
    }

    let (mut subject_name, mut message, mut start_time, mut photo) = (None, None, None, None);
    for (column, expr) in columns.iter().zip(values.iter()) {
        let value = parse_text_or_null(expr)?;
        match column.as_str() {
            "subject_name" | "name" => subject_name = value,
            "message" => message = value,
            "start_time" => start_time = value,
            "photo" => photo = value,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::InsertSlot {
        subject_name,
        message,
        start_time,
        photo,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    if table != "active_slot" {
        return Err(SqlError::UnknownTable(table));
    }

    let as_of = match &select.selection {
        Some(expr) => extract_as_of_filter(expr)?,
        None => None,
    };
    Ok(Command::SelectActive { as_of })
}

fn extract_as_of_filter(expr: &Expr) -> Result<Option<String>, SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("as_of") => parse_text_or_null(right),
        Expr::Nested(inner) => extract_as_of_filter(inner),
        _ => Err(SqlError::Unsupported(format!(
            "active_slot only supports WHERE as_of = <timestamp>, got {expr}"
        ))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Normalise a column as rendered by the parser: drop quotes and any qualifier.
fn column_key(raw: &str) -> String {
    raw.rsplit('.')
        .next()
        .unwrap_or(raw)
        .trim_matches('"')
        .to_lowercase()
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported(
                "one slot per INSERT; each is admitted on its own".into(),
            )),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s))
        | Some(Value::EscapedStringLiteral(s))
        | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_slot() {
        let sql = "INSERT INTO slots (subject_name, message, start_time) VALUES ('alice', 'Happy birthday', '2025-01-01T10:00:00Z')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertSlot {
                subject_name: Some("alice".into()),
                message: Some("Happy birthday".into()),
                start_time: Some("2025-01-01T10:00:00Z".into()),
                photo: None,
            }
        );
    }

    #[test]
    fn parse_insert_any_column_order() {
        let sql = r#"INSERT INTO slots ("start_time", photo, message, name) VALUES ('2025-01-01T10:00', 'data:image/png;base64,AAAA', 'hi', 'bob')"#;
        match parse_sql(sql).unwrap() {
            Command::InsertSlot {
                subject_name,
                message,
                start_time,
                photo,
            } => {
                assert_eq!(subject_name.as_deref(), Some("bob"));
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(start_time.as_deref(), Some("2025-01-01T10:00"));
                assert_eq!(photo.as_deref(), Some("data:image/png;base64,AAAA"));
            }
            cmd => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_positional() {
        let sql = "INSERT INTO slots VALUES ('bob', 'hi', 1735725600000, NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertSlot {
                start_time, photo, ..
            } => {
                assert_eq!(start_time.as_deref(), Some("1735725600000"));
                assert_eq!(photo, None);
            }
            cmd => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_missing_column_left_empty() {
        let sql = "INSERT INTO slots (subject_name, message) VALUES ('bob', 'hi')";
        match parse_sql(sql).unwrap() {
            Command::InsertSlot { start_time, .. } => assert_eq!(start_time, None),
            cmd => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_unknown_column_errors() {
        let sql = "INSERT INTO slots (subject_name, end_time) VALUES ('bob', '2025-01-01T11:00:00Z')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "end_time"));
    }

    #[test]
    fn parse_insert_multiple_rows_rejected() {
        let sql = "INSERT INTO slots (subject_name, message, start_time) VALUES ('a', 'm', '1'), ('b', 'm', '2')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_active_now() {
        let cmd = parse_sql("SELECT * FROM active_slot").unwrap();
        assert_eq!(cmd, Command::SelectActive { as_of: None });
    }

    #[test]
    fn parse_select_active_as_of() {
        let cmd = parse_sql("SELECT * FROM active_slot WHERE as_of = '2025-01-01T10:59:59Z'").unwrap();
        assert_eq!(
            cmd,
            Command::SelectActive {
                as_of: Some("2025-01-01T10:59:59Z".into())
            }
        );
    }

    #[test]
    fn parse_select_other_filter_errors() {
        let sql = "SELECT * FROM active_slot WHERE subject_name = 'bob'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM wishes"),
            Err(SqlError::UnknownTable(t)) if t == "wishes"
        ));
        assert!(matches!(
            parse_sql("INSERT INTO wishes VALUES ('a')"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_delete_unsupported() {
        assert!(matches!(
            parse_sql("DELETE FROM slots WHERE id = 'x'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
