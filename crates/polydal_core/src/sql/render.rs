//! Rendering of structured statements into dialect SQL text.

use super::SqlDialect;
use polydal_storage::{SortDirection, SqlStatement};

/// Renders `statement` for `dialect`.
///
/// Equal statements render to equal text, which is what the statement
/// cache keys on.
pub fn render(dialect: &dyn SqlDialect, statement: &SqlStatement) -> String {
    let mut params = Placeholders::new(dialect);
    match statement {
        SqlStatement::Select {
            table,
            columns,
            filter,
            order_by,
        } => {
            let projection = if columns.is_empty() {
                "*".to_string()
            } else {
                quoted_list(dialect, columns)
            };
            let mut sql = format!(
                "SELECT {projection} FROM {}{}",
                dialect.quote_identifier(table),
                where_clause(dialect, filter, &mut params)
            );
            if !order_by.is_empty() {
                let terms: Vec<String> = order_by
                    .iter()
                    .map(|(column, direction)| {
                        let direction = match direction {
                            SortDirection::Ascending => "ASC",
                            SortDirection::Descending => "DESC",
                        };
                        format!("{} {direction}", dialect.quote_identifier(column))
                    })
                    .collect();
                sql.push_str(" ORDER BY ");
                sql.push_str(&terms.join(", "));
            }
            sql
        }
        SqlStatement::Count { table, filter } => format!(
            "SELECT COUNT(*) AS {} FROM {}{}",
            dialect.quote_identifier("count"),
            dialect.quote_identifier(table),
            where_clause(dialect, filter, &mut params)
        ),
        SqlStatement::Insert { table, columns } => {
            let values: Vec<String> = columns.iter().map(|_| params.advance()).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote_identifier(table),
                quoted_list(dialect, columns),
                values.join(", ")
            )
        }
        SqlStatement::Update {
            table,
            assignments,
            filter,
        } => {
            let set: Vec<String> = assignments
                .iter()
                .map(|column| format!("{} = {}", dialect.quote_identifier(column), params.advance()))
                .collect();
            format!(
                "UPDATE {} SET {}{}",
                dialect.quote_identifier(table),
                set.join(", "),
                where_clause(dialect, filter, &mut params)
            )
        }
        SqlStatement::Delete { table, filter } => format!(
            "DELETE FROM {}{}",
            dialect.quote_identifier(table),
            where_clause(dialect, filter, &mut params)
        ),
    }
}

struct Placeholders<'a> {
    dialect: &'a dyn SqlDialect,
    index: usize,
}

impl<'a> Placeholders<'a> {
    fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self { dialect, index: 0 }
    }

    fn advance(&mut self) -> String {
        self.index += 1;
        self.dialect.placeholder(self.index)
    }
}

fn quoted_list(dialect: &dyn SqlDialect, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(dialect: &dyn SqlDialect, filter: &[String], params: &mut Placeholders<'_>) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = filter
        .iter()
        .map(|column| format!("{} = {}", dialect.quote_identifier(column), params.advance()))
        .collect();
    format!(" WHERE {}", terms.join(" AND "))
}
