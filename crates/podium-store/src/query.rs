//! Minimal fluent query builder.
//!
//! Builds the `JOIN`/`WHERE`/`ORDER BY`/`LIMIT` tail of an entity select
//! with positional `$n` placeholders. Conditions written with `?` markers
//! are renumbered as they are added, so composed queries stay positional.

use uuid::Uuid;

/// A bindable query argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Bool(bool),
    Uuid(Uuid),
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Uuid> for Arg {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

/// Fluent select-tail builder.
#[derive(Debug, Clone, Default)]
pub struct Query {
    joins: Vec<String>,
    conds: Vec<String>,
    args: Vec<Arg>,
    order: Option<String>,
    limit: Option<i64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw condition. Each `?` marker binds the next argument.
    pub fn where_sql(mut self, expr: &str, args: impl IntoIterator<Item = Arg>) -> Self {
        let mut rendered = String::with_capacity(expr.len() + 4);
        let mut next = self.args.len() + 1;
        for ch in expr.chars() {
            if ch == '?' {
                rendered.push('$');
                rendered.push_str(&next.to_string());
                next += 1;
            } else {
                rendered.push(ch);
            }
        }
        self.conds.push(rendered);
        self.args.extend(args);
        self
    }

    /// Add an equality condition on a column.
    pub fn eq(self, column: &str, value: impl Into<Arg>) -> Self {
        let expr = format!("{column} = ?");
        self.where_sql(&expr, [value.into()])
    }

    /// Add a join clause, e.g. `join("frontends", "frontends.id = meetings.frontend_id")`.
    pub fn join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(format!(" JOIN {table} ON {on}"));
        self
    }

    pub fn order_by(mut self, expr: &str) -> Self {
        self.order = Some(expr.to_string());
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Rendered join clauses.
    pub fn related(&self) -> String {
        self.joins.concat()
    }

    /// Rendered `WHERE` clause, or empty when unconstrained.
    pub fn where_clause(&self) -> String {
        if self.conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conds.join(" AND "))
        }
    }

    /// Rendered `ORDER BY` / `LIMIT` tail.
    pub fn tail(&self) -> String {
        let mut out = String::new();
        if let Some(order) = &self.order {
            out.push_str(" ORDER BY ");
            out.push_str(order);
        }
        if let Some(limit) = self.limit {
            out.push_str(" LIMIT ");
            out.push_str(&limit.to_string());
        }
        out
    }

    /// Render the full statement for a select prefix.
    pub fn statement(&self, select: &str) -> String {
        format!(
            "{select}{}{}{}",
            self.related(),
            self.where_clause(),
            self.tail()
        )
    }

    /// Bind the collected arguments onto a prepared `query_as`.
    pub fn bind_to<'q, O>(
        &self,
        mut query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
        for arg in &self.args {
            query = match arg {
                Arg::Str(v) => query.bind(v.clone()),
                Arg::Int(v) => query.bind(*v),
                Arg::Bool(v) => query.bind(*v),
                Arg::Uuid(v) => query.bind(*v),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_renders_bare_select() {
        let q = Query::new();
        assert_eq!(q.statement("SELECT * FROM backends"), "SELECT * FROM backends");
    }

    #[test]
    fn eq_conditions_are_numbered() {
        let q = Query::new().eq("host", "https://node/").eq("node_state", "ready");
        assert_eq!(
            q.statement("SELECT * FROM backends"),
            "SELECT * FROM backends WHERE host = $1 AND node_state = $2"
        );
    }

    #[test]
    fn raw_where_renumbers_markers() {
        let q = Query::new()
            .eq("admin_state", "ready")
            .where_sql("host ILIKE ?", [Arg::from("https://node%")]);
        assert_eq!(
            q.where_clause(),
            " WHERE admin_state = $1 AND host ILIKE $2"
        );
    }

    #[test]
    fn join_order_and_limit() {
        let q = Query::new()
            .join("frontends", "frontends.id = meetings.frontend_id")
            .eq("frontends.key", "tenant-a")
            .order_by("meetings.created_at ASC")
            .limit(10);
        assert_eq!(
            q.statement("SELECT meetings.* FROM meetings"),
            "SELECT meetings.* FROM meetings \
             JOIN frontends ON frontends.id = meetings.frontend_id \
             WHERE frontends.key = $1 \
             ORDER BY meetings.created_at ASC LIMIT 10"
        );
    }
}
