//! Parameterized SQL statements

use std::fmt;

use crate::row::Value;

/// SQL text with positional (`$1`, `$2`, ...) parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Single-line form of the SQL, used as the span name.
    pub fn summary(&self) -> String {
        self.sql.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_in_order() {
        let stmt = Statement::new("SELECT city FROM destination WHERE country = $1 AND city = $2")
            .bind("France")
            .bind("Paris");
        assert_eq!(
            stmt.params(),
            [Value::Text("France".into()), Value::Text("Paris".into())]
        );
    }

    #[test]
    fn summary_collapses_whitespace() {
        let stmt = Statement::new(
            r#"
            SELECT country, city
            FROM destination
            "#,
        );
        assert_eq!(stmt.summary(), "SELECT country, city FROM destination");
    }
}
