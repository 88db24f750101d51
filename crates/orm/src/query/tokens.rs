//! SQL tokens
//!
//! The intermediate form between a translated predicate and the final
//! statement text.

use crate::backends::DatabaseValue;
use crate::metadata::FieldType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Opens a parenthesized group
    Start,
    /// Closes a group
    End,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlToken {
    /// The base query, `SELECT ... FROM ...`
    Select { sql: String },
    /// A join resolving an association path
    Join { sql: String },
    /// Column and operator; the value becomes a parameter
    Condition {
        sql: String,
        value: DatabaseValue,
        field_type: FieldType,
    },
    /// Grouping or boolean link between conditions. For `Start` the SQL is the
    /// operator joining the group to the previous one, empty for nested groups.
    ConditionLink { kind: LinkKind, sql: String },
}

impl SqlToken {
    pub fn select(sql: impl Into<String>) -> Self {
        SqlToken::Select { sql: sql.into() }
    }

    pub fn join(sql: impl Into<String>) -> Self {
        SqlToken::Join { sql: sql.into() }
    }

    pub fn start(link: &str) -> Self {
        SqlToken::ConditionLink {
            kind: LinkKind::Start,
            sql: link.to_string(),
        }
    }

    pub fn end() -> Self {
        SqlToken::ConditionLink {
            kind: LinkKind::End,
            sql: String::new(),
        }
    }

    pub fn link(kind: LinkKind) -> Self {
        let sql = match kind {
            LinkKind::And => "AND",
            LinkKind::Or => "OR",
            LinkKind::Start | LinkKind::End => "",
        };
        SqlToken::ConditionLink {
            kind,
            sql: sql.to_string(),
        }
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, SqlToken::Condition { .. } | SqlToken::ConditionLink { .. })
    }
}
