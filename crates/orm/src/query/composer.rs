//! Token composition
//!
//! Assembles select, joins and the `WHERE` clause from a token stream and
//! numbers parameters in the order their conditions appear.

use crate::backends::{Query, QueryParameter};
use crate::error::{OrmError, OrmResult};

use super::tokens::{LinkKind, SqlToken};

pub struct SqlTokenComposer;

impl SqlTokenComposer {
    pub fn compose(tokens: &[SqlToken]) -> OrmResult<Query> {
        let select = tokens
            .iter()
            .find_map(|token| match token {
                SqlToken::Select { sql } => Some(sql.as_str()),
                _ => None,
            })
            .ok_or_else(|| OrmError::query("The query does not contain a select statement."))?;

        let mut sql = String::from(select);
        let joins: Vec<&str> = tokens
            .iter()
            .filter_map(|token| match token {
                SqlToken::Join { sql } => Some(sql.as_str()),
                _ => None,
            })
            .collect();
        if !joins.is_empty() {
            sql.push(' ');
            sql.push_str(&joins.join(" "));
        }

        let mut parameters = Vec::new();
        let mut conditions = tokens.iter().filter(|t| t.is_condition()).peekable();
        if conditions.peek().is_some() {
            sql.push_str(" WHERE ");
            let mut first_group = true;

            for token in conditions {
                match token {
                    SqlToken::Condition {
                        sql: fragment,
                        value,
                        field_type,
                    } => {
                        let name = format!("@p{}", parameters.len());
                        sql.push_str(&format!("{} {} ", fragment, name));
                        parameters.push(QueryParameter::new(
                            name,
                            value.clone(),
                            Some(field_type.clone()),
                        ));
                    }
                    SqlToken::ConditionLink {
                        kind: LinkKind::Start,
                        sql: link,
                    } => {
                        if first_group || link.is_empty() {
                            sql.push('(');
                        } else {
                            sql.push_str(&format!(" {} (", link));
                        }
                        first_group = false;
                    }
                    SqlToken::ConditionLink {
                        kind: LinkKind::End,
                        ..
                    } => sql.push(')'),
                    SqlToken::ConditionLink { sql: link, .. } => {
                        sql.push_str(&format!(" {} ", link));
                    }
                    SqlToken::Select { .. } | SqlToken::Join { .. } => {}
                }
            }
        }

        Ok(Query {
            command: normalize(&sql),
            parameters,
            entity: None,
        })
    }
}

fn normalize(sql: &str) -> String {
    let mut text = sql.trim().to_string();
    while text.contains("  ") {
        text = text.replace("  ", " ");
    }
    text.replace(" )", ")").replace("( ", "(")
}
