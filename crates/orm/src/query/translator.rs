//! Predicate translation
//!
//! Turns predicate expressions into [`SqlToken`]s, validating every field path
//! and constant against the entity metadata. Each predicate becomes one
//! parenthesized group; groups are joined with `AND`.

use crate::backends::DatabaseValue;
use crate::entity::EntityType;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, FieldType, MetadataResolver, ID_FIELD};

use super::expression::{Expression, Operator, Predicate};
use super::tokens::{LinkKind, SqlToken};

/// What the select token returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectKind {
    Rows,
    Count,
}

/// One predicate to translate: the parameter name and the expression body
#[derive(Debug, Clone, Copy)]
pub struct Filter<'e> {
    pub parameter: &'e str,
    pub body: &'e Expression,
}

impl<'e> Filter<'e> {
    pub fn new(parameter: &'e str, body: &'e Expression) -> Self {
        Self { parameter, body }
    }
}

impl<'e, T: EntityType> From<&'e Predicate<T>> for Filter<'e> {
    fn from(predicate: &'e Predicate<T>) -> Self {
        Filter::new(predicate.parameter().name(), predicate.body())
    }
}

pub struct QueryTranslator<'r> {
    resolver: &'r MetadataResolver,
}

struct JoinedPath {
    path: String,
    alias: String,
}

struct Translation<'a> {
    resolver: &'a MetadataResolver,
    root: &'a EntityMetadata,
    joins: Vec<JoinedPath>,
    join_tokens: Vec<SqlToken>,
    conditions: Vec<SqlToken>,
}

impl<'r> QueryTranslator<'r> {
    pub fn new(resolver: &'r MetadataResolver) -> Self {
        Self { resolver }
    }

    /// Tokens for a single typed predicate
    pub fn translate<T: EntityType>(&self, predicate: &Predicate<T>) -> OrmResult<Vec<SqlToken>> {
        let metadata = self.resolver.metadata_of::<T>()?;
        self.tokens(&metadata, SelectKind::Rows, &[Filter::from(predicate)])
    }

    /// Tokens for a select over `metadata` restricted by all `filters`
    pub fn tokens(
        &self,
        metadata: &EntityMetadata,
        kind: SelectKind,
        filters: &[Filter<'_>],
    ) -> OrmResult<Vec<SqlToken>> {
        let mut translation = Translation {
            resolver: self.resolver,
            root: metadata,
            joins: Vec::new(),
            join_tokens: Vec::new(),
            conditions: Vec::new(),
        };

        for (index, filter) in filters.iter().enumerate() {
            translation
                .conditions
                .push(SqlToken::start(if index == 0 { "" } else { "AND" }));
            translation.walk(filter.parameter, filter.body, true)?;
            translation.conditions.push(SqlToken::end());
        }

        let table = metadata.table();
        let select = match kind {
            SelectKind::Rows => format!("SELECT {}.* FROM {}", table, table),
            SelectKind::Count => format!("SELECT COUNT(*) FROM {}", table),
        };

        let mut tokens = vec![SqlToken::select(select)];
        tokens.extend(translation.join_tokens);
        tokens.extend(translation.conditions);
        Ok(tokens)
    }
}

impl<'a> Translation<'a> {
    fn walk(&mut self, parameter: &str, expression: &Expression, group_root: bool) -> OrmResult<()> {
        match expression {
            Expression::Binary { op, left, right } if op.is_logical() => {
                if !group_root {
                    self.conditions.push(SqlToken::start(""));
                }
                self.walk(parameter, left, false)?;
                let kind = if *op == Operator::And {
                    LinkKind::And
                } else {
                    LinkKind::Or
                };
                self.conditions.push(SqlToken::link(kind));
                self.walk(parameter, right, false)?;
                if !group_root {
                    self.conditions.push(SqlToken::end());
                }
                Ok(())
            }
            Expression::Binary { op, left, right } => match (left.as_ref(), right.as_ref()) {
                (Expression::Member(path), Expression::Constant(value)) => {
                    self.comparison(parameter, path, *op, value)
                }
                (Expression::Constant(value), Expression::Member(path)) => {
                    self.comparison(parameter, path, op.mirrored(), value)
                }
                _ => Err(OrmError::query(format!(
                    "'{}' must compare a field with a constant",
                    op
                ))),
            },
            // A bare boolean field reads as `field = true`
            Expression::Member(path) => {
                self.comparison(parameter, path, Operator::Equal, &DatabaseValue::Bool(true))
            }
            Expression::Constant(value) => Err(OrmError::query(format!(
                "constant {:?} is not a condition",
                value
            ))),
        }
    }

    fn comparison(
        &mut self,
        parameter: &str,
        path: &str,
        op: Operator,
        value: &DatabaseValue,
    ) -> OrmResult<()> {
        let relative = path
            .strip_prefix(parameter)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(|| {
                OrmError::query(format!("'{}' is not a field of parameter '{}'", path, parameter))
            })?;

        let (column, field_type) = self.resolve(relative)?;
        let null_operand = value.is_null();

        if null_operand && !matches!(op, Operator::Equal | Operator::NotEqual) {
            return Err(OrmError::query(format!(
                "'{}' cannot be compared to null with '{}'",
                relative, op
            )));
        }
        if op == Operator::Like && field_type != FieldType::String {
            return Err(OrmError::query(format!("LIKE requires a string field, '{}' is {}", relative, field_type)));
        }
        if !value.is_compatible_with(&field_type) {
            return Err(OrmError::query(format!(
                "'{}' is {} and cannot be compared with {:?}",
                relative, field_type, value
            )));
        }

        self.conditions.push(SqlToken::Condition {
            sql: format!("{} {}", column, op.as_sql(null_operand)),
            value: value.clone(),
            field_type,
        });
        Ok(())
    }

    /// Resolve a dotted path to a qualified column, joining through references
    fn resolve(&mut self, relative: &str) -> OrmResult<(String, FieldType)> {
        let segments: Vec<&str> = relative.split('.').collect();
        let (last, hops) = segments
            .split_last()
            .ok_or_else(|| OrmError::query("empty field path"))?;

        let mut metadata = self.resolver.metadata_by_name(self.root.name())?;
        let mut qualifier = self.root.table().to_string();

        for (depth, hop) in hops.iter().enumerate() {
            let field = metadata.require_field(hop)?;
            if !field.is_reference() {
                return Err(OrmError::query(format!(
                    "'{}' is not a reference and cannot be navigated",
                    hops[..=depth].join(".")
                )));
            }
            let target = self.resolver.metadata_by_name(field.target().unwrap_or_default())?;
            let joined_path = hops[..=depth].join(".");

            let alias = match self.joins.iter().find(|j| j.path == joined_path) {
                Some(existing) => existing.alias.clone(),
                None => {
                    let alias = format!("j{}", self.joins.len());
                    self.join_tokens.push(SqlToken::join(format!(
                        "LEFT JOIN {} {} ON {}.{} = {}.{}",
                        target.table(),
                        alias,
                        alias,
                        ID_FIELD,
                        qualifier,
                        field.name
                    )));
                    self.joins.push(JoinedPath {
                        path: joined_path,
                        alias: alias.clone(),
                    });
                    alias
                }
            };
            qualifier = alias;
            metadata = target;
        }

        let field = metadata.require_field(last)?;
        if field.is_collection() {
            return Err(OrmError::query(format!(
                "'{}' is a collection and cannot be compared",
                relative
            )));
        }
        Ok((format!("{}.{}", qualifier, field.name), field.field_type.clone()))
    }
}
