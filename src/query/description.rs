// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Structured table query.
//!
//! A [`QueryDescription`] is the single query shape shared by the remote
//! transport (rendered back to OData with [`QueryDescription::to_query_string`])
//! and the local stores (compiled to SQL or evaluated in memory).
//!
//! # Example
//!
//! ```rust
//! use offline_sync::query::{QueryDescription, QueryNode};
//!
//! let query = QueryDescription::new("todo")
//!     .with_filter(QueryNode::member("done").equals(QueryNode::constant(false)))
//!     .order_by("createdAt")
//!     .take(50);
//!
//! assert_eq!(
//!     query.to_query_string(),
//!     "$filter=(done eq false)&$orderby=createdAt&$top=50"
//! );
//!
//! let parsed = QueryDescription::parse("todo", "$filter=done eq false&$orderby=createdAt&$top=50").unwrap();
//! assert_eq!(parsed, query);
//! ```

use super::ast::QueryNode;
use super::error::QueryError;
use super::odata;
use super::parser::{parse_filter, parse_order_by};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByNode {
    pub expression: QueryNode,
    pub direction: SortDirection,
}

impl OrderByNode {
    pub fn ascending(member: impl Into<String>) -> Self {
        Self {
            expression: QueryNode::member(member),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(member: impl Into<String>) -> Self {
        Self {
            expression: QueryNode::member(member),
            direction: SortDirection::Descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescription {
    pub table_name: String,
    pub filter: Option<QueryNode>,
    pub ordering: Vec<OrderByNode>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub include_total_count: bool,
    /// Projected columns. Empty means all columns.
    pub selection: Vec<String>,
}

impl QueryDescription {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            filter: None,
            ordering: Vec::new(),
            skip: None,
            take: None,
            include_total_count: false,
            selection: Vec::new(),
        }
    }

    /// Parses an OData query string such as
    /// `$filter=age gt 3&$orderby=name desc&$skip=5&$top=10&$select=name,age&$inlinecount=allpages`.
    ///
    /// Parameters not starting with `$` are ignored.
    pub fn parse(table_name: impl Into<String>, query: &str) -> Result<Self, QueryError> {
        let mut description = Self::new(table_name);
        let query = query.strip_prefix('?').unwrap_or(query);

        for part in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            match key.trim() {
                "$filter" => description.filter = Some(parse_filter(value)?),
                "$orderby" => description.ordering = parse_order_by(value)?,
                "$skip" => description.skip = Some(parse_count(key, value)?),
                "$top" => description.take = Some(parse_count(key, value)?),
                "$select" => {
                    description.selection = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect();
                }
                "$inlinecount" => description.include_total_count = value.trim() == "allpages",
                k if k.starts_with('$') => {
                    return Err(QueryError::Invalid(format!("unknown query option '{k}'")));
                }
                _ => {}
            }
        }
        Ok(description)
    }

    /// Renders the query as an OData query string (no leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(filter) = &self.filter {
            parts.push(format!("$filter={}", odata::to_odata(filter)));
        }
        if !self.ordering.is_empty() {
            let orderings: Vec<String> = self
                .ordering
                .iter()
                .map(|o| match o.direction {
                    SortDirection::Ascending => odata::to_odata(&o.expression),
                    SortDirection::Descending => format!("{} desc", odata::to_odata(&o.expression)),
                })
                .collect();
            parts.push(format!("$orderby={}", orderings.join(",")));
        }
        if let Some(skip) = self.skip {
            parts.push(format!("$skip={skip}"));
        }
        if let Some(take) = self.take {
            parts.push(format!("$top={take}"));
        }
        if !self.selection.is_empty() {
            parts.push(format!("$select={}", self.selection.join(",")));
        }
        if self.include_total_count {
            parts.push("$inlinecount=allpages".to_string());
        }
        parts.join("&")
    }

    /// ANDs `node` onto the existing filter (or sets it).
    #[must_use]
    pub fn with_filter(mut self, node: QueryNode) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(node),
            None => node,
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, member: impl Into<String>) -> Self {
        self.ordering.push(OrderByNode::ascending(member));
        self
    }

    #[must_use]
    pub fn order_by_descending(mut self, member: impl Into<String>) -> Self {
        self.ordering.push(OrderByNode::descending(member));
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }
}

fn parse_count(key: &str, value: &str) -> Result<u64, QueryError> {
    value
        .trim()
        .parse()
        .map_err(|_| QueryError::Invalid(format!("{key} must be a non-negative integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::BinaryOperator;

    #[test]
    fn test_parse_full_query() {
        let q = QueryDescription::parse(
            "test",
            "$filter=name eq 'Alice' and age gt 3&$orderby=String desc,id&$skip=5&$top=3&$select=name,age&$inlinecount=allpages",
        )
        .unwrap();

        assert_eq!(q.table_name, "test");
        assert!(matches!(q.filter, Some(QueryNode::Binary { op: BinaryOperator::And, .. })));
        assert_eq!(q.ordering.len(), 2);
        assert_eq!(q.ordering[0].direction, SortDirection::Descending);
        assert_eq!(q.skip, Some(5));
        assert_eq!(q.take, Some(3));
        assert_eq!(q.selection, vec!["name", "age"]);
        assert!(q.include_total_count);
    }

    #[test]
    fn test_parse_leading_question_mark_and_custom_params() {
        let q = QueryDescription::parse("t", "?$top=1&__includeDeleted=true").unwrap();
        assert_eq!(q.take, Some(1));
    }

    #[test]
    fn test_parse_bad_top() {
        assert!(matches!(
            QueryDescription::parse("t", "$top=-1"),
            Err(QueryError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_unknown_option() {
        assert!(QueryDescription::parse("t", "$expand=x").is_err());
    }

    #[test]
    fn test_filter_error_position_is_relative_to_expression() {
        let err = QueryDescription::parse("t", "$filter=(2 ! ??)").unwrap_err();
        assert_eq!(err.position(), Some(3));
    }

    #[test]
    fn test_to_query_string_order() {
        let q = QueryDescription::new("t")
            .with_filter(QueryNode::member("a").equals(QueryNode::constant(1)))
            .order_by_descending("b")
            .order_by("c")
            .skip(2)
            .take(4)
            .select(["a", "b"])
            .with_total_count();
        assert_eq!(
            q.to_query_string(),
            "$filter=(a eq 1)&$orderby=b desc,c&$skip=2&$top=4&$select=a,b&$inlinecount=allpages"
        );
    }

    #[test]
    fn test_with_filter_ands() {
        let q = QueryDescription::new("t")
            .with_filter(QueryNode::member("a").equals(QueryNode::constant(1)))
            .with_filter(QueryNode::member("b").equals(QueryNode::constant(2)));
        assert_eq!(q.to_query_string(), "$filter=((a eq 1) and (b eq 2))");
    }
}
