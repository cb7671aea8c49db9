// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! AST → OData `$filter` text, for the remote transport.

use super::ast::{ConstantValue, QueryNode, UnaryOperator};
use super::temporal::format_datetime;

pub fn to_odata(node: &QueryNode) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &QueryNode, out: &mut String) {
    match node {
        QueryNode::Constant(value) => out.push_str(&constant(value)),
        QueryNode::Member(name) => out.push_str(name),
        QueryNode::Binary { op, left, right } => {
            out.push('(');
            write_node(left, out);
            out.push(' ');
            out.push_str(op.keyword());
            out.push(' ');
            write_node(right, out);
            out.push(')');
        }
        QueryNode::Unary { op, operand } => {
            out.push_str(match op {
                UnaryOperator::Not => "not(",
                UnaryOperator::Negate => "-(",
            });
            write_node(operand, out);
            out.push(')');
        }
        QueryNode::Function { function, args } => {
            out.push_str(function.name());
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_node(arg, out);
            }
            out.push(')');
        }
        // Casts only exist at the storage layer.
        QueryNode::Convert { source, .. } => write_node(source, out),
    }
}

fn constant(value: &ConstantValue) -> String {
    match value {
        ConstantValue::Null => "null".to_string(),
        ConstantValue::Bool(b) => b.to_string(),
        ConstantValue::Integer(i) => i.to_string(),
        ConstantValue::Real(f) => {
            let text = f.to_string();
            if text.contains(['.', 'e', 'E']) || !f.is_finite() {
                text
            } else {
                format!("{text}.0")
            }
        }
        ConstantValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        ConstantValue::DateTime(dt) => format!("datetimeoffset'{}'", format_datetime(dt)),
        ConstantValue::Guid(g) => format!("guid'{g}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Function;
    use crate::query::parser::parse_filter;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_constants() {
        assert_eq!(to_odata(&QueryNode::null()), "null");
        assert_eq!(to_odata(&QueryNode::constant(true)), "true");
        assert_eq!(to_odata(&QueryNode::constant(5.0)), "5.0");
        assert_eq!(to_odata(&QueryNode::constant(5.25)), "5.25");
        assert_eq!(to_odata(&QueryNode::constant("it's")), "'it''s'");
        let dt = Utc.with_ymd_and_hms(2014, 7, 9, 0, 0, 0).unwrap();
        assert_eq!(
            to_odata(&QueryNode::constant(dt)),
            "datetimeoffset'2014-07-09T00:00:00.000Z'"
        );
    }

    #[test]
    fn test_functions_and_unary() {
        let node = QueryNode::call(
            Function::StartsWith,
            vec![QueryNode::member("name"), QueryNode::constant("k")],
        )
        .negate();
        assert_eq!(to_odata(&node), "not(startswith(name,'k'))");
    }

    #[test]
    fn test_rendered_filter_parses_back() {
        let source = "(substringof('a', title) and (price mul 2 ge 10.5)) or (updatedAt ge datetimeoffset'2014-07-09T00:00:00.000Z')";
        let parsed = parse_filter(source).unwrap();
        let rendered = to_odata(&parsed);
        assert_eq!(parse_filter(&rendered).unwrap(), parsed);
    }
}
