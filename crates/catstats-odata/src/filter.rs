//! `$filter` - a single `field op literal` comparison
//!
//! Parsing happens in two steps. [`parse_comparison`] is purely syntactic and
//! is shared with the expand-option grammar, where the target entity is only
//! known later. [`bind_comparison`] then validates the field against an
//! entity binding and coerces the literal to the declared field type.

use std::fmt;

use catstats_core::{CompareOp, Entity, EntityBinding, FieldType, Predicate, Value};

use crate::error::{ParseError, ParseResult};
use crate::lexer::{tokenize, Token};
use crate::time::parse_timestamp;

/// Literal as written in the query string
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    /// Numeric text, kept verbatim until the field type is known
    Number(String),
    Bool(bool),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Number(n) => f.write_str(n),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// Syntactic comparison, not yet validated against a schema
#[derive(Debug, Clone, PartialEq)]
pub struct RawComparison {
    pub field: String,
    pub op: CompareOp,
    pub literal: Literal,
}

/// Comparison bound to a schema field, with a typed value
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Logical field name
    pub field: String,
    /// Backend column
    pub column: String,
    pub field_type: FieldType,
    pub op: CompareOp,
    pub value: Value,
}

impl Comparison {
    /// Evaluate against a canonical record
    pub fn matches(&self, record: &Entity) -> bool {
        self.op.evaluate(record.value(&self.field), &self.value)
    }

    /// Equivalent primary-store predicate
    pub fn to_predicate(&self) -> Predicate {
        Predicate::new(self.column.clone(), self.op, self.value.clone())
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.field, self.op)?;
        match &self.value {
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Double(v) => write!(f, "{:?}", v),
            other => write!(f, "{}", other),
        }
    }
}

fn syntax(input: &str, reason: &str) -> ParseError {
    ParseError::InvalidFilterSyntax(format!("{} in '{}'", reason, input))
}

/// Parse `field op literal`, optionally wrapped in parentheses
pub fn parse_comparison(input: &str) -> ParseResult<RawComparison> {
    let mut tokens = tokenize(input).map_err(ParseError::InvalidFilterSyntax)?;

    while tokens.first() == Some(&Token::LParen) && tokens.last() == Some(&Token::RParen) {
        tokens.remove(0);
        tokens.pop();
    }

    let [field, op, literal] = tokens.as_slice() else {
        return Err(syntax(input, "expected 'field op value'"));
    };

    let Token::Ident(field) = field else {
        return Err(syntax(input, "expected a field name"));
    };
    let op = match op {
        Token::Ident(keyword) => CompareOp::parse(keyword),
        _ => None,
    }
    .ok_or_else(|| syntax(input, "expected one of eq, ne, gt, ge, lt, le"))?;

    let literal = match literal {
        Token::Str(s) => Literal::String(s.clone()),
        Token::Number(n) => Literal::Number(n.clone()),
        Token::Ident(word) => match word.to_ascii_lowercase().as_str() {
            "true" => Literal::Bool(true),
            "false" => Literal::Bool(false),
            "null" => Literal::Null,
            _ => return Err(syntax(input, "expected a literal value")),
        },
        _ => return Err(syntax(input, "expected a literal value")),
    };

    Ok(RawComparison {
        field: field.clone(),
        op,
        literal,
    })
}

/// Coerce a literal to a field type; `None` when it cannot represent one
pub fn coerce_literal(literal: &Literal, field_type: FieldType) -> Option<Value> {
    match (literal, field_type) {
        (Literal::Null, _) => Some(Value::Null),
        (Literal::String(s), FieldType::String) => Some(Value::String(s.clone())),
        (Literal::Bool(b), FieldType::Bool) => Some(Value::Bool(*b)),
        (Literal::Number(n), FieldType::Int32) => n.parse().ok().map(Value::Int32),
        (Literal::Number(n), FieldType::Int64 | FieldType::Timestamp) => {
            n.parse().ok().map(Value::Int64)
        }
        (Literal::Number(n), FieldType::Double) => n.parse().ok().map(Value::Double),
        (Literal::String(s), FieldType::Timestamp) => parse_timestamp(s).ok().map(Value::Int64),
        _ => None,
    }
}

/// Validate a comparison against an entity and type its literal
pub fn bind_comparison(raw: &RawComparison, entity: &EntityBinding) -> ParseResult<Comparison> {
    let binding = entity
        .field(&raw.field)
        .ok_or_else(|| ParseError::unknown_field(&entity.name, &raw.field))?;
    if !binding.filterable {
        return Err(ParseError::NotFilterable(raw.field.clone()));
    }

    let value = coerce_literal(&raw.literal, binding.field_type).ok_or_else(|| {
        ParseError::InvalidLiteral {
            field: raw.field.clone(),
            literal: raw.literal.to_string(),
            expected: binding.field_type,
        }
    })?;

    Ok(Comparison {
        field: binding.logical_name.clone(),
        column: binding.backend_column.clone(),
        field_type: binding.field_type,
        op: raw.op,
        value,
    })
}

/// Parse and bind a `$filter` expression
pub fn parse_filter(input: &str, entity: &EntityBinding) -> ParseResult<Comparison> {
    bind_comparison(&parse_comparison(input)?, entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::{CAT, ITEM};
    use catstats_core::SchemaRegistry;
    use rstest::rstest;

    fn item() -> EntityBinding {
        SchemaRegistry::builtin().entity(ITEM).cloned().unwrap()
    }

    fn cat() -> EntityBinding {
        SchemaRegistry::builtin().entity(CAT).cloned().unwrap()
    }

    #[test]
    fn test_parse_string_equality() {
        let cmp = parse_filter("itemType eq 'TYPE1'", &item()).unwrap();
        assert_eq!(cmp.field, "itemType");
        assert_eq!(cmp.column, "item_type");
        assert_eq!(cmp.op, CompareOp::Eq);
        assert_eq!(cmp.value, Value::from("TYPE1"));
        assert_eq!(cmp.to_predicate().to_string(), r#"item_type == "TYPE1""#);
    }

    #[rstest]
    #[case("price gt 10", CompareOp::Gt, Value::Double(10.0))]
    #[case("quantity le 3", CompareOp::Le, Value::Int32(3))]
    #[case("inStock ne false", CompareOp::Ne, Value::Bool(false))]
    #[case("createdAt ge 1704067200000", CompareOp::Ge, Value::Int64(1_704_067_200_000))]
    #[case("createdAt lt '2024-01-01'", CompareOp::Lt, Value::Int64(1_704_067_200_000))]
    #[case("name eq null", CompareOp::Eq, Value::Null)]
    #[case("(price lt 2.5)", CompareOp::Lt, Value::Double(2.5))]
    fn test_literal_coercion(#[case] input: &str, #[case] op: CompareOp, #[case] value: Value) {
        let cmp = parse_filter(input, &item()).unwrap();
        assert_eq!(cmp.op, op);
        assert_eq!(cmp.value, value);
    }

    #[rstest]
    #[case("itemType eq 5")]
    #[case("price eq 'cheap'")]
    #[case("quantity eq 2.5")]
    #[case("inStock eq 1")]
    fn test_literal_type_mismatch(#[case] input: &str) {
        assert!(matches!(
            parse_filter(input, &item()),
            Err(ParseError::InvalidLiteral { .. })
        ));
    }

    #[rstest]
    #[case("itemType")]
    #[case("itemType eq")]
    #[case("itemType like 'x'")]
    #[case("itemType eq 'a' and price gt 1")]
    #[case("'x' eq itemType")]
    #[case("itemType eq 'open")]
    fn test_syntax_errors(#[case] input: &str) {
        assert!(matches!(
            parse_filter(input, &item()),
            Err(ParseError::InvalidFilterSyntax(_))
        ));
    }

    #[test]
    fn test_unknown_and_unfilterable_fields() {
        assert_eq!(
            parse_filter("colour eq 'red'", &item()),
            Err(ParseError::UnknownField {
                entity: "Item".into(),
                field: "colour".into()
            })
        );

        let mut entity = item();
        entity.fields[1].filterable = false;
        assert_eq!(
            parse_filter("name eq 'x'", &entity),
            Err(ParseError::NotFilterable("name".into()))
        );
    }

    #[test]
    fn test_matches_record() {
        let row = Entity::new("Cat")
            .with("breed", "siamese")
            .with("age", 4)
            .with("weight", 3.5);

        let entity = cat();
        assert!(parse_filter("breed eq 'siamese'", &entity).unwrap().matches(&row));
        assert!(parse_filter("breed lt 'tabby'", &entity).unwrap().matches(&row));
        assert!(parse_filter("age ge 4", &entity).unwrap().matches(&row));
        assert!(!parse_filter("weight gt 3.5", &entity).unwrap().matches(&row));
        assert!(parse_filter("name eq null", &entity).unwrap().matches(&row));
        assert!(!parse_filter("name ne null", &entity).unwrap().matches(&row));
    }

    #[rstest]
    #[case("breed eq 'siamese'")]
    #[case("breed ne 'O''Neil'")]
    #[case("age gt 3")]
    #[case("weight le 3.5")]
    #[case("weight lt 4")]
    #[case("indoor eq true")]
    #[case("name eq null")]
    fn test_display_round_trip_preserves_result(#[case] input: &str) {
        let entity = cat();
        let rows = [
            Entity::new("Cat")
                .with("name", "Tom")
                .with("breed", "siamese")
                .with("age", 4)
                .with("weight", 3.5)
                .with("indoor", true),
            Entity::new("Cat")
                .with("breed", "O'Neil")
                .with("age", 2)
                .with("weight", 4.0)
                .with("indoor", false),
        ];

        let first = parse_filter(input, &entity).unwrap();
        let second = parse_filter(&first.to_string(), &entity).unwrap();
        assert_eq!(first, second);
        for row in &rows {
            assert_eq!(first.matches(row), second.matches(row));
        }
    }
}
