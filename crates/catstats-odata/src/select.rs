//! `$select` - comma-separated field list

use catstats_core::EntityBinding;

use crate::error::{ParseError, ParseResult};

/// Parse a field list, validating every name. Duplicates collapse.
pub fn parse_select(input: &str, entity: &EntityBinding) -> ParseResult<Vec<String>> {
    let mut fields: Vec<String> = Vec::new();
    for name in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if entity.field(name).is_none() {
            return Err(ParseError::unknown_field(&entity.name, name));
        }
        if !fields.iter().any(|f| f == name) {
            fields.push(name.to_string());
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::ITEM;
    use catstats_core::SchemaRegistry;

    #[test]
    fn test_select_fields() {
        let registry = SchemaRegistry::builtin();
        let item = registry.entity(ITEM).unwrap();
        assert_eq!(
            parse_select("name, price,name,", item).unwrap(),
            vec!["name", "price"]
        );
        assert!(matches!(
            parse_select("name,colour", item),
            Err(ParseError::UnknownField { field, .. }) if field == "colour"
        ));
    }
}
