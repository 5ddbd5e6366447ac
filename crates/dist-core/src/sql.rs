//! SQL text helpers for generated commands

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote an identifier when it is not a plain lowercase name
pub fn quote_ident(ident: &str) -> String {
    let plain = !ident.is_empty()
        && ident
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase() || c == '_')
            .unwrap_or(false)
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// `schema.name` with both parts quoted as needed
pub fn qualified_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Render an optional text value as a literal or NULL
pub fn literal_or_null(value: Option<&str>) -> String {
    value.map(quote_literal).unwrap_or_else(|| "NULL".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("abc"), "'abc'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "orders");
        assert_eq!(quote_ident("orders_102008"), "orders_102008");
        assert_eq!(quote_ident("Orders"), "\"Orders\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("public", "events"), "public.events");
        assert_eq!(literal_or_null(None), "NULL");
    }
}
