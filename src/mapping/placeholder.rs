//! `{CLUSTER_NAME}` substitution in mapping expressions

use std::collections::BTreeMap;

/// Token replaced with the cluster name before an expression is evaluated
pub const CLUSTER_NAME_PLACEHOLDER: &str = "{CLUSTER_NAME}";

/// jq string literal for the cluster name
pub fn cluster_name_literal(cluster_name: &str) -> String {
    serde_json::Value::String(cluster_name.to_string()).to_string()
}

/// Replace every placeholder occurrence with the quoted literal
pub fn replace_placeholder(expr: &str, literal: &str) -> String {
    expr.replace(CLUSTER_NAME_PLACEHOLDER, literal)
}

/// Replace placeholders in every value of a map, keys are left untouched
pub fn replace_placeholders_in_map(
    exprs: &BTreeMap<String, String>,
    literal: &str,
) -> BTreeMap<String, String> {
    exprs
        .iter()
        .map(|(key, expr)| (key.clone(), replace_placeholder(expr, literal)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_is_quoted() {
        assert_eq!(cluster_name_literal("prod-eu"), r#""prod-eu""#);
        assert_eq!(cluster_name_literal(""), r#""""#);
    }

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(cluster_name_literal(r#"a"b"#), r#""a\"b""#);
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let literal = cluster_name_literal("c1");
        assert_eq!(
            replace_placeholder("{CLUSTER_NAME} + .x + {CLUSTER_NAME}", &literal),
            r#""c1" + .x + "c1""#
        );
    }

    #[test]
    fn test_map_values_only() {
        let literal = cluster_name_literal("c1");
        let mut exprs = BTreeMap::new();
        exprs.insert("{CLUSTER_NAME}".to_string(), "{CLUSTER_NAME}".to_string());

        let replaced = replace_placeholders_in_map(&exprs, &literal);
        assert_eq!(replaced["{CLUSTER_NAME}"], r#""c1""#);
    }
}
