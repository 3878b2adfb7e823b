use once_cell::sync::Lazy;
use regex::Regex;

use crate::detector::DetectorConfig;

static REVERSE_DOMAIN: Lazy<Regex> = Lazy::new(|| {
    // "com.example.pro.monthly" -> "pro.monthly"
    Regex::new(r"^(?:com|org|net|io|app|co)\.[a-z0-9_-]+\.").expect("static regex")
});

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Resolve a product id to its cross-platform family. Exact alias overrides
/// from configuration win; otherwise the normalized-name heuristic applies:
/// lowercase, reverse-domain prefix stripped, separators collapsed to `_`.
///
/// "Pro Monthly", "pro-monthly", and "com.example.pro.monthly" all land on
/// `pro_monthly`.
pub fn product_family(config: &DetectorConfig, product_id: &str) -> String {
    if let Some(alias) = config.product_aliases.get(product_id) {
        return alias.clone();
    }

    let lowered = product_id.trim().to_lowercase();
    let stripped = REVERSE_DOMAIN.replace(&lowered, "");
    let collapsed = NON_ALNUM.replace_all(&stripped, "_");
    collapsed.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_unifies_spellings() {
        let config = DetectorConfig::default();
        assert_eq!(product_family(&config, "Pro Monthly"), "pro_monthly");
        assert_eq!(product_family(&config, "pro-monthly"), "pro_monthly");
        assert_eq!(product_family(&config, "pro_monthly"), "pro_monthly");
        assert_eq!(product_family(&config, "com.example.pro.monthly"), "pro_monthly");
    }

    #[test]
    fn aliases_override_heuristics() {
        let mut config = DetectorConfig::default();
        config
            .product_aliases
            .insert("prod_PZk1".to_string(), "pro_monthly".to_string());
        assert_eq!(product_family(&config, "prod_PZk1"), "pro_monthly");
    }

    #[test]
    fn plain_ids_pass_through_normalized() {
        let config = DetectorConfig::default();
        assert_eq!(product_family(&config, "prod_basic"), "prod_basic");
    }
}
