/// Derive the canonical billing interval string from a plan's interval
/// length and unit: the bare unit when length is 1, `"{length}_{unit}"`
/// otherwise (`month`, `3_month`, `year`, ...).
pub fn derive_billing_interval(length: i64, unit: &str) -> String {
    let unit = unit.trim().to_lowercase();
    if length == 1 {
        unit
    } else {
        format!("{}_{}", length, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_unit_intervals() {
        assert_eq!(derive_billing_interval(1, "month"), "month");
        assert_eq!(derive_billing_interval(1, "year"), "year");
        assert_eq!(derive_billing_interval(1, "Week"), "week");
    }

    #[test]
    fn multi_unit_intervals() {
        assert_eq!(derive_billing_interval(3, "month"), "3_month");
        assert_eq!(derive_billing_interval(6, "month"), "6_month");
        assert_eq!(derive_billing_interval(2, "week"), "2_week");
    }
}
