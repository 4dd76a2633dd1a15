use crate::db::sqlite::models::RecordFilter;

/// Written for an absent filter; a real value `*` is escaped, so the two never meet
const ANY: &str = "*";

/// Deterministic cache key for a filter set and page
///
/// Each filter value is escaped so that no value can contain the `:`
/// separator or the bare `*` wildcard, which makes the key injective over
/// `(filter, page)`.
pub fn fingerprint(filter: &RecordFilter, page: u32) -> String {
    format!(
        "risk:{}:{}:{}:page:{}",
        component(filter.company_id.as_deref()),
        component(filter.reporting_period.as_deref()),
        component(filter.industry_sector.as_deref()),
        page
    )
}

fn component(value: Option<&str>) -> String {
    match value {
        None => ANY.to_string(),
        Some(v) => escape(v),
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(company: Option<&str>, period: Option<&str>, sector: Option<&str>) -> RecordFilter {
        RecordFilter {
            company_id: company.map(str::to_string),
            reporting_period: period.map(str::to_string),
            industry_sector: sector.map(str::to_string),
        }
    }

    #[test]
    fn test_fingerprint_format() {
        assert_eq!(
            fingerprint(&filter(Some("C1"), None, Some("tech")), 1),
            "risk:C1:*:tech:page:1"
        );
        assert_eq!(fingerprint(&RecordFilter::default(), 3), "risk:*:*:*:page:3");
    }

    #[test]
    fn test_page_changes_key() {
        let filter = RecordFilter::default();
        assert_ne!(fingerprint(&filter, 1), fingerprint(&filter, 2));
    }

    #[test]
    fn test_separator_in_values_does_not_collide() {
        let a = fingerprint(&filter(Some("a:b"), Some("c"), None), 1);
        let b = fingerprint(&filter(Some("a"), Some("b:c"), None), 1);
        assert_ne!(a, b);
        assert_eq!(a, "risk:a%3Ab:c:*:page:1");
    }

    #[test]
    fn test_wildcard_and_literal_values_do_not_collide() {
        let absent = fingerprint(&filter(None, None, None), 1);
        assert_ne!(absent, fingerprint(&filter(Some("*"), None, None), 1));
        assert_ne!(absent, fingerprint(&filter(Some("all"), None, None), 1));
        // An escaped escape stays distinct from the escape it spells
        assert_ne!(
            fingerprint(&filter(Some("%3A"), None, None), 1),
            fingerprint(&filter(Some(":"), None, None), 1)
        );
    }
}
