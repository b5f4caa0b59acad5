use crate::config::RouteRule;
use std::collections::HashMap;

/// Matches a request path + method against a list of route rules.
/// Returns the first matching rule and extracted path parameters.
pub fn match_route<'a>(
    rules: &'a [RouteRule],
    path: &str,
    method: &str,
) -> Option<(&'a RouteRule, HashMap<String, String>)> {
    for rule in rules {
        // Check method filter (empty = match all)
        if !rule.match_rule.methods.is_empty()
            && !rule
                .match_rule
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
        {
            continue;
        }

        if let Some(params) = match_path(&rule.match_rule.path, path) {
            return Some((rule, params));
        }
    }
    None
}

/// Match a path pattern against a request path, extracting named parameters.
/// Supports:
///   - Exact: `/login`
///   - Parameters: `/:tenant/admin` → extracts `tenant`
///   - Single wildcard: `/:tenant/*/dashboard`
///   - Double wildcard: `/:tenant/admin/**` (matches any depth, including none)
///
/// The request path is matched in the form the browser router sees it:
/// percent-decoded, dot segments resolved and literals compared without
/// regard to ASCII case.
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts = canonical_segments(path);

    let mut params = HashMap::new();
    let mut ri = 0;

    for pp in pattern_parts {
        if pp == "**" {
            return Some(params);
        }

        let segment = path_parts.get(ri)?;
        if let Some(name) = pp.strip_prefix(':') {
            params.insert(name.to_string(), segment.clone());
        } else if pp != "*" && !pp.eq_ignore_ascii_case(segment) {
            return None;
        }
        ri += 1;
    }

    (ri == path_parts.len()).then_some(params)
}

/// Decoded, non-empty segments of `path` with `.` and `..` resolved.
pub fn canonical_segments(path: &str) -> Vec<String> {
    let decoded = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());

    let mut segments: Vec<String> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment.to_string()),
        }
    }
    segments
}

/// Fill a target template: `:name` segments take the captured parameter of
/// the same name, `{name}` placeholders anywhere take `vars`. Returns `None`
/// when a referenced value is missing.
pub fn substitute(
    template: &str,
    params: &HashMap<String, String>,
    vars: &HashMap<&str, &str>,
) -> Option<String> {
    let mut segments = Vec::new();
    for segment in template.split('/') {
        match segment.strip_prefix(':') {
            Some(name) => segments.push(urlencoding::encode(params.get(name)?).into_owned()),
            None => segments.push(segment.to_string()),
        }
    }
    let mut target = segments.join("/");

    let mut cursor = 0;
    while let Some(offset) = target[cursor..].find('{') {
        let start = cursor + offset;
        let end = start + target[start..].find('}')?;
        let value = vars.get(&target[start + 1..end])?;
        target.replace_range(start..=end, value);
        cursor = start + value.len();
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchRule;

    fn rule(path: &str, methods: &[&str]) -> RouteRule {
        RouteRule {
            match_rule: MatchRule {
                path: path.to_string(),
                methods: methods.iter().map(|m| m.to_string()).collect(),
            },
            tenant: None,
            gate: None,
        }
    }

    #[test]
    fn test_exact_match() {
        assert!(match_path("/login", "/login").is_some());
        assert!(match_path("/login", "/logins").is_none());
        assert!(match_path("/system-dashboard", "/system-dashboard/").is_some());
    }

    #[test]
    fn test_tenant_param_match() {
        let params = match_path("/:tenant/admin/**", "/acme/admin/bookings").unwrap();
        assert_eq!(params.get("tenant").unwrap(), "acme");
        assert!(match_path("/:tenant/admin/**", "/acme/carer/bookings").is_none());
    }

    #[test]
    fn test_double_wildcard_matches_any_depth() {
        assert!(match_path("/:tenant/admin/**", "/acme/admin").is_some());
        assert!(match_path("/:tenant/admin/**", "/acme/admin/a/b/c").is_some());
        assert!(match_path("/:tenant/admin/**", "/acme").is_none());
    }

    #[test]
    fn test_single_wildcard() {
        assert!(match_path("/:tenant/*/dashboard", "/acme/carer/dashboard").is_some());
        assert!(match_path("/:tenant/*/dashboard", "/acme/carer/profile").is_none());
    }

    #[test]
    fn test_first_rule_wins_and_methods_filter() {
        let rules = vec![
            rule("/login", &["post"]),
            rule("/:tenant/admin/reports/**", &[]),
            rule("/:tenant/admin/**", &[]),
        ];
        let (matched, _) = match_route(&rules, "/acme/admin/reports/weekly", "GET").unwrap();
        assert_eq!(matched.match_rule.path, "/:tenant/admin/reports/**");
        assert!(match_route(&rules, "/login", "GET").is_none());
        assert!(match_route(&rules, "/login", "POST").is_some());
    }

    #[test]
    fn test_substitute_params_and_vars() {
        let params = match_path("/admin/branch-details/:id", "/admin/branch-details/b-42").unwrap();
        let vars = HashMap::from([("tenant", "acme")]);
        assert_eq!(
            substitute("/{tenant}/admin/branch-details/:id", &params, &vars).as_deref(),
            Some("/acme/admin/branch-details/b-42")
        );
        assert!(substitute("/{tenant}/admin", &params, &HashMap::new()).is_none());
        assert!(substitute("/admin/:missing", &params, &vars).is_none());
    }

    #[test]
    fn test_literal_segments_are_case_and_encoding_insensitive() {
        let pattern = "/:tenant/admin/**";
        assert!(match_path(pattern, "/acme/ADMIN/dashboard").is_some());
        assert!(match_path(pattern, "/acme/%61dmin/dashboard").is_some());
        assert!(match_path(pattern, "/acme/Admin%2Fdashboard").is_some());
        assert!(match_path(pattern, "/acme/carer/../admin/dashboard").is_some());
        assert!(match_path(pattern, "/acme/./admin").is_some());

        let params = match_path(pattern, "/ac%6De/admin").unwrap();
        assert_eq!(params.get("tenant").unwrap(), "acme");
    }

    #[test]
    fn test_canonical_segments() {
        assert_eq!(canonical_segments("//a/./b/../c/"), vec!["a", "c"]);
        assert_eq!(canonical_segments("/../x"), vec!["x"]);
        assert_eq!(canonical_segments("/a%20b"), vec!["a b"]);
        assert_eq!(canonical_segments("/a\\b"), vec!["a", "b"]);
    }
}
