use semver::{Version, VersionReq};
use std::str::FromStr;

use crate::errors::{Error, Result};

/// Parse an npm-style range into the union of requirements it denotes.
/// `||` separates alternatives; each alternative is canonicalized before
/// being handed to the semver crate.
pub fn parse_requirements(range: &str) -> Result<Vec<VersionReq>> {
    let mut reqs = Vec::new();
    for part in range.split("||").map(str::trim) {
        if part.is_empty() {
            continue;
        }
        let norm = canonicalize_range(part);
        if norm == "*" {
            reqs.push(VersionReq::STAR);
            continue;
        }
        let req = VersionReq::from_str(&norm).map_err(|e| {
            Error::Message(format!("invalid semver range '{norm}' (orig '{part}'): {e}"))
        })?;
        reqs.push(req);
    }
    if reqs.is_empty() {
        reqs.push(VersionReq::STAR);
    }
    Ok(reqs)
}

pub fn satisfies(version: &Version, range: &str) -> bool {
    parse_requirements(range)
        .map(|reqs| reqs.iter().any(|r| r.matches(version)))
        .unwrap_or(false)
}

/// Highest version admitted by the range, or None when nothing matches.
pub fn pick_version<'a>(available: &'a [Version], range: &str) -> Result<Option<&'a Version>> {
    let reqs = parse_requirements(range)?;
    let mut best: Option<&Version> = None;
    for candidate in available {
        if reqs.iter().any(|r| r.matches(candidate)) {
            match best {
                Some(current) if current >= candidate => {}
                _ => best = Some(candidate),
            }
        }
    }
    Ok(best)
}

/// Rewrite the npm range dialect into what the semver crate accepts: comma
/// separated comparators, hyphen ranges expanded, wildcard and bare-digit
/// shorthands turned into bounded ranges.
pub fn canonicalize_range(input: &str) -> String {
    let s = input.trim();
    if s.is_empty() || s == "*" || s == "latest" {
        return "*".into();
    }

    // A full version (prerelease/build included) means exactly that version.
    if Version::parse(s).is_ok() {
        return format!("={s}");
    }

    // Hyphen range: "1.2.3 - 2.3.4". The spaces are required, otherwise the
    // dash could belong to a prerelease.
    if let Some(idx) = s.find(" - ") {
        let (a, b) = s.split_at(idx);
        let left = a.trim();
        let right = b[3..].trim();
        if is_version_like(left) && is_version_like(right) {
            return format!(">={left}, <={right}");
        }
    }

    let tokens: Vec<&str> = s.split_whitespace().collect();
    if tokens.len() > 1 {
        let mut comps: Vec<String> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let t = tokens[i];
            if let Some((op, rest)) = split_op(t) {
                // Operator attached to its version (">=1.0.0") or standing
                // alone with the version in the next token ("> 1.0.0").
                if rest.is_empty() {
                    let Some(ver) = tokens.get(i + 1) else {
                        return s.to_string();
                    };
                    comps.push(format!("{op}{ver}"));
                    i += 2;
                } else if is_version_like(rest) {
                    comps.push(t.to_string());
                    i += 1;
                } else {
                    return s.to_string();
                }
                continue;
            }
            if is_version_like(t) {
                if t.contains('x') || t.contains('X') || t.contains('*') {
                    return expand_wildcard(t);
                }
                if is_numeric(t) {
                    return format!("^{t}.0.0");
                }
                comps.push(format!("={t}"));
                i += 1;
                continue;
            }
            return s.to_string();
        }
        if !comps.is_empty() {
            return comps.join(", ");
        }
    }

    if is_numeric(s) {
        return format!("^{s}.0.0");
    }
    if count_dots(s) == 1 && s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let mut parts = s.split('.');
        let maj = parts.next().unwrap_or_default();
        let min = parts.next().unwrap_or_default();
        if let Ok(min_i) = min.parse::<u64>() {
            return format!(">={maj}.{min}.0, <{maj}.{}.0", min_i + 1);
        }
    }
    if s.contains('x') || s.contains('X') || s.contains('*') {
        return expand_wildcard(s);
    }
    // Let the semver crate produce the error for anything else.
    s.to_string()
}

fn split_op(t: &str) -> Option<(&str, &str)> {
    for op in [">=", "<=", ">", "<", "=", "^", "~"] {
        if let Some(rest) = t.strip_prefix(op) {
            return Some((op, rest));
        }
    }
    None
}

fn is_numeric(t: &str) -> bool {
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

fn count_dots(t: &str) -> usize {
    t.chars().filter(|&c| c == '.').count()
}

fn is_version_like(t: &str) -> bool {
    let mut has_digit = false;
    for c in t.chars() {
        if c.is_ascii_digit() {
            has_digit = true;
            continue;
        }
        if !matches!(c, '.' | '-' | '+' | 'x' | 'X' | '*' | 'a'..='z' | 'A'..='Z') {
            return false;
        }
    }
    has_digit
}

fn expand_wildcard(pattern: &str) -> String {
    let parts: Vec<&str> = pattern.split('.').collect();
    let is_wild = |p: &str| p.eq_ignore_ascii_case("x") || p == "*";
    if parts.len() == 1 && is_wild(parts[0]) {
        return "*".to_string();
    }
    if parts.len() == 2 && is_wild(parts[1]) {
        if let Ok(maj) = parts[0].parse::<u64>() {
            return format!(">={maj}.0.0, <{}.0.0", maj + 1);
        }
    }
    if parts.len() == 3 && is_wild(parts[2]) {
        if let (Ok(maj), Ok(min)) = (parts[0].parse::<u64>(), parts[1].parse::<u64>()) {
            return format!(">={maj}.{min}.0, <{maj}.{}.0", min + 1);
        }
    }
    pattern.to_string()
}
