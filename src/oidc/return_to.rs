//! Post-login return path validation.
//!
//! A return target travels through the identity provider round trip and ends
//! up in a `Location` header, so anything that could leave the site is
//! collapsed to `/`.

use url::Url;

const FALLBACK: &str = "/";

/// Reduce a requested return target to a safe same-origin path.
///
/// Accepts relative paths beginning with a single `/` and absolute URLs that
/// share the origin of `base`; the latter are reduced to path, query and
/// fragment. Rejects protocol-relative URLs, `..` segments, back-slashes and
/// control characters.
pub fn sanitize_return_to(raw: Option<&str>, base: &Url) -> String {
    let Some(candidate) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return FALLBACK.to_string();
    };

    if is_suspicious(candidate) {
        return FALLBACK.to_string();
    }

    if candidate.starts_with('/') {
        return candidate.to_string();
    }

    match Url::parse(candidate) {
        Ok(url) if url.origin() == base.origin() => {
            let mut target = url.path().to_string();
            if let Some(query) = url.query() {
                target.push('?');
                target.push_str(query);
            }
            if let Some(fragment) = url.fragment() {
                target.push('#');
                target.push_str(fragment);
            }
            // The reduced path must pass the same checks as a relative one
            if is_suspicious(&target) {
                return FALLBACK.to_string();
            }
            target
        }
        _ => FALLBACK.to_string(),
    }
}

fn is_suspicious(candidate: &str) -> bool {
    let lower = candidate.to_ascii_lowercase();
    candidate.starts_with("//")
        || candidate.contains("..")
        || candidate.contains('\\')
        || lower.contains("%2e%2e")
        || lower.contains("%5c")
        || candidate.chars().any(char::is_control)
}
