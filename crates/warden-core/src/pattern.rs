//! Glob matching shared by the sandbox and the policy engine.
//!
//! Two dialects are used on the wire:
//!
//! - **Path patterns**: `*` matches within one path segment, `**`
//!   matches across separators.
//! - **Host and name patterns**: `*` matches any run of characters,
//!   so `*.example.com` and `10.*` both behave the way deny lists
//!   expect.

/// Match a path against a glob pattern.
///
/// `*` stops at `/`; `**` crosses separators. A pattern without
/// wildcards also matches any descendant of the literal path, so
/// `/tmp/secret` covers `/tmp/secret/x`.
pub fn path_pattern_matches(pattern: &str, path: &str) -> bool {
    if glob_match(pattern, path, false) {
        return true;
    }
    if !pattern.contains('*') {
        let prefix = pattern.trim_end_matches('/');
        return !prefix.is_empty() && path.starts_with(prefix) && {
            path.as_bytes().get(prefix.len()) == Some(&b'/')
        };
    }
    false
}

/// Match a hostname (or secret name) against a glob pattern where `*`
/// matches any run of characters.
pub fn name_pattern_matches(pattern: &str, name: &str) -> bool {
    glob_match(pattern, name, true)
}

/// Specificity of a pattern for rule ordering: the count of literal
/// (non-wildcard) characters. Explicit patterns outrank wildcard ones;
/// longer literals outrank shorter.
pub fn specificity(pattern: &str) -> usize {
    pattern.chars().filter(|c| *c != '*').count()
}

/// Whether `parent` covers everything `child` can match, for delegation
/// scope narrowing.
///
/// Exact for the shapes delegation actually uses: equal patterns, an
/// unrestricted parent, and a `prefix/**` parent covering any child
/// rooted under that prefix. Anything structurally weirder is refused,
/// which errs on the side of narrower delegation.
pub fn pattern_covers(parent: &str, child: &str) -> bool {
    if parent == child || parent == "**" || parent == "*" {
        return true;
    }
    if let Some(prefix) = parent.strip_suffix("/**") {
        if !prefix.contains('*') {
            if let Some(rest) = child.strip_prefix(prefix) {
                return rest.starts_with('/');
            }
        }
    }
    false
}

fn glob_match(pattern: &str, text: &str, star_crosses_separator: bool) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_inner(&p, &t, star_crosses_separator)
}

fn match_inner(p: &[char], t: &[char], cross: bool) -> bool {
    let Some(&head) = p.first() else {
        return t.is_empty();
    };
    if head == '*' {
        let double = p.get(1) == Some(&'*');
        let rest = if double && !cross { &p[2..] } else { &p[1..] };
        let crosses = cross || double;
        let mut i = 0;
        loop {
            if match_inner(rest, &t[i..], cross) {
                return true;
            }
            if i == t.len() || (!crosses && t[i] == '/') {
                return false;
            }
            i += 1;
        }
    }
    !t.is_empty() && t[0] == head && match_inner(&p[1..], &t[1..], cross)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_stays_in_segment() {
        assert!(path_pattern_matches("/tmp/*.txt", "/tmp/notes.txt"));
        assert!(!path_pattern_matches("/tmp/*.txt", "/tmp/sub/notes.txt"));
    }

    #[test]
    fn double_star_crosses_segments() {
        assert!(path_pattern_matches("/work/**", "/work/project/src/main.rs"));
        assert!(path_pattern_matches("**/.ssh/**", "/home/u/.ssh/id_rsa"));
        assert!(!path_pattern_matches("/work/**", "/etc/passwd"));
    }

    #[test]
    fn literal_pattern_covers_descendants() {
        assert!(path_pattern_matches("/tmp/secret", "/tmp/secret"));
        assert!(path_pattern_matches("/tmp/secret", "/tmp/secret/x"));
        assert!(!path_pattern_matches("/tmp/secret", "/tmp/secrets"));
    }

    #[test]
    fn host_star_crosses_labels() {
        assert!(name_pattern_matches("*.example.com", "api.example.com"));
        assert!(name_pattern_matches("*.example.com", "deep.api.example.com"));
        assert!(name_pattern_matches("10.*", "10.1.2.3"));
        assert!(!name_pattern_matches("*.example.com", "example.org"));
    }

    #[test]
    fn secret_name_patterns() {
        assert!(name_pattern_matches("*_API_KEY", "OPENAI_API_KEY"));
        assert!(name_pattern_matches("*_TOKEN", "GITHUB_TOKEN"));
        assert!(!name_pattern_matches("*_TOKEN", "TOKEN_BUDGET"));
    }

    #[test]
    fn specificity_counts_literals() {
        assert!(specificity("/tmp/secret") > specificity("/tmp/**"));
        assert!(specificity("evil.example.com") > specificity("*.example.com"));
        assert_eq!(specificity("**"), 0);
    }

    #[test]
    fn delegation_coverage() {
        assert!(pattern_covers("/work/**", "/work/project/**"));
        assert!(pattern_covers("/work/**", "/work/a/b/c"));
        assert!(pattern_covers("**", "/anything"));
        assert!(!pattern_covers("/work/**", "/etc/**"));
        assert!(!pattern_covers("/work/**", "/workspace/**"));
    }
}
