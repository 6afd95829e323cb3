//! Scope rules deciding which source entries are mirrored and watched.
//!
//! A [`ScopeRules`] value holds the include and exclude glob sets. Patterns
//! are matched against slash-separated paths relative to the source root
//! with `glob-match` semantics: `*` stays within one segment, `**` crosses
//! segments, `?`, `[...]` classes and `{a,b}` alternation are supported.
//!
//! # Decision model
//!
//! | Condition | In scope? |
//! |-----------|-----------|
//! | Any segment is `.git` | no |
//! | Matches an exclude pattern | no |
//! | Include set non-empty, no include matches | no |
//! | Otherwise | yes |

use std::path::{Component, Path};

use tracing::{debug, warn};

/// Name of the version-control metadata directory that is never mirrored.
pub const VCS_DIR: &str = ".git";

/// Immutable include/exclude glob sets built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ScopeRules {
    include: Vec<String>,
    exclude: Vec<String>,
    dropped: Vec<String>,
}

impl ScopeRules {
    /// Build the rule set, dropping (and warning about) patterns that
    /// cannot be parsed.
    pub fn new<I, E, S1, S2>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S1>,
        E: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let mut dropped = Vec::new();
        let include = keep_valid(include, "include", &mut dropped);
        let exclude = keep_valid(exclude, "exclude", &mut dropped);
        Self {
            include,
            exclude,
            dropped,
        }
    }

    /// Patterns rejected while building the rule set.
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Whether `rel_path` (relative to the source root) is mirrored.
    pub fn in_scope(&self, rel_path: &Path) -> bool {
        if is_vcs_path(rel_path) {
            return false;
        }
        let path = to_slash(rel_path);
        if path.is_empty() {
            return false;
        }

        if let Some(pattern) = self.matching_exclude(&path) {
            debug!(path = %path, pattern = %pattern, "excluded by pattern");
            return false;
        }

        if self.include.is_empty() {
            return true;
        }
        let included = self.include.iter().any(|p| glob_match::glob_match(p, &path));
        if !included {
            debug!(path = %path, "not matched by any include pattern");
        }
        included
    }

    /// Whether a directory may hold in-scope entries and should therefore be
    /// walked and watched. Include patterns are not consulted: a directory
    /// such as `i3` must be entered for `i3/**` to ever match.
    pub fn may_contain(&self, rel_dir: &Path) -> bool {
        if is_vcs_path(rel_dir) {
            return false;
        }
        let path = to_slash(rel_dir);
        if path.is_empty() {
            return true;
        }
        match self.matching_exclude(&path) {
            Some(pattern) => {
                debug!(path = %path, pattern = %pattern, "directory excluded by pattern");
                false
            }
            None => true,
        }
    }

    fn matching_exclude(&self, path: &str) -> Option<&str> {
        self.exclude
            .iter()
            .find(|p| glob_match::glob_match(p, path))
            .map(String::as_str)
    }
}

/// `true` if any component of `path` is the VCS metadata directory.
pub fn is_vcs_path(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == VCS_DIR))
}

/// Render a relative path with forward slashes, dropping `.` components.
pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&name.to_string_lossy());
        }
    }
    out
}

fn keep_valid<I, S>(patterns: I, set: &str, dropped: &mut Vec<String>) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut kept = Vec::new();
    for pattern in patterns {
        let pattern = pattern.as_ref().trim().replace('\\', "/");
        if pattern.is_empty() {
            continue;
        }
        match check_pattern(&pattern) {
            Ok(()) => kept.push(pattern),
            Err(reason) => {
                warn!(pattern = %pattern, set, reason, "dropping unparsable glob pattern");
                dropped.push(pattern);
            }
        }
    }
    kept
}

/// `glob-match` never reports syntax errors, it silently fails to match.
/// Reject the shapes it cannot interpret so the operator hears about them.
fn check_pattern(pattern: &str) -> Result<(), &'static str> {
    let mut brace_depth = 0usize;
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if chars.next().is_none() {
                    return Err("trailing escape");
                }
            }
            '[' if !in_class => {
                in_class = true;
                // `[]...]` and `[!]...]` treat the first `]` as a literal.
                if chars.peek() == Some(&'!') || chars.peek() == Some(&'^') {
                    chars.next();
                }
                if chars.peek() == Some(&']') {
                    chars.next();
                }
            }
            ']' if in_class => in_class = false,
            '{' if !in_class => brace_depth += 1,
            '}' if !in_class => {
                if brace_depth == 0 {
                    return Err("unbalanced '}'");
                }
                brace_depth -= 1;
            }
            _ => {}
        }
    }

    if in_class {
        return Err("unclosed character class");
    }
    if brace_depth > 0 {
        return Err("unclosed brace alternation");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rules(include: &[&str], exclude: &[&str]) -> ScopeRules {
        ScopeRules::new(include.iter().copied(), exclude.iter().copied())
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let r = rules(&["i3/**"], &["**/*.log"]);
        assert!(r.in_scope(Path::new("i3/config")));
        assert!(!r.in_scope(Path::new("i3/debug.log")));
    }

    #[test]
    fn test_include_empty_accepts_everything_not_excluded() {
        let r = rules(&[], &["**/*.tmp"]);
        assert!(r.in_scope(Path::new("notes.txt")));
        assert!(!r.in_scope(Path::new("scratch.tmp")));
        assert!(!r.in_scope(Path::new("deep/dir/scratch.tmp")));
    }

    #[test]
    fn test_include_restricts_scope() {
        let r = rules(&["i3/**", "*.conf"], &[]);
        assert!(r.in_scope(Path::new("i3/config")));
        assert!(r.in_scope(Path::new("i3/scripts/bar.sh")));
        assert!(r.in_scope(Path::new("app.conf")));
        assert!(!r.in_scope(Path::new("cache/tmp.log")));
        // `*` does not cross separators.
        assert!(!r.in_scope(Path::new("nested/app.conf")));
    }

    #[test]
    fn test_vcs_segment_always_rejected() {
        let r = rules(&[], &[]);
        assert!(!r.in_scope(Path::new(".git/config")));
        assert!(!r.in_scope(Path::new("nvim/.git/HEAD")));
        assert!(!r.may_contain(Path::new("nvim/.git")));
        // Only whole segments count.
        assert!(r.in_scope(Path::new(".gitconfig")));
        assert!(r.in_scope(Path::new("git/.gitignore")));
    }

    #[test]
    fn test_may_contain_ignores_includes() {
        let r = rules(&["i3/**"], &["cache/**", "cache"]);
        assert!(r.may_contain(Path::new("")));
        assert!(r.may_contain(Path::new("i3")));
        assert!(r.may_contain(Path::new("polybar")));
        assert!(!r.may_contain(Path::new("cache")));
        assert!(!r.may_contain(Path::new("cache/nested")));
    }

    #[test]
    fn test_brace_and_class_patterns() {
        let r = rules(&["{i3,sway}/config", "polybar/config.[ic]ni"], &[]);
        assert!(r.in_scope(Path::new("i3/config")));
        assert!(r.in_scope(Path::new("sway/config")));
        assert!(r.in_scope(Path::new("polybar/config.ini")));
        assert!(!r.in_scope(Path::new("hypr/config")));
    }

    #[test]
    fn test_invalid_patterns_dropped() {
        let r = rules(&["i3/**", "{broken"], &["[abc", "**/*.log"]);
        assert_eq!(r.include(), &["i3/**".to_string()]);
        assert_eq!(r.exclude(), &["**/*.log".to_string()]);
        assert_eq!(r.dropped(), &["{broken".to_string(), "[abc".to_string()]);
    }

    #[test]
    fn test_to_slash_normalizes_components() {
        let p: PathBuf = ["i3", "scripts", "bar.sh"].iter().collect();
        assert_eq!(to_slash(&p), "i3/scripts/bar.sh");
        assert_eq!(to_slash(Path::new("./i3/config")), "i3/config");
        assert_eq!(to_slash(Path::new("")), "");
    }
}
