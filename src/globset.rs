use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::ConfigError;

/// An ordered set of inclusion rules with optional exclusions. Rules written
/// with a leading `!` subtract from whatever the inclusions matched, e.g.
/// `["css/*.css", "!css/*.min.css"]` picks every stylesheet that is not
/// already minified.
#[derive(Debug, Clone)]
pub struct GlobSet {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

fn match_options() -> MatchOptions {
    MatchOptions {
        // `*` stops at `/`, crossing directories takes an explicit `**`.
        // Keeps `matches` agreeing with what `walk` finds on disk.
        require_literal_separator: true,
        // dotfiles like `.tmp` must be named explicitly, `*` won't reach them
        require_literal_leading_dot: true,
        case_sensitive: true,
    }
}

impl GlobSet {
    pub fn new<S: AsRef<str>>(rules: impl IntoIterator<Item = S>) -> Result<Self, ConfigError> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for rule in rules {
            let rule = rule.as_ref();
            match rule.strip_prefix('!') {
                Some(negated) => exclude.push(Pattern::new(negated)?),
                None => include.push(Pattern::new(rule)?),
            }
        }

        Ok(Self { include, exclude })
    }

    /// Single inclusion pattern, no exclusions.
    pub fn single(rule: &str) -> Result<Self, ConfigError> {
        Self::new([rule])
    }

    pub fn matches(&self, path: impl AsRef<Utf8Path>) -> bool {
        let path = path.as_ref().as_str();
        let opts = match_options();

        self.include
            .iter()
            .any(|p| p.matches_with(path, opts))
            && !self.exclude.iter().any(|p| p.matches_with(path, opts))
    }

    /// Expand the inclusion rules against the filesystem, drop exclusions,
    /// and return the surviving files in sorted order. Matched directories
    /// are skipped.
    pub fn walk(&self) -> Result<Vec<Utf8PathBuf>, ConfigError> {
        let opts = match_options();
        let mut found = Vec::new();

        for pattern in &self.include {
            for entry in glob::glob_with(pattern.as_str(), opts)? {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::warn!("skipping unreadable path: {e}");
                        continue;
                    }
                };

                if !path.is_file() {
                    continue;
                }

                let Ok(path) = Utf8PathBuf::try_from(path) else {
                    tracing::warn!("skipping non UTF-8 path");
                    continue;
                };

                if !self.exclude.iter().any(|p| p.matches_with(path.as_str(), opts)) {
                    found.push(path);
                }
            }
        }

        found.sort();
        found.dedup();

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_matching() {
        let set = GlobSet::new(["css/*.css"]).unwrap();

        assert!(set.matches("css/app.css"));
        assert!(!set.matches("css/app.scss"));
        assert!(!set.matches("js/app.js"));
    }

    #[test]
    fn test_exclusion_removes_prior_match() {
        let set = GlobSet::new(["css/*.css", "!css/*.min.css"]).unwrap();

        assert!(set.matches("css/app.css"));
        assert!(!set.matches("css/app.min.css"));
    }

    #[test]
    fn test_exclusion_order_is_irrelevant_within_one_evaluation() {
        let set = GlobSet::new(["!js/*.min.js", "js/*.js"]).unwrap();

        assert!(set.matches("js/app.js"));
        assert!(!set.matches("js/app.min.js"));
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let set = GlobSet::new(["*.html"]).unwrap();

        assert!(set.matches("index.html"));
        assert!(!set.matches("dist/index.html"));
    }

    #[test]
    fn test_recursive_pattern() {
        let set = GlobSet::new(["js/**/*.js"]).unwrap();

        assert!(set.matches("js/app.js"));
        assert!(set.matches("js/vendor/deep/lib.js"));
        assert!(!set.matches("scss/app.scss"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(GlobSet::new(["js/[unclosed"]).is_err());
    }
}
