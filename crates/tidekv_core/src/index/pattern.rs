//! Glob patterns over keys.

/// A key pattern where `*` matches any run of characters and `?` matches
/// exactly one.
///
/// ```rust
/// use tidekv_core::Pattern;
///
/// let pattern = Pattern::new("user:*:age");
/// assert!(pattern.matches("user:42:age"));
/// assert!(!pattern.matches("user:42:name"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
}

impl Pattern {
    /// Creates a pattern.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// A pattern matching every key.
    #[must_use]
    pub fn any() -> Self {
        Self::new("*")
    }

    /// Returns the pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the pattern matches every key.
    #[must_use]
    pub fn is_any(&self) -> bool {
        !self.source.is_empty() && self.source.chars().all(|c| c == '*')
    }

    /// Tests a key against the pattern.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        if self.is_any() {
            return true;
        }
        let pattern: Vec<char> = self.source.chars().collect();
        let text: Vec<char> = key.chars().collect();

        let (mut p, mut t) = (0, 0);
        // Position of the last `*` and the text index it was tried against.
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match pattern.get(p) {
                Some('*') => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some('?') => {
                    p += 1;
                    t += 1;
                }
                Some(c) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                _ => match backtrack {
                    Some((star, tried)) => {
                        p = star + 1;
                        t = tried + 1;
                        backtrack = Some((star, tried + 1));
                    }
                    None => return false,
                },
            }
        }
        pattern[p..].iter().all(|c| *c == '*')
    }
}

impl From<&str> for Pattern {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}
