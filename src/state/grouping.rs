//! Cores that only steer which objects are drawn and in what order:
//! `enable`, `layer`, `stage`, `tag`, `name` and render listeners.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnableCore {
    pub enabled: bool,
}

impl Default for EnableCore {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerCore {
    pub priority: i64,
    pub enabled: bool,
}

impl Default for LayerCore {
    fn default() -> Self {
        Self {
            priority: 0,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCore {
    pub priority: i64,
    pub pickable: bool,
}

impl Default for StageCore {
    fn default() -> Self {
        Self {
            priority: 0,
            pickable: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagCore {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameCore {
    pub name: String,
}

/// Publishes `NodeRendered` for `node_id` whenever an object below it is
/// drawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenersCore {
    pub node_id: String,
}

/// A tag selector: `|`-separated alternatives, each optionally using `*`
/// as a wildcard for any run of characters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSelector {
    alternatives: Vec<String>,
}

impl TagSelector {
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self {
            alternatives: pattern
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    #[must_use]
    pub fn matches(&self, tag: &str) -> bool {
        self.alternatives.iter().any(|alt| wildcard_match(alt, tag))
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_alternatives_and_wildcards() {
        let selector = TagSelector::new("red|blue*");
        assert!(selector.matches("red"));
        assert!(selector.matches("blueberry"));
        assert!(!selector.matches("redder"));
        assert!(!selector.matches("green"));

        let selector = TagSelector::new("a*c*e");
        assert!(selector.matches("abcde"));
        assert!(selector.matches("ace"));
        assert!(!selector.matches("abcd"));
    }
}
