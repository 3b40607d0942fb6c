// src/stream/signal.rs

use regex::Regex;

/// Stateless per-line predicate: matches if any of its patterns matches.
///
/// An empty signal never matches.
#[derive(Debug, Clone, Default)]
pub struct LineSignal {
    patterns: Vec<Regex>,
}

/// Predicate for "the host is up".
pub type ReadinessSignal = LineSignal;

/// Predicate for stderr lines worth reporting on failure.
pub type FailureSignal = LineSignal;

impl LineSignal {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// A signal that never matches.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, line: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(line))
    }
}
