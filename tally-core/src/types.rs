//! Core data model: subjects, event categories, event records and checkpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TallyError;

/// The kind of entity being scored.
///
/// Identifiers are only unique within a kind, so the kind is part of every subject key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Article,
    Comment,
    Billboard,
    Tag,
}

impl SubjectKind {
    /// All kinds, in declaration order.
    pub const ALL: [SubjectKind; 4] = [Self::Article, Self::Comment, Self::Billboard, Self::Tag];

    /// Storage name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Comment => "comment",
            Self::Billboard => "billboard",
            Self::Tag => "tag",
        }
    }

    /// Parse a kind from its storage name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubjectKind {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| TallyError::MalformedSubject(format!("unknown kind: {s}")))
    }
}

/// Identity of a scored subject: its kind plus its identifier within that kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub kind: SubjectKind,
    pub id: String,
}

impl SubjectKey {
    /// Create a new subject key.
    #[must_use]
    pub fn new(kind: SubjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn article(id: impl Into<String>) -> Self {
        Self::new(SubjectKind::Article, id)
    }

    #[must_use]
    pub fn comment(id: impl Into<String>) -> Self {
        Self::new(SubjectKind::Comment, id)
    }

    #[must_use]
    pub fn billboard(id: impl Into<String>) -> Self {
        Self::new(SubjectKind::Billboard, id)
    }

    #[must_use]
    pub fn tag(id: impl Into<String>) -> Self {
        Self::new(SubjectKind::Tag, id)
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Name of an event category ("impression", "click", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub const IMPRESSION: &'static str = "impression";
    pub const CLICK: &'static str = "click";
    pub const CONVERSION: &'static str = "conversion";
    pub const REACTION_POINTS: &'static str = "reaction_points";
    pub const DESCENDANT: &'static str = "descendant";
    pub const ARTICLE: &'static str = "article";
    pub const COMMENT: &'static str = "comment";
    pub const REACTION: &'static str = "reaction";

    /// Create a new category from a string.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-category event totals. Absent categories count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryCounts(BTreeMap<Category, u64>);

impl CategoryCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total for a category, zero when nothing was ever recorded.
    pub fn get(&self, category: &Category) -> u64 {
        self.0.get(category).copied().unwrap_or(0)
    }

    /// Total for a category looked up by name.
    pub fn get_named(&self, name: &str) -> u64 {
        self.get(&Category::new(name))
    }

    /// Accumulate a delta onto a category. Totals only grow.
    pub fn add(&mut self, category: Category, delta: u64) {
        let total = self.0.entry(category).or_insert(0);
        *total = total.saturating_add(delta);
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn with(mut self, category: impl Into<Category>, delta: u64) -> Self {
        self.add(category.into(), delta);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, u64)> {
        self.0.iter().map(|(category, total)| (category, *total))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Category, u64)> for CategoryCounts {
    fn from_iter<I: IntoIterator<Item = (Category, u64)>>(iter: I) -> Self {
        let mut counts = Self::new();
        for (category, delta) in iter {
            counts.add(category, delta);
        }
        counts
    }
}

/// An immutable, append-only fact about a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub subject: SubjectKey,
    pub category: Category,
    /// Weight of this event in sums.
    pub counts_for: u64,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Create an event with weight 1.
    #[must_use]
    pub fn new(subject: SubjectKey, category: impl Into<Category>, created_at: DateTime<Utc>) -> Self {
        Self {
            subject,
            category: category.into(),
            counts_for: 1,
            created_at,
        }
    }

    /// Set the event weight.
    #[must_use]
    pub fn with_counts_for(mut self, counts_for: u64) -> Self {
        self.counts_for = counts_for;
        self
    }
}

/// Half-open time interval `(after, until]`. An absent side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub after: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Every event ever recorded.
    pub fn all_time() -> Self {
        Self::default()
    }

    /// Events strictly after `after`, with no upper bound.
    pub fn since(after: Option<DateTime<Utc>>) -> Self {
        Self { after, until: None }
    }

    /// Events in `(after, until]`.
    pub fn between(after: Option<DateTime<Utc>>, until: DateTime<Utc>) -> Self {
        Self {
            after,
            until: Some(until),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.after.is_none_or(|after| at > after) && self.until.is_none_or(|until| at <= until)
    }
}

/// Per-subject tabulation state.
///
/// `last_tabulated_at` never moves backwards and `cumulative_counts` never shrink across
/// commits for the same subject. `None` means the subject was never tabulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub subject: SubjectKey,
    pub last_tabulated_at: Option<DateTime<Utc>>,
    pub cumulative_counts: CategoryCounts,
    pub derived_metric: f64,
}

impl Checkpoint {
    /// The zero checkpoint a subject starts from.
    #[must_use]
    pub fn empty(subject: SubjectKey) -> Self {
        Self {
            subject,
            last_tabulated_at: None,
            cumulative_counts: CategoryCounts::new(),
            derived_metric: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_tabulated_at.is_none()
    }
}

/// Denormalized subject fields available to formulas and the sampling gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectContext {
    pub key: SubjectKey,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Current denormalized counter used for load shedding (e.g. impressions so far).
    #[serde(default)]
    pub magnitude: u64,
}

impl SubjectContext {
    /// Create a context with only identity and creation time.
    #[must_use]
    pub fn new(key: SubjectKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            created_at,
            published_at: None,
            body: None,
            author: None,
            magnitude: 0,
        }
    }

    #[must_use]
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    #[must_use]
    pub fn with_magnitude(mut self, magnitude: u64) -> Self {
        self.magnitude = magnitude;
        self
    }

    /// Timestamp recency bonuses are measured against.
    pub fn reference_timestamp(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.created_at)
    }
}
