//! Rate limit classes and the static limit table.
//!
//! Every gated operation belongs to a named class. A class fixes the bucket
//! capacity, how many tokens a refill credits and how often refills happen.
//! The table is built once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{LimiterError, Result};

const HOUR_MS: u64 = 60 * 60 * 1000;

/// The built-in classes used by the studio's server actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitClass {
    /// Angle generation from a topic
    Ideation,
    /// Research on a chosen angle
    Research,
    /// Drafts, social posts, refinements and image prompts
    Writing,
    /// Image generation
    Image,
}

impl RateLimitClass {
    /// All built-in classes.
    pub const ALL: [RateLimitClass; 4] = [
        RateLimitClass::Ideation,
        RateLimitClass::Research,
        RateLimitClass::Writing,
        RateLimitClass::Image,
    ];

    /// The class name as used in the limit table.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitClass::Ideation => "ideation",
            RateLimitClass::Research => "research",
            RateLimitClass::Writing => "writing",
            RateLimitClass::Image => "image",
        }
    }

    /// The configuration this class ships with.
    pub fn default_config(&self) -> ClassConfig {
        match self {
            RateLimitClass::Ideation => ClassConfig::new(10, 10, HOUR_MS),
            RateLimitClass::Research => ClassConfig::new(10, 10, HOUR_MS),
            RateLimitClass::Writing => ClassConfig::new(20, 20, HOUR_MS),
            RateLimitClass::Image => ClassConfig::new(30, 30, HOUR_MS),
        }
    }
}

impl AsRef<str> for RateLimitClass {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for RateLimitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitClass {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        RateLimitClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| LimiterError::UnknownClass(s.to_string()))
    }
}

/// Bucket parameters for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Bucket capacity (burst allowance)
    pub max_tokens: u64,
    /// Tokens credited per elapsed interval
    pub refill_rate: u64,
    /// Milliseconds between refills
    pub refill_interval_ms: u64,
}

impl ClassConfig {
    /// Create a class configuration. Use [`ClassConfig::validate`] before
    /// handing it to a limiter.
    pub const fn new(max_tokens: u64, refill_rate: u64, refill_interval_ms: u64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            refill_interval_ms,
        }
    }

    /// Check `max_tokens >= refill_rate > 0` and `refill_interval_ms > 0`.
    pub fn validate(&self, class: &str) -> Result<()> {
        let invalid = |reason: &str| LimiterError::InvalidClass {
            class: class.to_string(),
            reason: reason.to_string(),
        };

        if self.refill_rate == 0 {
            return Err(invalid("refill_rate must be greater than zero"));
        }
        if self.max_tokens < self.refill_rate {
            return Err(invalid("max_tokens must be at least refill_rate"));
        }
        if self.refill_interval_ms == 0 {
            return Err(invalid("refill_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// The static table of class name to bucket parameters.
///
/// Deserializing goes through [`LimitTable::new`], so every class is validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitTableFile")]
pub struct LimitTable {
    /// Class configurations by name
    classes: BTreeMap<String, ClassConfig>,
}

/// On-disk form: classes nested under a `classes` key.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitTableFile {
    classes: BTreeMap<String, ClassConfig>,
}

impl TryFrom<LimitTableFile> for LimitTable {
    type Error = LimiterError;

    fn try_from(file: LimitTableFile) -> Result<Self> {
        Self::new(file.classes)
    }
}

impl LimitTable {
    /// Build a table from explicit entries, validating each one.
    pub fn new<I, S>(classes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ClassConfig)>,
        S: Into<String>,
    {
        let classes: BTreeMap<String, ClassConfig> = classes
            .into_iter()
            .map(|(name, config)| (name.into(), config))
            .collect();

        for (name, config) in &classes {
            if name.is_empty() {
                return Err(LimiterError::Config("class names must not be empty".into()));
            }
            config.validate(name)?;
        }

        Ok(Self { classes })
    }

    /// Load a table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: LimitTableFile = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limit table: {}", e)))?;

        Self::try_from(parsed)
    }

    /// Return a copy of this table with `overrides` replacing or adding classes.
    pub fn merged<I, S>(&self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ClassConfig)>,
        S: Into<String>,
    {
        let mut classes = self.classes.clone();
        classes.extend(overrides.into_iter().map(|(name, config)| (name.into(), config)));
        Self::new(classes)
    }

    /// Look up a class by name.
    pub fn get(&self, class: &str) -> Option<&ClassConfig> {
        self.classes.get(class)
    }

    /// Look up a class by name, failing with [`LimiterError::UnknownClass`].
    pub fn require(&self, class: &str) -> Result<&ClassConfig> {
        self.get(class)
            .ok_or_else(|| LimiterError::UnknownClass(class.to_string()))
    }

    /// Iterate over classes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClassConfig)> {
        self.classes.iter().map(|(name, config)| (name.as_str(), config))
    }

    /// Number of configured classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the table has no classes.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for LimitTable {
    fn default() -> Self {
        Self {
            classes: RateLimitClass::ALL
                .into_iter()
                .map(|class| (class.as_str().to_string(), class.default_config()))
                .collect(),
        }
    }
}
