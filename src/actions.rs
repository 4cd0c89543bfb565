//! The studio's rate-limited server actions.
//!
//! Each action that calls a paid model or image API is charged against one
//! class. Drafts cost two writing tokens because they are the most expensive
//! generation in the workflow.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::ratelimit::{with_rate_limit, RateLimitClass, RateLimitGate, RateLimiter};

/// A gated studio operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StudioOperation {
    /// Generate article angles for a topic
    GenerateAngles,
    /// Research a chosen angle
    ResearchTopic,
    /// Write the full article draft
    GenerateDraft,
    /// Write a social post from the draft
    GenerateSocialPost,
    /// Apply an edit instruction to the draft
    RefineDraft,
    /// Render an image from a prompt
    GenerateImage,
    /// Derive image prompts from the draft
    GenerateImagePrompts,
}

impl StudioOperation {
    /// Every gated operation.
    pub const ALL: [StudioOperation; 7] = [
        StudioOperation::GenerateAngles,
        StudioOperation::ResearchTopic,
        StudioOperation::GenerateDraft,
        StudioOperation::GenerateSocialPost,
        StudioOperation::RefineDraft,
        StudioOperation::GenerateImage,
        StudioOperation::GenerateImagePrompts,
    ];

    /// The class this operation is charged against.
    pub fn class(&self) -> RateLimitClass {
        match self {
            StudioOperation::GenerateAngles => RateLimitClass::Ideation,
            StudioOperation::ResearchTopic => RateLimitClass::Research,
            StudioOperation::GenerateDraft
            | StudioOperation::GenerateSocialPost
            | StudioOperation::RefineDraft
            | StudioOperation::GenerateImagePrompts => RateLimitClass::Writing,
            StudioOperation::GenerateImage => RateLimitClass::Image,
        }
    }

    /// Tokens charged per call.
    pub fn cost(&self) -> u64 {
        match self {
            StudioOperation::GenerateDraft => 2,
            _ => 1,
        }
    }

    /// Build the admission gate for this operation.
    pub fn gate(&self, limiter: &Arc<RateLimiter>) -> Result<RateLimitGate> {
        with_rate_limit(limiter, self.class(), self.cost())
    }

    /// Kebab-case operation name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StudioOperation::GenerateAngles => "generate-angles",
            StudioOperation::ResearchTopic => "research-topic",
            StudioOperation::GenerateDraft => "generate-draft",
            StudioOperation::GenerateSocialPost => "generate-social-post",
            StudioOperation::RefineDraft => "refine-draft",
            StudioOperation::GenerateImage => "generate-image",
            StudioOperation::GenerateImagePrompts => "generate-image-prompts",
        }
    }
}

impl fmt::Display for StudioOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;
    use crate::ratelimit::{ClassConfig, LimitTable};

    #[test]
    fn test_operation_classes_and_costs() {
        assert_eq!(StudioOperation::GenerateAngles.class(), RateLimitClass::Ideation);
        assert_eq!(StudioOperation::ResearchTopic.class(), RateLimitClass::Research);
        assert_eq!(StudioOperation::GenerateImage.class(), RateLimitClass::Image);
        assert_eq!(StudioOperation::GenerateImagePrompts.class(), RateLimitClass::Writing);

        assert_eq!(StudioOperation::GenerateDraft.cost(), 2);
        assert_eq!(StudioOperation::RefineDraft.cost(), 1);
    }

    #[test]
    fn test_all_operations_gate_against_default_table() {
        let limiter = Arc::new(RateLimiter::default());
        for operation in StudioOperation::ALL {
            let gate = operation.gate(&limiter).unwrap();
            assert_eq!(gate.class(), operation.class().as_str());
            assert_eq!(gate.cost(), operation.cost());
        }
    }

    #[test]
    fn test_gate_fails_when_class_missing_from_table() {
        let table = LimitTable::new([("ideation", ClassConfig::new(1, 1, 1_000))]).unwrap();
        let limiter = Arc::new(RateLimiter::in_memory(table));

        assert!(StudioOperation::GenerateAngles.gate(&limiter).is_ok());
        assert!(matches!(
            StudioOperation::GenerateImage.gate(&limiter),
            Err(LimiterError::UnknownClass(name)) if name == "image"
        ));
    }

    #[tokio::test]
    async fn test_drafts_and_social_posts_share_writing_budget() {
        let limiter = Arc::new(RateLimiter::default());
        let draft = StudioOperation::GenerateDraft.gate(&limiter).unwrap();
        let social = StudioOperation::GenerateSocialPost.gate(&limiter).unwrap();

        for _ in 0..9 {
            assert!(!draft.run("ip1", || async {}).await.is_rate_limited());
        }
        assert!(!social.run("ip1", || async {}).await.is_rate_limited());
        assert!(!social.run("ip1", || async {}).await.is_rate_limited());
        assert!(social.run("ip1", || async {}).await.is_rate_limited());
    }

    #[test]
    fn test_operation_names() {
        for operation in StudioOperation::ALL {
            let json = serde_json::to_value(operation).unwrap();
            assert_eq!(json, serde_json::json!(operation.as_str()));
        }
    }
}
