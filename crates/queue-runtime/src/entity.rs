//! Entity paths addressing queues, topics and subscriptions.

use crate::error::ValidationError;

/// Suffix addressing the dead-letter sub-queue of a queue or subscription
pub const DEAD_LETTER_SUFFIX: &str = "/$DeadLetterQueue";

/// Path segment separating a topic from its subscriptions
const SUBSCRIPTIONS_SEGMENT: &str = "/Subscriptions/";

/// Fully qualified address of an entity within a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityPath(String);

impl EntityPath {
    /// Path of a queue, or of its dead-letter sub-queue
    pub fn queue(queue_name: &str, dead_letter: bool) -> Result<Self, ValidationError> {
        require("queue_name", queue_name)?;
        Ok(Self::with_suffix(queue_name.to_string(), dead_letter))
    }

    /// Path of a topic subscription, or of its dead-letter sub-queue
    pub fn subscription(
        topic_name: &str,
        subscription_name: &str,
        dead_letter: bool,
    ) -> Result<Self, ValidationError> {
        require("topic_name", topic_name)?;
        require("subscription_name", subscription_name)?;
        let path = format!("{}{}{}", topic_name, SUBSCRIPTIONS_SEGMENT, subscription_name);
        Ok(Self::with_suffix(path, dead_letter))
    }

    /// Path of a topic
    pub fn topic(topic_name: &str) -> Result<Self, ValidationError> {
        require("topic_name", topic_name)?;
        Ok(Self(topic_name.to_string()))
    }

    fn with_suffix(path: String, dead_letter: bool) -> Self {
        if dead_letter {
            Self(path + DEAD_LETTER_SUFFIX)
        } else {
            Self(path)
        }
    }

    /// Check whether this path addresses a dead-letter sub-queue
    pub fn is_dead_letter(&self) -> bool {
        self.0.ends_with(DEAD_LETTER_SUFFIX)
    }

    /// Path of the dead-letter sub-queue belonging to this entity
    pub fn dead_letter(&self) -> Self {
        if self.is_dead_letter() {
            self.clone()
        } else {
            Self(format!("{}{}", self.0, DEAD_LETTER_SUFFIX))
        }
    }

    /// Split a subscription path into its topic and subscription names
    pub fn subscription_parts(&self) -> Option<(&str, &str)> {
        let path = self.0.strip_suffix(DEAD_LETTER_SUFFIX).unwrap_or(&self.0);
        path.split_once(SUBSCRIPTIONS_SEGMENT)
    }

    /// Get path as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
