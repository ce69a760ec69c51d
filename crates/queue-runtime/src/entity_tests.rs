//! Tests for entity paths.

use super::*;

#[test]
fn test_queue_paths() {
    assert_eq!(EntityPath::queue("orders", false).unwrap().as_str(), "orders");
    assert_eq!(
        EntityPath::queue("orders", true).unwrap().as_str(),
        "orders/$DeadLetterQueue"
    );
}

#[test]
fn test_subscription_paths() {
    let path = EntityPath::subscription("events", "audit", false).unwrap();
    assert_eq!(path.as_str(), "events/Subscriptions/audit");
    assert_eq!(path.subscription_parts(), Some(("events", "audit")));

    let dead_letter = EntityPath::subscription("events", "audit", true).unwrap();
    assert_eq!(
        dead_letter.as_str(),
        "events/Subscriptions/audit/$DeadLetterQueue"
    );
    assert!(dead_letter.is_dead_letter());
    assert_eq!(dead_letter.subscription_parts(), Some(("events", "audit")));
}

#[test]
fn test_topic_path_has_no_subscription_parts() {
    let path = EntityPath::topic("events").unwrap();
    assert_eq!(path.as_str(), "events");
    assert_eq!(path.subscription_parts(), None);
}

#[test]
fn test_missing_names_are_rejected() {
    let err = EntityPath::queue("", false).unwrap_err();
    assert!(matches!(err, ValidationError::Required { ref field } if field == "queue_name"));

    let err = EntityPath::subscription("events", "", false).unwrap_err();
    assert!(
        matches!(err, ValidationError::Required { ref field } if field == "subscription_name")
    );

    let err = EntityPath::topic("").unwrap_err();
    assert!(matches!(err, ValidationError::Required { ref field } if field == "topic_name"));
}

#[test]
fn test_dead_letter_is_idempotent() {
    let path = EntityPath::queue("orders", false).unwrap();
    let dead_letter = path.dead_letter();
    assert_eq!(dead_letter.as_str(), "orders/$DeadLetterQueue");
    assert_eq!(dead_letter.dead_letter(), dead_letter);
}
