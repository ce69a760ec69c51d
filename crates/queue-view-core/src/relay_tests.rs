//! Tests for the relay pipeline.

use super::*;
use crate::format::{Field, Layout};
use async_trait::async_trait;
use bytes::Bytes;
use queue_runtime::{
    ConnectionString, Connector, EntityPath, InMemoryConfig, InMemoryNamespace,
};
use std::io::Cursor;

fn connection() -> ConnectionString {
    ConnectionString::parse("Endpoint=sb://local.test/;SharedAccessKeyName=k;SharedAccessKey=dg==")
        .unwrap()
}

fn queue(name: &str) -> EntityPath {
    EntityPath::queue(name, false).unwrap()
}

fn seed(ns: &InMemoryNamespace, path: &EntityPath, bodies: &[&str]) {
    for body in bodies {
        ns.enqueue(path, OutboundMessage::new(body.to_string())).unwrap();
    }
}

/// Destination that accepts bodies of at most four bytes
fn small_destination() -> InMemoryNamespace {
    InMemoryNamespace::new(InMemoryConfig {
        max_message_size: 4,
        ..InMemoryConfig::default()
    })
}

async fn session(
    source: &InMemoryNamespace,
    source_path: &EntityPath,
    destination: &InMemoryNamespace,
    destination_path: &EntityPath,
) -> RelaySession {
    let receiver = source.open_receiver(&connection(), source_path).await.unwrap();
    let sender = destination
        .open_sender(&connection(), destination_path)
        .await
        .unwrap();
    RelaySession::new(receiver, sender)
}

fn lines(out: &[u8]) -> Vec<String> {
    String::from_utf8(out.to_vec())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

mod consume {
    use super::*;

    #[tokio::test]
    async fn test_moves_every_message() {
        let ns = InMemoryNamespace::default();
        let (dead, retry) = (queue("orders").dead_letter(), queue("retry"));
        seed(&ns, &dead, &["one", "two", "three"]);

        let mut out = Vec::new();
        let summary = session(&ns, &dead, &ns, &retry)
            .await
            .run(RelayMode::Consume, &mut out)
            .await
            .unwrap();

        assert_eq!(summary, RelaySummary { forwarded: 3, completed: 3 });
        assert_eq!(ns.completed_count(&dead), 3);
        assert_eq!(ns.message_count(&dead), 0);
        assert_eq!(ns.locked_count(&dead), 0);
        assert_eq!(
            ns.bodies(&retry),
            vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]
        );
    }

    #[tokio::test]
    async fn test_prints_progress_per_message() {
        let ns = InMemoryNamespace::default();
        let (source, target) = (queue("a"), queue("b"));
        seed(&ns, &source, &["hi"]);

        let mut out = Vec::new();
        session(&ns, &source, &ns, &target)
            .await
            .run(RelayMode::Consume, &mut out)
            .await
            .unwrap();

        assert_eq!(
            lines(&out),
            vec![
                "Received message: hi",
                "Resubmitted message.",
                "Completed message."
            ]
        );
    }

    #[tokio::test]
    async fn test_send_failure_stops_before_completion() {
        let source_ns = InMemoryNamespace::default();
        let target_ns = small_destination();
        let (source, target) = (queue("a"), queue("b"));
        seed(&source_ns, &source, &["m1", "m2", "big-3", "m4"]);

        let mut out = Vec::new();
        let err = session(&source_ns, &source, &target_ns, &target)
            .await
            .run(RelayMode::Consume, &mut out)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Transport(QueueError::MessageTooLarge { .. })
        ));
        assert_eq!(source_ns.completed_count(&source), 2);
        assert_eq!(target_ns.message_count(&target), 2);
        // the failed message keeps its lock until it expires
        assert_eq!(source_ns.locked_count(&source), 1);
        assert_eq!(source_ns.message_count(&source), 2);
        assert_eq!(lines(&out).last().unwrap(), "Received message: big-3");
    }

    #[tokio::test]
    async fn test_empty_source_does_nothing() {
        let ns = InMemoryNamespace::default();
        let mut out = Vec::new();
        let summary = session(&ns, &queue("a"), &ns, &queue("b"))
            .await
            .run(RelayMode::Consume, &mut out)
            .await
            .unwrap();

        assert_eq!(summary, RelaySummary::default());
        assert!(out.is_empty());
    }
}

mod peek {
    use super::*;

    #[tokio::test]
    async fn test_forwards_and_completes() {
        let ns = InMemoryNamespace::default();
        let (source, target) = (queue("a"), queue("b"));
        seed(&ns, &source, &["x", "y"]);

        let mut receiver = ns.open_receiver(&connection(), &source).await.unwrap();
        let mut sender = ns.open_sender(&connection(), &target).await.unwrap();
        let mut out = Vec::new();
        let summary = peek_and_send(receiver.as_mut(), sender.as_mut(), &mut out)
            .await
            .unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(ns.message_count(&source), 0);
        assert_eq!(ns.message_count(&target), 2);
    }

    #[tokio::test]
    async fn test_failed_run_can_be_repeated() {
        let source_ns = InMemoryNamespace::default();
        let (source, target) = (queue("a"), queue("b"));
        seed(&source_ns, &source, &["m1", "big-2", "m3"]);

        let small = small_destination();
        let mut out = Vec::new();
        let err = session(&source_ns, &source, &small, &target)
            .await
            .run(RelayMode::Peek, &mut out)
            .await;
        assert!(err.is_err());
        assert_eq!(source_ns.completed_count(&source), 1);
        assert_eq!(source_ns.message_count(&source), 2);
        assert_eq!(source_ns.locked_count(&source), 0);

        let roomy = InMemoryNamespace::default();
        let summary = session(&source_ns, &source, &roomy, &target)
            .await
            .run(RelayMode::Peek, &mut out)
            .await
            .unwrap();
        assert_eq!(summary.completed, 2);
        assert_eq!(
            roomy.bodies(&target),
            vec![Bytes::from("big-2"), Bytes::from("m3")]
        );
    }

    #[tokio::test]
    async fn test_forwarded_copy_keeps_id_and_properties() {
        let ns = InMemoryNamespace::default();
        let (source, target) = (queue("a"), queue("b"));
        ns.enqueue(
            &source,
            OutboundMessage::new("p")
                .with_message_id("keep-me".to_string())
                .with_property("tenant".to_string(), serde_json::json!("contoso")),
        )
        .unwrap();

        let mut out = Vec::new();
        session(&ns, &source, &ns, &target)
            .await
            .run(RelayMode::Peek, &mut out)
            .await
            .unwrap();

        let mut receiver = ns.open_receiver(&connection(), &target).await.unwrap();
        let copy = receiver.peek().await.unwrap().unwrap();
        assert_eq!(copy.message_id, "keep-me");
        assert_eq!(copy.user_properties["tenant"], serde_json::json!("contoso"));
    }
}

mod session_close {
    use super::*;

    /// Sender that accepts nothing and fails to close
    struct BrokenSender {
        path: EntityPath,
    }

    #[async_trait]
    impl MessageSender for BrokenSender {
        async fn send(&mut self, _message: OutboundMessage) -> Result<(), QueueError> {
            Err(QueueError::ConnectionFailed {
                message: "send refused".to_string(),
            })
        }

        async fn close(&mut self) -> Result<(), QueueError> {
            Err(QueueError::ConnectionFailed {
                message: "close refused".to_string(),
            })
        }

        fn entity_path(&self) -> &EntityPath {
            &self.path
        }
    }

    #[tokio::test]
    async fn test_relay_error_wins_over_close_error() {
        let ns = InMemoryNamespace::default();
        let source = queue("a");
        seed(&ns, &source, &["m"]);

        let receiver = ns.open_receiver(&connection(), &source).await.unwrap();
        let sender = Box::new(BrokenSender { path: queue("b") });
        let mut out = Vec::new();
        let err = RelaySession::new(receiver, sender)
            .run(RelayMode::Peek, &mut out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("send refused"));
        assert!(err.is_transient());
        // receiver was still closed, releasing the peeked message
        assert_eq!(ns.locked_count(&source), 0);
    }

    #[tokio::test]
    async fn test_close_error_is_reported_after_successful_relay() {
        let ns = InMemoryNamespace::default();
        let receiver = ns.open_receiver(&connection(), &queue("a")).await.unwrap();
        let sender = Box::new(BrokenSender { path: queue("b") });
        let mut out = Vec::new();
        let err = RelaySession::new(receiver, sender)
            .run(RelayMode::Consume, &mut out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("close refused"));
    }
}

mod text_stream {
    use super::*;

    #[tokio::test]
    async fn test_stops_at_first_blank_line() {
        let ns = InMemoryNamespace::default();
        let target = queue("inbox");
        let mut sender = ns.open_sender(&connection(), &target).await.unwrap();
        let input = Cursor::new(b"hello\nworld\n\nignored\n".to_vec());

        let mut out = Vec::new();
        let sent = stream_from_text(input, sender.as_mut(), &mut out)
            .await
            .unwrap();

        assert_eq!(sent, 2);
        assert_eq!(
            ns.bodies(&target),
            vec![Bytes::from("hello"), Bytes::from("world")]
        );
        assert_eq!(
            lines(&out),
            vec!["Sending... hello", "Sent!", "Sending... world", "Sent!"]
        );
    }

    #[tokio::test]
    async fn test_reads_to_end_without_trailing_newline() {
        let ns = InMemoryNamespace::default();
        let target = queue("inbox");
        let mut sender = ns.open_sender(&connection(), &target).await.unwrap();
        let input = Cursor::new(b"a\r\nb".to_vec());

        let mut out = Vec::new();
        let sent = stream_from_text(input, sender.as_mut(), &mut out)
            .await
            .unwrap();

        assert_eq!(sent, 2);
        assert_eq!(ns.bodies(&target), vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[tokio::test]
    async fn test_send_failure_stops_stream() {
        let ns = small_destination();
        let target = queue("inbox");
        let mut sender = ns.open_sender(&connection(), &target).await.unwrap();
        let input = Cursor::new(b"ok\ntoo long\nnever\n".to_vec());

        let mut out = Vec::new();
        let err = stream_from_text(input, sender.as_mut(), &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Transport(_)));
        assert_eq!(ns.message_count(&target), 1);
    }
}

mod listing {
    use super::*;

    #[tokio::test]
    async fn test_lists_two_messages_without_completing() {
        let ns = InMemoryNamespace::default();
        let source = queue("orders");
        seed(&ns, &source, &["A", "B"]);
        let formatter = MessageFormatter::new(Vec::new(), Layout::Column);

        let mut receiver = ns.open_receiver(&connection(), &source).await.unwrap();
        let mut out = Vec::new();
        let listed = list_messages(receiver.as_mut(), 10, &formatter, &mut out)
            .await
            .unwrap();
        receiver.close().await.unwrap();

        assert_eq!(listed, 2);
        let rows = lines(&out);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], formatter.format_header());

        for (row, (sequence, body)) in rows[1..].iter().zip([("1", "A"), ("2", "B")]) {
            let seq_col: String = row.chars().skip(20).take(20).collect();
            let body_col: String = row.chars().skip(40).take(100).collect();
            let props_col: String = row.chars().skip(140).collect();
            assert_eq!(seq_col.trim_end(), sequence);
            assert_eq!(body_col.trim_end(), body);
            assert_eq!(props_col.trim_end(), "{}");
        }

        assert_eq!(ns.completed_count(&source), 0);
        assert_eq!(ns.message_count(&source), 2);
        assert_eq!(ns.locked_count(&source), 0);
    }

    #[tokio::test]
    async fn test_stops_at_count() {
        let ns = InMemoryNamespace::default();
        let source = queue("orders");
        seed(&ns, &source, &["1", "2", "3"]);
        let formatter = MessageFormatter::new(vec![Field::Body], Layout::Delimited);

        let mut receiver = ns.open_receiver(&connection(), &source).await.unwrap();
        let mut out = Vec::new();
        let listed = list_messages(receiver.as_mut(), 2, &formatter, &mut out)
            .await
            .unwrap();

        assert_eq!(listed, 2);
        assert_eq!(lines(&out), vec!["Body", "1", "2"]);
    }

    #[tokio::test]
    async fn test_zero_count_prints_header_only() {
        let ns = InMemoryNamespace::default();
        let source = queue("orders");
        seed(&ns, &source, &["1"]);
        let formatter = MessageFormatter::new(vec![Field::SeqNum], Layout::Delimited);

        let mut receiver = ns.open_receiver(&connection(), &source).await.unwrap();
        let mut out = Vec::new();
        let listed = list_messages(receiver.as_mut(), 0, &formatter, &mut out)
            .await
            .unwrap();

        assert_eq!(listed, 0);
        assert_eq!(lines(&out), vec!["SeqNum"]);
        assert_eq!(ns.locked_count(&source), 0);
    }
}
