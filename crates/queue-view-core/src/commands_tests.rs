//! Tests for command execution.

use super::*;
use crate::config::MockConfigurationStore;
use bytes::Bytes;
use queue_runtime::{InMemoryNamespace, OutboundMessage};
use tempfile::NamedTempFile;

const CONNECTION_STRING: &str =
    "Endpoint=sb://local.test/;SharedAccessKeyName=k;SharedAccessKey=dg==";

fn configuration() -> Configuration {
    Configuration {
        connections: vec![
            Connection::new("local", CONNECTION_STRING),
            Connection::new("backup", CONNECTION_STRING),
        ],
        default_connection_name: "local".to_string(),
        default_topic_name: "events".to_string(),
        ..Configuration::default()
    }
}

/// Store that always reads `config` and must not be written
fn read_only_store(config: Configuration) -> MockConfigurationStore {
    let mut store = MockConfigurationStore::new();
    store
        .expect_read_configuration()
        .returning(move || Ok(config.clone()));
    store.expect_write_configuration().never();
    store
}

fn queue(name: &str) -> EntityPath {
    EntityPath::queue(name, false).unwrap()
}

fn seed(ns: &InMemoryNamespace, path: &EntityPath, bodies: &[&str]) {
    for body in bodies {
        ns.enqueue(path, OutboundMessage::new(body.to_string())).unwrap();
    }
}

async fn run(
    command: Command,
    store: &dyn ConfigurationStore,
    ns: &InMemoryNamespace,
) -> (Result<(), CommandError>, String) {
    let mut out = Vec::new();
    let result = {
        let mut ctx = CommandContext {
            store,
            connector: ns,
            out: &mut out,
        };
        command.execute(&mut ctx).await
    };
    (result, String::from_utf8(out).unwrap())
}

fn source_queue(name: &str) -> SourceEntity {
    SourceEntity {
        queue: Some(name.to_string()),
        ..SourceEntity::default()
    }
}

mod messages {
    use super::*;

    #[tokio::test]
    async fn test_lists_queue_in_columns() {
        let ns = InMemoryNamespace::default();
        seed(&ns, &queue("orders"), &["A", "B"]);
        let store = read_only_store(configuration());

        let command = Command::Messages(MessagesOptions {
            source: source_queue("orders"),
            pretty: true,
            ..MessagesOptions::default()
        });
        let (result, out) = run(command, &store, &ns).await;

        result.unwrap();
        let rows: Vec<&str> = out.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.chars().count() == 240));
        assert_eq!(ns.completed_count(&queue("orders")), 0);
        assert_eq!(ns.locked_count(&queue("orders")), 0);
    }

    #[tokio::test]
    async fn test_uses_default_topic_for_subscription() {
        let ns = InMemoryNamespace::default();
        let dead_letter = EntityPath::subscription("events", "audit", true).unwrap();
        seed(&ns, &dead_letter, &["lost"]);
        let store = read_only_store(configuration());

        let command = Command::Messages(MessagesOptions {
            source: SourceEntity {
                subscription: Some("audit".to_string()),
                dead_letter: true,
                ..SourceEntity::default()
            },
            fields: vec![Field::Body],
            ..MessagesOptions::default()
        });
        let (result, out) = run(command, &store, &ns).await;

        result.unwrap();
        assert_eq!(out, "Body\nlost\n");
    }

    #[tokio::test]
    async fn test_missing_subscription_fails_before_reading() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());

        let (result, out) = run(
            Command::Messages(MessagesOptions::default()),
            &store,
            &ns,
        )
        .await;

        assert!(matches!(
            result,
            Err(CommandError::Resolve(ResolveError::MissingName {
                field: "Subscription"
            }))
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());
        let command = Command::Messages(MessagesOptions {
            source: SourceEntity {
                connection: Some("staging".to_string()),
                queue: Some("orders".to_string()),
                ..SourceEntity::default()
            },
            ..MessagesOptions::default()
        });

        let (result, _) = run(command, &store, &ns).await;
        assert!(matches!(
            result,
            Err(CommandError::Resolve(ResolveError::ConnectionNotFound { .. }))
        ));
    }
}

mod send {
    use super::*;

    fn relay_options(consume: bool) -> SendOptions {
        SendOptions {
            source: SendSource::Entity {
                entity: SourceEntity {
                    queue: Some("orders".to_string()),
                    dead_letter: true,
                    ..SourceEntity::default()
                },
                consume,
            },
            destination_connection: Some("backup".to_string()),
            destination_queue: Some("orders".to_string()),
            destination_topic: None,
        }
    }

    #[tokio::test]
    async fn test_resubmits_dead_letters_in_peek_mode() {
        let ns = InMemoryNamespace::default();
        let dead_letter = queue("orders").dead_letter();
        seed(&ns, &dead_letter, &["x", "y"]);
        let store = read_only_store(configuration());

        let (result, out) = run(Command::Send(relay_options(false)), &store, &ns).await;

        result.unwrap();
        assert_eq!(ns.bodies(&queue("orders")), vec![Bytes::from("x"), Bytes::from("y")]);
        assert_eq!(ns.message_count(&dead_letter), 0);
        assert_eq!(out.matches("Completed message.").count(), 2);
    }

    #[tokio::test]
    async fn test_consume_mode_drains_source() {
        let ns = InMemoryNamespace::default();
        let dead_letter = queue("orders").dead_letter();
        seed(&ns, &dead_letter, &["x"]);
        let store = read_only_store(configuration());

        let (result, _) = run(Command::Send(relay_options(true)), &store, &ns).await;

        result.unwrap();
        assert_eq!(ns.completed_count(&dead_letter), 1);
        assert_eq!(ns.message_count(&queue("orders")), 1);
    }

    #[tokio::test]
    async fn test_missing_destination_touches_nothing() {
        let ns = InMemoryNamespace::default();
        let dead_letter = queue("orders").dead_letter();
        seed(&ns, &dead_letter, &["x"]);
        let store = read_only_store(configuration());

        let options = SendOptions {
            destination_queue: None,
            ..relay_options(true)
        };
        let (result, out) = run(Command::Send(options), &store, &ns).await;

        assert!(matches!(result, Err(CommandError::MissingEntity)));
        assert!(out.is_empty());
        assert_eq!(ns.locked_count(&dead_letter), 0);
        assert_eq!(ns.message_count(&dead_letter), 1);
    }

    #[tokio::test]
    async fn test_missing_source_entity() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());
        let options = SendOptions {
            source: SendSource::Entity {
                entity: SourceEntity::default(),
                consume: false,
            },
            ..relay_options(false)
        };

        let (result, _) = run(Command::Send(options), &store, &ns).await;
        assert!(matches!(result, Err(CommandError::MissingEntity)));
    }

    #[tokio::test]
    async fn test_streams_file_to_topic() {
        let ns = InMemoryNamespace::default();
        let audit = ns.create_subscription("events", "audit").unwrap();
        let store = read_only_store(configuration());

        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "hello\nworld\n\nignored\n").unwrap();

        let options = SendOptions {
            source: SendSource::File(file.path().to_path_buf()),
            destination_connection: None,
            destination_queue: None,
            destination_topic: Some("events".to_string()),
        };
        let (result, out) = run(Command::Send(options), &store, &ns).await;

        result.unwrap();
        assert_eq!(ns.bodies(&audit), vec![Bytes::from("hello"), Bytes::from("world")]);
        assert_eq!(out, "Sending... hello\nSent!\nSending... world\nSent!\n");
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());
        let options = SendOptions {
            source: SendSource::File(PathBuf::from("/nonexistent/queue-view/input.txt")),
            destination_connection: None,
            destination_queue: Some("orders".to_string()),
            destination_topic: None,
        };

        let (result, _) = run(Command::Send(options), &store, &ns).await;
        assert!(matches!(result, Err(CommandError::Input { .. })));
    }
}

mod status {
    use super::*;

    #[tokio::test]
    async fn test_prints_runtime_counts() {
        let ns = InMemoryNamespace::default();
        seed(&ns, &queue("orders"), &["a", "b"]);
        seed(&ns, &queue("orders").dead_letter(), &["c"]);
        let store = read_only_store(configuration());

        let command = Command::Status(StatusOptions {
            source: source_queue("orders"),
        });
        let (result, out) = run(command, &store, &ns).await;

        result.unwrap();
        let rows: Vec<&str> = out.lines().collect();
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|row| row.len() == 80));
        assert_eq!(rows[0].trim_end(), format!("{:<35}orders", "Path"));
        assert_eq!(rows[1].trim_end(), format!("{:<35}3", "Message Count"));
        assert_eq!(rows[3].trim_end(), format!("{:<35}1", "DeadLetter Messages"));
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());
        let command = Command::Status(StatusOptions {
            source: source_queue("missing"),
        });

        let (result, _) = run(command, &store, &ns).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Transport(QueueError::EntityNotFound { .. })
        ));
        assert!(!err.is_transient());
    }
}

mod connections {
    use super::*;

    /// Store that reads `config` once and expects one write matching `check`
    fn writing_store(
        config: Configuration,
        check: impl Fn(&Configuration) -> bool + Send + 'static,
    ) -> MockConfigurationStore {
        let mut store = MockConfigurationStore::new();
        store
            .expect_read_configuration()
            .times(1)
            .returning(move || Ok(config.clone()));
        store
            .expect_write_configuration()
            .withf(move |c: &Configuration| check(c))
            .times(1)
            .returning(|_| Ok(()));
        store
    }

    #[tokio::test]
    async fn test_add_new_connection() {
        let ns = InMemoryNamespace::default();
        let store = writing_store(configuration(), |c| {
            c.connection("staging").map(|c| c.connection_string.as_str()) == Some("Endpoint=x")
        });

        let action = ConnectionsAction::Add {
            name: "staging".to_string(),
            connection_string: "Endpoint=x".to_string(),
            update: false,
        };
        let (result, out) = run(Command::Connections(action), &store, &ns).await;
        result.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_add_existing_without_update_is_refused() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());

        let action = ConnectionsAction::Add {
            name: "local".to_string(),
            connection_string: "Endpoint=x".to_string(),
            update: false,
        };
        let (result, out) = run(Command::Connections(action), &store, &ns).await;
        result.unwrap();
        assert_eq!(
            out,
            "A connection with this name already exists. Specify -u to update.\n"
        );
    }

    #[tokio::test]
    async fn test_update_existing() {
        let ns = InMemoryNamespace::default();
        let store = writing_store(configuration(), |c| {
            c.connections.len() == 2
                && c.connection("local").map(|c| c.connection_string.as_str()) == Some("Endpoint=y")
        });

        let action = ConnectionsAction::Add {
            name: "local".to_string(),
            connection_string: "Endpoint=y".to_string(),
            update: true,
        };
        let (result, _) = run(Command::Connections(action), &store, &ns).await;
        result.unwrap();
    }

    #[tokio::test]
    async fn test_delete_default_clears_default() {
        let ns = InMemoryNamespace::default();
        let store = writing_store(configuration(), |c| {
            c.connection("local").is_none() && c.default_connection_name.is_empty()
        });

        let action = ConnectionsAction::Delete {
            name: "local".to_string(),
        };
        let (result, _) = run(Command::Connections(action), &store, &ns).await;
        result.unwrap();
    }

    #[tokio::test]
    async fn test_delete_unknown() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());
        let action = ConnectionsAction::Delete {
            name: "nope".to_string(),
        };

        let (result, out) = run(Command::Connections(action), &store, &ns).await;
        result.unwrap();
        assert_eq!(out, "No connection with this name was found.\n");
    }

    #[tokio::test]
    async fn test_show_default() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());

        let (result, out) = run(
            Command::Connections(ConnectionsAction::ShowDefault),
            &store,
            &ns,
        )
        .await;
        result.unwrap();
        assert_eq!(out, format!("local {}\n", CONNECTION_STRING));
    }

    #[tokio::test]
    async fn test_set_default() {
        let ns = InMemoryNamespace::default();
        let store = writing_store(configuration(), |c| c.default_connection_name == "backup");
        let action = ConnectionsAction::SetDefault {
            name: "backup".to_string(),
        };

        let (result, _) = run(Command::Connections(action), &store, &ns).await;
        result.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_name() {
        let ns = InMemoryNamespace::default();
        let store = read_only_store(configuration());

        let (result, out) = run(Command::Connections(ConnectionsAction::List), &store, &ns).await;
        result.unwrap();
        assert_eq!(
            out,
            format!("backup {0}\nlocal {0}\n", CONNECTION_STRING)
        );
    }
}
