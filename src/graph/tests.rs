//! Tests for Graph functionality

use super::*;
use std::sync::Arc;
use crate::{
    config::GraphConfig,
    edge::Layer,
    event::GraphEvent,
    identifier::IdentifierRegistry,
    operation::RelationshipPayload,
    schema::{RelationshipSchema, ResourceSchema},
    tests::helpers::*,
};

#[test]
fn test_edges_are_created_lazily() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");

    let edge = graph.get(&app, "configs").unwrap();
    assert!(edge.flags().is_empty);
    assert!(!edge.flags().has_received_data);
    assert_eq!(graph.edge_count(), 1);

    assert_eq!(
        graph.get(&app, "owners").unwrap_err(),
        GraphError::unknown_field("app", "owners")
    );
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn test_push_does_not_materialize_related() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let u1 = key(&registry, "user", "1");
    let u2 = key(&registry, "user", "2");
    graph.mark_materialized(&u1);

    graph.push(update_one(&u1, "best_friend", Some(&u2))).unwrap();

    assert!(!graph.is_materialized(&u2));
    assert!(graph.has(&u2, "best_friend"));
    assert_eq!(
        graph
            .peek(&u2, "best_friend")
            .unwrap()
            .canonical_state()
            .as_one(),
        Some(&u1)
    );
}

#[test]
fn test_canonical_many_dedupes_and_mirrors() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let c1 = key(&registry, "config", "1");
    let c2 = key(&registry, "config", "2");
    let c3 = key(&registry, "config", "3");
    let c4 = key(&registry, "config", "4");

    graph
        .push(update_many(&app, "configs", &[&c1, &c2, &c1, &c3]))
        .unwrap();
    let edge = graph.peek(&app, "configs").unwrap();
    assert_eq!(ids(edge.canonical_state().as_many()), vec!["1", "2", "3"]);
    assert_eq!(edge.local_state(), edge.canonical_state());
    for config in [&c1, &c2, &c3] {
        assert_eq!(
            graph.peek(config, "app").unwrap().canonical_state().as_one(),
            Some(&app)
        );
    }

    graph.push(update_many(&app, "configs", &[&c3, &c4])).unwrap();
    let edge = graph.peek(&app, "configs").unwrap();
    assert_eq!(ids(edge.canonical_state().as_many()), vec!["3", "4"]);
    assert_eq!(ids(edge.local_state().as_many()), vec!["3", "4"]);
    for config in [&c1, &c2] {
        let inverse = graph.peek(config, "app").unwrap();
        assert_eq!(inverse.canonical_state(), RelationshipValue::One(None));
        assert_eq!(inverse.local_state(), RelationshipValue::One(None));
    }
    assert_eq!(
        graph.peek(&c4, "app").unwrap().local_state().as_one(),
        Some(&app)
    );
}

#[test]
fn test_canonical_inverse_moves_between_owners() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app1 = key(&registry, "app", "1");
    let app2 = key(&registry, "app", "2");
    let c1 = key(&registry, "config", "1");

    graph.push(update_many(&app1, "configs", &[&c1])).unwrap();
    graph.push(update_many(&app2, "configs", &[&c1])).unwrap();

    let old = graph.peek(&app1, "configs").unwrap();
    assert!(old.canonical_state().as_many().is_empty());
    assert!(old.local_state().as_many().is_empty());
    assert!(old.flags().is_empty);
    assert_eq!(
        graph.peek(&c1, "app").unwrap().canonical_state().as_one(),
        Some(&app2)
    );
}

#[test]
fn test_sync_one_to_one_stays_consistent() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let [u1, u2, u3, u4] = ["1", "2", "3", "4"].map(|id| key(&registry, "user", id));
    graph.push(update_one(&u1, "best_friend", Some(&u2))).unwrap();
    graph.push(update_one(&u3, "best_friend", Some(&u4))).unwrap();

    graph
        .push(Operation::ReplaceRelatedRecord {
            record: u1.clone(),
            field: "best_friend".to_string(),
            value: Some(u3.clone()),
        })
        .unwrap();

    let local = |graph: &Graph, k: &ResourceKey| {
        graph
            .peek(k, "best_friend")
            .unwrap()
            .local_state()
            .as_one()
            .cloned()
    };
    assert_eq!(local(&graph, &u1), Some(u3.clone()));
    assert_eq!(local(&graph, &u3), Some(u1.clone()));
    assert_eq!(local(&graph, &u2), None);
    assert_eq!(local(&graph, &u4), None);
    // Canonical state is untouched by local edits
    assert_eq!(
        graph
            .peek(&u2, "best_friend")
            .unwrap()
            .canonical_state()
            .as_one(),
        Some(&u1)
    );
}

#[test]
fn test_implicit_inverse_tracking() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let u1 = key(&registry, "user", "1");
    let co1 = key(&registry, "company", "1");
    let co2 = key(&registry, "company", "2");
    graph.mark_materialized(&u1);

    graph.push(update_one(&u1, "company", Some(&co1))).unwrap();
    let implicit = graph.get_implicit(&co1).unwrap();
    let edge = implicit.get("implicit-user:company").unwrap();
    assert!(edge.is_implicit());
    assert!(edge.contains(Layer::Canonical, &u1));

    graph.push(update_one(&u1, "company", Some(&co2))).unwrap();
    assert!(!graph
        .peek(&co1, "implicit-user:company")
        .unwrap()
        .contains(Layer::Canonical, &u1));
    assert!(graph
        .peek(&co2, "implicit-user:company")
        .unwrap()
        .contains(Layer::Local, &u1));

    graph.unload(&u1);
    assert!(!graph.has_implicit(&co2));
}

#[test]
fn test_rollback_is_idempotent() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let [c1, c2, c3] = ["1", "2", "3"].map(|id| key(&registry, "config", id));
    graph.push(update_many(&app, "configs", &[&c1, &c2])).unwrap();

    {
        let mut tx = graph.transaction();
        tx.push(Operation::AddToRelatedRecords {
            record: app.clone(),
            field: "configs".to_string(),
            value: vec![c3.clone()],
            index: None,
        })
        .unwrap();
        tx.push(Operation::RemoveFromRelatedRecords {
            record: app.clone(),
            field: "configs".to_string(),
            value: vec![c1.clone()],
            index: None,
        })
        .unwrap();
    }

    let changes = graph.changed_relationships(&app);
    let Some(RelationshipDiff::Collection {
        additions,
        removals,
        reordered,
        ..
    }) = changes.get("configs")
    else {
        panic!("expected a collection diff, got {changes:?}");
    };
    assert_eq!(ids(additions), vec!["3"]);
    assert_eq!(ids(removals), vec!["1"]);
    assert!(!reordered);
    assert_eq!(
        graph.peek(&c3, "app").unwrap().local_state().as_one(),
        Some(&app)
    );

    assert_eq!(graph.rollback_relationships(&app), vec!["configs"]);
    let edge = graph.peek(&app, "configs").unwrap();
    assert_eq!(ids(edge.local_state().as_many()), vec!["1", "2"]);
    assert!(graph.changed_relationships(&app).is_empty());
    assert_eq!(
        graph.peek(&c1, "app").unwrap().local_state().as_one(),
        Some(&app)
    );
    assert_eq!(
        graph.peek(&c3, "app").unwrap().local_state(),
        RelationshipValue::One(None)
    );

    assert!(graph.rollback_relationships(&app).is_empty());
    assert_eq!(
        ids(graph.peek(&app, "configs").unwrap().local_state().as_many()),
        vec!["1", "2"]
    );
}

#[test]
fn test_reorder_is_a_change() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let [c1, c2] = ["1", "2"].map(|id| key(&registry, "config", id));
    graph.push(update_many(&app, "configs", &[&c1, &c2])).unwrap();
    graph
        .push(Operation::ReplaceRelatedRecords {
            record: app.clone(),
            field: "configs".to_string(),
            value: vec![c2.clone(), c1.clone()],
        })
        .unwrap();

    match graph.changed_relationships(&app).get("configs") {
        Some(RelationshipDiff::Collection {
            additions,
            removals,
            reordered,
            ..
        }) => {
            assert!(additions.is_empty());
            assert!(removals.is_empty());
            assert!(*reordered);
        }
        other => panic!("expected a reorder, got {other:?}"),
    }
}

#[test]
fn test_reorder_requires_the_same_members() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let [c1, c2, c3] = ["1", "2", "3"].map(|id| key(&registry, "config", id));
    graph.push(update_many(&app, "configs", &[&c1, &c2])).unwrap();
    graph
        .push(Operation::ReplaceRelatedRecords {
            record: app.clone(),
            field: "configs".to_string(),
            value: vec![c2.clone(), c1.clone(), c3.clone()],
        })
        .unwrap();

    match graph.changed_relationships(&app).get("configs") {
        Some(RelationshipDiff::Collection {
            additions,
            removals,
            reordered,
            ..
        }) => {
            assert_eq!(ids(additions), vec!["3"]);
            assert!(removals.is_empty());
            assert!(!*reordered);
        }
        other => panic!("expected a collection diff, got {other:?}"),
    }
}

#[test]
fn test_mismatched_inverse_is_rejected_before_mutation() {
    init_logging();
    let schemas = test_schema();
    schemas.register(
        "user",
        ResourceSchema::default()
            .with_relationship(
                "posts",
                RelationshipSchema::has_many("post").inverse("author"),
            )
            .with_relationship("reviews", RelationshipSchema::has_many("post")),
    );
    schemas.register(
        "post",
        ResourceSchema::default().with_relationship(
            "author",
            RelationshipSchema::belongs_to("user").inverse("reviews"),
        ),
    );
    let registry = IdentifierRegistry::new();
    let mut graph = Graph::new(registry.clone(), Arc::new(schemas), GraphConfig::strict());
    let user = key(&registry, "user", "1");
    let post = key(&registry, "post", "1");

    let err = graph
        .push(update_many(&user, "posts", &[&post]))
        .unwrap_err();
    assert!(matches!(err, GraphError::SchemaViolation(_)), "{err:?}");
    assert!(!graph.has(&user, "posts"));
    assert!(!graph.has(&post, "author"));
    assert_eq!(graph.edge_count(), 0);

    let err = graph
        .push(update_one(&post, "author", Some(&user)))
        .unwrap_err();
    assert!(matches!(err, GraphError::SchemaViolation(_)), "{err:?}");
    assert!(!graph.has(&user, "reviews"));
}

#[test]
fn test_polymorphic_rejection_and_runtime_registration() {
    let (registry, schemas, mut graph) = create_test_graph();
    let person = key(&registry, "person", "1");
    let cat = key(&registry, "cat", "1");
    let dog = key(&registry, "dog", "1");
    let add = |value: &ResourceKey| Operation::AddToRelatedRecords {
        record: person.clone(),
        field: "pets".to_string(),
        value: vec![value.clone()],
        index: None,
    };

    let err = graph.push(add(&cat)).unwrap_err();
    assert!(matches!(err, GraphError::SchemaViolation(_)));
    assert!(graph
        .peek(&person, "pets")
        .is_none_or(|edge| edge.local_state().as_many().is_empty()));

    graph.push(add(&dog)).unwrap();
    assert_eq!(
        graph.peek(&dog, "owner").unwrap().local_state().as_one(),
        Some(&person)
    );

    schemas.register(
        "cat",
        ResourceSchema::default().with_relationship(
            "owner",
            RelationshipSchema::belongs_to("person")
                .inverse("pets")
                .as_type("pet"),
        ),
    );
    graph.push(add(&cat)).unwrap();
    assert_eq!(
        ids(graph.peek(&person, "pets").unwrap().local_state().as_many()),
        vec!["1", "1"]
    );
    assert_eq!(
        graph.peek(&cat, "owner").unwrap().local_state().as_one(),
        Some(&person)
    );
}

#[test]
fn test_new_local_members_survive_canonical_refresh() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let [c1, c2, c5] = ["1", "2", "5"].map(|id| key(&registry, "config", id));
    let fresh = registry.create_local("config", None).unwrap();
    graph.push(update_many(&app, "configs", &[&c1])).unwrap();
    graph
        .push(Operation::AddToRelatedRecords {
            record: app.clone(),
            field: "configs".to_string(),
            value: vec![fresh.clone(), c5.clone()],
            index: None,
        })
        .unwrap();

    graph.push(update_many(&app, "configs", &[&c1, &c2])).unwrap();

    let edge = graph.peek(&app, "configs").unwrap();
    assert_eq!(ids(edge.canonical_state().as_many()), vec!["1", "2"]);
    assert_eq!(
        edge.local_state().as_many(),
        &[c1.clone(), c2.clone(), fresh.clone()]
    );
    assert_eq!(
        graph.peek(&fresh, "app").unwrap().local_state().as_one(),
        Some(&app)
    );
    assert_eq!(
        graph.peek(&c5, "app").unwrap().local_state(),
        RelationshipValue::One(None)
    );
}

#[test]
fn test_canonical_null_keeps_new_local_value() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let u1 = key(&registry, "user", "1");
    let fresh = registry.create_local("user", None).unwrap();
    graph
        .push(Operation::ReplaceRelatedRecord {
            record: u1.clone(),
            field: "best_friend".to_string(),
            value: Some(fresh.clone()),
        })
        .unwrap();

    graph.push(update_one(&u1, "best_friend", None)).unwrap();

    let edge = graph.peek(&u1, "best_friend").unwrap();
    assert_eq!(edge.canonical_state(), RelationshipValue::One(None));
    assert_eq!(edge.local_state().as_one(), Some(&fresh));
    assert!(edge.flags().has_received_data);
    assert_eq!(
        graph.peek(&fresh, "best_friend").unwrap().local_state().as_one(),
        Some(&u1)
    );

    // A saved local value is reset as usual
    let u2 = key(&registry, "user", "2");
    graph
        .push(Operation::ReplaceRelatedRecord {
            record: u1.clone(),
            field: "best_friend".to_string(),
            value: Some(u2.clone()),
        })
        .unwrap();
    graph.push(update_one(&u1, "best_friend", None)).unwrap();
    assert_eq!(
        graph.peek(&u1, "best_friend").unwrap().local_state(),
        RelationshipValue::One(None)
    );
    assert_eq!(
        graph.peek(&u2, "best_friend").unwrap().local_state(),
        RelationshipValue::One(None)
    );
}

#[test]
fn test_merge_remaps_inverse_edges() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let post = key(&registry, "post", "1");
    let existing = key(&registry, "user", "9");
    let friend = key(&registry, "user", "2");
    let fresh = registry.create_local("user", None).unwrap();
    graph.push(update_one(&post, "author", Some(&existing))).unwrap();
    graph
        .push(Operation::ReplaceRelatedRecord {
            record: fresh.clone(),
            field: "best_friend".to_string(),
            value: Some(friend.clone()),
        })
        .unwrap();

    let outcome = registry.merge(&existing, &fresh).unwrap();
    assert!(outcome.kept.ptr_eq(&fresh));
    let mut rx = graph.subscribe();
    graph
        .push(Operation::MergeIdentifiers {
            record: outcome.abandoned.clone(),
            value: outcome.kept.clone(),
        })
        .unwrap();

    let author = graph.peek(&post, "author").unwrap();
    assert!(author.canonical_state().as_one().unwrap().ptr_eq(&fresh));
    assert!(author.local_state().as_one().unwrap().ptr_eq(&fresh));
    let posts = graph.peek(&fresh, "posts").unwrap();
    assert!(posts.contains(Layer::Canonical, &post));
    assert_eq!(posts.key(), &fresh);
    assert!(graph.edges_of(&existing).is_none());
    assert_eq!(
        graph.peek(&fresh, "best_friend").unwrap().local_state().as_one(),
        Some(&friend)
    );

    let events: Vec<GraphEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(events.contains(&GraphEvent::IdentifiersMerged {
        from: existing.clone(),
        to: fresh.clone()
    }));
}

#[test]
fn test_notifications_flush_once_per_transaction() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let [u1, u2, u3] = ["1", "2", "3"].map(|id| key(&registry, "user", id));
    let mut rx = graph.subscribe();

    {
        let mut tx = graph.transaction();
        tx.push(update_one(&u1, "best_friend", Some(&u2))).unwrap();
        assert!(rx.try_recv().is_err());
        tx.push(Operation::ReplaceRelatedRecord {
            record: u1.clone(),
            field: "best_friend".to_string(),
            value: Some(u3.clone()),
        })
        .unwrap();
        assert_eq!(tx.applied(), 2);
    }

    let events: Vec<GraphEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let changed: Vec<&ResourceKey> = events.iter().map(|event| event.key()).collect();
    assert_eq!(changed, vec![&u2, &u1, &u3]);
    assert!(events
        .iter()
        .all(|event| event.field() == Some("best_friend")));
}

#[test]
fn test_dropped_receiver_is_not_an_error() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let [u1, u2] = ["1", "2"].map(|id| key(&registry, "user", id));
    drop(graph.subscribe());
    graph.push(update_one(&u1, "best_friend", Some(&u2))).unwrap();
    graph.push(update_one(&u1, "best_friend", None)).unwrap();
}

#[test]
fn test_events_reach_a_shared_sender() {
    let (registry, _schemas, graph) = create_test_graph();
    let [u1, u2] = ["1", "2"].map(|id| key(&registry, "user", id));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut graph = graph.with_sender(tx);

    graph.push(update_one(&u1, "best_friend", Some(&u2))).unwrap();
    let events: Vec<GraphEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(events
        .iter()
        .any(|event| event.key() == &u1 && event.field() == Some("best_friend")));
}

#[test]
fn test_local_edits_after_remove_are_stale() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let [u1, u2] = ["1", "2"].map(|id| key(&registry, "user", id));
    graph.push(update_one(&u1, "best_friend", Some(&u2))).unwrap();

    graph
        .push(Operation::RemoveIdentifier { record: u1.clone() })
        .unwrap();
    assert!(graph.is_removed(&u1));
    assert!(graph.edges_of(&u1).is_none());

    let err = graph
        .push(Operation::ReplaceRelatedRecord {
            record: u1.clone(),
            field: "best_friend".to_string(),
            value: Some(u2.clone()),
        })
        .unwrap_err();
    assert_eq!(
        err,
        GraphError::StaleMutation {
            resource: "user:1".to_string(),
            field: "best_friend".to_string()
        }
    );
}

#[test]
fn test_local_edits_after_unload_need_fresh_state() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let c1 = key(&registry, "config", "1");
    graph.mark_materialized(&app);
    graph.unload(&app);

    let add = Operation::AddToRelatedRecords {
        record: app.clone(),
        field: "configs".to_string(),
        value: vec![c1.clone()],
        index: None,
    };
    assert!(matches!(
        graph.push(add.clone()),
        Err(GraphError::StaleMutation { .. })
    ));
    graph.mark_materialized(&app);
    graph.push(add).unwrap();
}

#[test]
fn test_operation_shape_is_validated_before_mutation() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let c1 = key(&registry, "config", "1");
    let u1 = key(&registry, "user", "1");

    let err = graph
        .push(Operation::ReplaceRelatedRecord {
            record: app.clone(),
            field: "configs".to_string(),
            value: Some(c1.clone()),
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidOperation(_)));

    let err = graph
        .push(update_many(&u1, "best_friend", &[&c1]))
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidOperation(_)));

    // A mistyped member rejects the whole batch
    let err = graph
        .push(Operation::AddToRelatedRecords {
            record: app.clone(),
            field: "configs".to_string(),
            value: vec![c1.clone(), u1.clone()],
            index: None,
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::SchemaViolation(_)));
    assert!(!graph.has(&c1, "app"));
}

#[test]
fn test_unload_sync_inverse_removes_membership() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let c1 = key(&registry, "config", "1");
    graph.mark_materialized(&app);
    graph.push(update_many(&app, "configs", &[&c1])).unwrap();

    graph.unload(&c1);

    let edge = graph.peek(&app, "configs").unwrap();
    assert!(edge.canonical_state().as_many().is_empty());
    assert!(edge.local_state().as_many().is_empty());
    assert!(!edge.flags().has_dematerialized_inverse);
}

#[test]
fn test_unload_prunes_unmaterialized_containers() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let c1 = key(&registry, "config", "1");
    graph.push(update_one(&c1, "app", Some(&app))).unwrap();
    assert!(graph.edges_of(&app).is_some());

    graph.unload(&c1);
    assert!(graph.edges_of(&app).is_none());
}

#[test]
fn test_unload_async_inverse_keeps_membership() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let u1 = key(&registry, "user", "1");
    let p1 = key(&registry, "post", "1");
    graph.push(update_one(&p1, "author", Some(&u1))).unwrap();
    assert!(!graph.is_releasable(&p1));

    graph.unload(&p1);

    let posts = graph.peek(&u1, "posts").unwrap();
    assert!(posts.contains(Layer::Canonical, &p1));
    assert!(posts.flags().has_dematerialized_inverse);
    let author = graph.peek(&p1, "author").unwrap();
    assert!(author.is_vacant());
}

#[test]
fn test_unload_async_many_without_inverse_keeps_local_only_members() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let app = key(&registry, "app", "1");
    let [t1, t2] = ["1", "2"].map(|id| key(&registry, "tag", id));
    graph.push(update_many(&app, "tags", &[&t1])).unwrap();
    graph
        .push(Operation::AddToRelatedRecords {
            record: app.clone(),
            field: "tags".to_string(),
            value: vec![t2.clone()],
            index: None,
        })
        .unwrap();

    graph.unload(&app);

    let tags = graph.peek(&app, "tags").unwrap();
    assert!(tags.canonical_state().as_many().is_empty());
    assert_eq!(tags.local_state().as_many(), &[t2.clone()]);
    assert!(tags.flags().is_stale);
    assert!(!graph.has_implicit(&t1));
    assert!(graph
        .peek(&t2, "implicit-app:tags")
        .unwrap()
        .contains(Layer::Local, &app));
}

#[test]
fn test_delete_record_removes_from_every_inverse() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let [u1, u2] = ["1", "2"].map(|id| key(&registry, "user", id));
    let p1 = key(&registry, "post", "1");
    graph.mark_materialized(&u2);
    graph.mark_materialized(&p1);
    graph.push(update_one(&u1, "best_friend", Some(&u2))).unwrap();
    graph.push(update_one(&p1, "author", Some(&u1))).unwrap();

    graph
        .push(Operation::DeleteRecord {
            record: u1.clone(),
            is_new: false,
        })
        .unwrap();

    assert!(graph.peek(&u2, "best_friend").unwrap().is_vacant());
    assert!(graph.peek(&p1, "author").unwrap().is_vacant());
    assert!(graph.edges_of(&u1).is_none());
    assert!(graph.is_removed(&u1));
}

#[test]
fn test_related_link_marks_async_edge_stale() {
    let (registry, _schemas, mut graph) = create_test_graph();
    let u1 = key(&registry, "user", "1");
    let p1 = key(&registry, "post", "1");

    graph
        .push(Operation::UpdateRelationship {
            record: u1.clone(),
            field: "posts".to_string(),
            value: RelationshipPayload::related_link("/users/1/posts"),
        })
        .unwrap();
    let state = graph.get_data(&u1, "posts").unwrap();
    assert!(state.flags.is_stale);
    assert_eq!(
        state.links.and_then(|links| links.related).as_deref(),
        Some("/users/1/posts")
    );

    graph.push(update_many(&u1, "posts", &[&p1])).unwrap();
    let state = graph.get_data(&u1, "posts").unwrap();
    assert!(!state.flags.is_stale);
    assert!(state.flags.has_received_data);
    assert!(!state.flags.is_empty);
    assert_eq!(state.data, RelationshipValue::Many(vec![p1]));
}
