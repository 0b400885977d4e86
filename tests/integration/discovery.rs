use crate::*;

#[tokio::test]
async fn test_members_discover_each_other() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    let mut b = Node::start(&hub, 2).await;
    a.join(group("ops")).await;
    b.join(group("ops")).await;

    // B's join announcement reaches A directly.
    let seen = a
        .expect("b discovered", |e| matches!(e, Event::GroupNodeDiscovered { .. }))
        .await;
    match seen {
        Event::GroupNodeDiscovered { id, node } => {
            assert_eq!(id, "ops");
            assert_eq!(node.identity.node_id, b.id);
            assert_eq!(node.identity.display_name, "node-2");
        }
        other => panic!("unexpected {other:?}"),
    }

    // A's periodic announcement reaches B.
    let seen = b
        .expect("a discovered", |e| matches!(e, Event::GroupNodeDiscovered { .. }))
        .await;
    if let Event::GroupNodeDiscovered { node, .. } = seen {
        assert_eq!(node.identity.node_id, a.id);
    }

    let status = a.engine.group_status("ops").await.unwrap();
    assert_eq!(status.members, 2);
}

#[tokio::test]
async fn test_leave_undiscovers_member() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    assert_eq!(nodes[1].engine.leave_group("ops"), EngineResult::Ok);
    nodes[1]
        .expect("left", |e| *e == Event::GroupLeft { id: "ops".into() })
        .await;

    let gone = nodes[0]
        .expect("undiscovered", |e| matches!(e, Event::GroupNodeUndiscovered { .. }))
        .await;
    if let Event::GroupNodeUndiscovered { node, .. } = gone {
        assert_eq!(node.identity.display_name, "node-2");
    }
    nodes[0]
        .expect("count back to one", |e| {
            *e == Event::GroupMemberCountChanged {
                id: "ops".into(),
                count: 1,
            }
        })
        .await;
}

#[tokio::test]
async fn test_listen_only_member_stays_hidden() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    let mut b = Node::start(&hub, 2).await;
    a.join(group("ops")).await;

    let mut hidden = group("ops");
    hidden.presence.listen_only = true;
    b.join(hidden).await;

    // B still hears A.
    b.expect("a discovered", |e| matches!(e, Event::GroupNodeDiscovered { .. }))
        .await;
    a.expect_none("discovery of a listen-only member", |e| {
        matches!(e, Event::GroupNodeDiscovered { .. })
    })
    .await;
}

#[tokio::test]
async fn test_separate_groups_do_not_mix() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    let mut b = Node::start(&hub, 2).await;
    a.join(group("alpha")).await;
    b.join(group("bravo")).await;

    a.expect_none("cross-group discovery", |e| {
        matches!(e, Event::GroupNodeDiscovered { .. })
    })
    .await;
    assert_eq!(hub.members("alpha"), 1);
    assert_eq!(hub.members("bravo"), 1);
}
