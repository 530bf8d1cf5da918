//! Platform backend against the in-process loopback service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Node, init_tracing, run_until, settle};
use rift_netplay::NetplayError;
use rift_netplay::peer::{LobbyDescriptor, PeerId};
use rift_netplay::transport::platform::{LoopbackCloud, PlatformTransport};
use rift_netplay::transport::{Reliability, Transport, TransportEvent};

const WAIT: Duration = Duration::from_secs(1);

fn node(cloud: &LoopbackCloud, user: u64, name: &str) -> Node {
    Node::new(Box::new(PlatformTransport::new(Arc::new(
        cloud.connect(user, name),
    ))))
}

fn created(node: &Node) -> Option<LobbyDescriptor> {
    node.find(|e| match e {
        TransportEvent::LobbyCreated(lobby) => Some(lobby.clone()),
        _ => None,
    })
}

fn listed(node: &Node) -> Option<Vec<LobbyDescriptor>> {
    node.find(|e| match e {
        TransportEvent::LobbyListUpdated(list) => Some(list.clone()),
        _ => None,
    })
}

/// Alice hosts, Bob joins.
fn lobby_pair(cloud: &LoopbackCloud, password: Option<&str>) -> (Node, Node, LobbyDescriptor) {
    let mut alice = node(cloud, 1, "Alice");
    let mut bob = node(cloud, 2, "Bob");

    alice.transport.create_lobby("Raid", password, 4);
    assert!(run_until(&mut [&mut alice], WAIT, |n| created(&n[0]).is_some()));
    let lobby = created(&alice).unwrap();

    bob.transport.join_lobby(&lobby, password);
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));
    (alice, bob, lobby)
}

#[test]
fn lobby_is_listed_with_metadata() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let mut alice = node(&cloud, 1, "Alice");
    let mut bob = node(&cloud, 2, "Bob");

    alice.transport.create_lobby("Raid", Some("pw"), 3);
    assert!(run_until(&mut [&mut alice], WAIT, |n| created(&n[0]).is_some()));

    bob.transport.request_lobby_list();
    assert!(run_until(&mut [&mut bob], WAIT, |n| listed(&n[0]).is_some()));
    let list = listed(&bob).unwrap();
    assert_eq!(list.len(), 1);
    let lobby = &list[0];
    assert_eq!(lobby.name, "Raid");
    assert_eq!(lobby.owner, PeerId::from("1"));
    assert_eq!(lobby.owner_name, "Alice");
    assert_eq!(lobby.max_players, 3);
    assert!(lobby.has_password);
}

#[test]
fn join_reports_roster_with_host_first() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let (alice, bob, lobby) = lobby_pair(&cloud, None);

    let (members, local) = bob
        .find(|e| match e {
            TransportEvent::LobbyJoined { members, local, .. } => {
                Some((members.clone(), local.clone()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(members[0].id, lobby.owner);
    assert_eq!(members.len(), 2);
    assert_eq!(local.id, PeerId::from("2"));

    assert!(alice.has(|e| matches!(e, TransportEvent::PlayerJoined(p) if p.name == "Bob")));
}

#[test]
fn listed_lobby_password_is_checked_before_joining() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let mut alice = node(&cloud, 1, "Alice");
    let mut bob = node(&cloud, 2, "Bob");

    alice.transport.create_lobby("Raid", Some("secret"), 4);
    assert!(run_until(&mut [&mut alice], WAIT, |n| created(&n[0]).is_some()));
    bob.transport.request_lobby_list();
    assert!(run_until(&mut [&mut bob], WAIT, |n| listed(&n[0]).is_some()));
    let lobby = listed(&bob).unwrap().remove(0);

    bob.transport.join_lobby(&lobby, Some("guess"));
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyJoinFailed { reason } if reason == "wrong password"))
    }));
    assert!(!alice.has(|e| matches!(e, TransportEvent::PlayerJoined(_))));

    bob.transport.join_lobby(&lobby, Some("secret"));
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PlayerJoined(p) if p.name == "Bob"))
            && n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));
}

#[test]
fn unlisted_lobby_password_is_checked_after_joining() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let mut alice = node(&cloud, 1, "Alice");
    let mut bob = node(&cloud, 2, "Bob");

    alice.transport.create_lobby("Raid", Some("secret"), 4);
    assert!(run_until(&mut [&mut alice], WAIT, |n| created(&n[0]).is_some()));
    let lobby = created(&alice).unwrap();

    bob.transport.join_lobby(&lobby, None);
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PlayerLeft(_)))
            && n[1].has(|e| matches!(e, TransportEvent::LobbyJoinFailed { .. }))
    }));
    assert!(!bob.has(|e| matches!(e, TransportEvent::LobbyJoined { .. })));
}

#[test]
fn packets_are_routed_between_members() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let (mut alice, mut bob, _) = lobby_pair(&cloud, None);

    assert!(capabilities_are_native(&alice));
    bob.transport
        .send_to_host(b"cmd", Reliability::Reliable)
        .unwrap();
    alice
        .transport
        .send_to_player(&PeerId::from("2"), b"direct", Reliability::Reliable)
        .unwrap();
    assert!(matches!(
        alice
            .transport
            .send_to_player(&PeerId::from("99"), b"x", Reliability::Reliable),
        Err(NetplayError::UnknownPeer(_))
    ));
    assert!(matches!(
        alice.transport.send_to_host(b"x", Reliability::Reliable),
        Err(NetplayError::InvalidState(_))
    ));

    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PacketReceived { payload, .. } if &payload[..] == b"cmd"))
            && n[1].has(|e| matches!(e, TransportEvent::PacketReceived { payload, .. } if &payload[..] == b"direct"))
    }));
}

fn capabilities_are_native(node: &Node) -> bool {
    node.transport.capabilities().native_reliable
}

#[test]
fn host_leaving_closes_the_lobby_for_members() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let (mut alice, mut bob, _) = lobby_pair(&cloud, None);

    alice.transport.leave_lobby();
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyLeft { .. }))
    }));
    assert_eq!(cloud.lobby_count(), 0);
    assert!(alice.has(|e| matches!(e, TransportEvent::LobbyLeft { .. })));
}

#[test]
fn member_leaving_is_announced() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let (mut alice, mut bob, _) = lobby_pair(&cloud, None);

    bob.transport.leave_lobby();
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PlayerLeft(id) if *id == PeerId::from("2")))
    }));
}

#[test]
fn persona_and_avatar_updates_are_forwarded() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let (mut alice, mut bob, _) = lobby_pair(&cloud, None);

    cloud.rename(2, "Robert");
    cloud.avatar_loaded(1, 2);
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PlayerInfoUpdated(p) if p.name == "Robert"))
            && n[0].has(|e| matches!(e, TransportEvent::AvatarReady(id) if *id == PeerId::from("2")))
    }));
}

#[test]
fn connection_loss_is_a_disconnect() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let (mut alice, mut bob, _) = lobby_pair(&cloud, None);

    cloud.disconnect(2, "network down");
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::Disconnected { reason } if reason == "network down"))
            && n[0].has(|e| matches!(e, TransportEvent::PlayerLeft(_)))
    }));
    assert!(matches!(
        bob.transport.send_to_all(b"x", Reliability::Reliable),
        Err(NetplayError::NotInLobby)
    ));
}

#[test]
fn service_not_running_fails_initialize() {
    let cloud = LoopbackCloud::new();
    let service = cloud.connect(1, "Alice");
    cloud.disconnect(1, "offline");
    let mut transport = PlatformTransport::new(Arc::new(service));
    assert!(matches!(
        transport.initialize(),
        Err(NetplayError::ServiceUnavailable(_))
    ));
}

#[test]
fn leaving_while_join_is_pending_cancels_it() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let mut alice = node(&cloud, 1, "Alice");
    let mut bob = node(&cloud, 2, "Bob");

    alice.transport.create_lobby("Raid", None, 4);
    assert!(run_until(&mut [&mut alice], WAIT, |n| created(&n[0]).is_some()));
    let lobby = created(&alice).unwrap();

    bob.transport.join_lobby(&lobby, None);
    bob.transport.leave_lobby();
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PlayerLeft(_)))
            && n[1].has(|e| matches!(e, TransportEvent::LobbyJoinFailed { reason } if reason == "join cancelled"))
    }));
    assert!(!bob.has(|e| matches!(e, TransportEvent::LobbyJoined { .. })));
    assert!(matches!(
        bob.transport.send_to_host(b"late", Reliability::Reliable),
        Err(NetplayError::NotInLobby)
    ));

    // The lobby stays open to others.
    let mut carol = node(&cloud, 3, "Carol");
    carol.transport.join_lobby(&lobby, None);
    assert!(run_until(&mut [&mut alice, &mut carol], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));
}

#[test]
fn second_join_is_refused_while_first_is_pending() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let mut alice = node(&cloud, 1, "Alice");
    let mut bob = node(&cloud, 2, "Bob");

    alice.transport.create_lobby("Raid", None, 4);
    assert!(run_until(&mut [&mut alice], WAIT, |n| created(&n[0]).is_some()));
    let lobby = created(&alice).unwrap();

    bob.transport.join_lobby(&lobby, None);
    bob.transport.join_lobby(&lobby, None);
    bob.transport.create_lobby("Other", None, 2);
    assert!(run_until(&mut [&mut alice, &mut bob], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));
    settle(&mut [&mut alice, &mut bob], Duration::from_millis(100));

    let joined = bob
        .seen
        .iter()
        .filter(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
        .count();
    assert_eq!(joined, 1);
    assert!(bob.has(|e| matches!(e, TransportEvent::LobbyJoinFailed { reason } if reason == "already in a lobby")));
    assert!(bob.has(|e| matches!(e, TransportEvent::LobbyCreateFailed { reason } if reason == "already in a lobby")));
    assert!(!bob.has(|e| matches!(e, TransportEvent::LobbyCreated(_))));
    assert_eq!(cloud.lobby_count(), 1);
}

#[test]
fn leaving_while_create_is_pending_closes_the_lobby() {
    init_tracing();
    let cloud = LoopbackCloud::new();
    let mut alice = node(&cloud, 1, "Alice");

    alice.transport.create_lobby("Raid", None, 4);
    alice.transport.leave_lobby();
    settle(&mut [&mut alice], Duration::from_millis(100));
    assert!(alice.has(|e| matches!(e, TransportEvent::LobbyCreateFailed { reason } if reason == "create cancelled")));

    assert!(!alice.has(|e| matches!(e, TransportEvent::LobbyCreated(_))));
    assert_eq!(cloud.lobby_count(), 0);
}
