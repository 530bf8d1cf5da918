//! LAN backend over the loopback interface.

mod common;

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use common::{Node, init_tracing, lan_config, port_block, run_until, settle};
use rift_netplay::peer::LobbyDescriptor;
use rift_netplay::transport::{LanTransport, Reliability, Transport, TransportEvent};
use rift_netproto::control::{ControlKind, decode_control};

const WAIT: Duration = Duration::from_secs(5);

fn lobby_list(node: &Node) -> Option<Vec<LobbyDescriptor>> {
    node.find(|e| match e {
        TransportEvent::LobbyListUpdated(list) => Some(list.clone()),
        _ => None,
    })
}

fn join_failure(node: &Node) -> Option<String> {
    node.find(|e| match e {
        TransportEvent::LobbyJoinFailed { reason } => Some(reason.clone()),
        _ => None,
    })
}

fn host_lobby(ports: &[u16], password: Option<&str>, max_players: u8) -> Node {
    let mut host = Node::lan("Host", lan_config(ports));
    host.transport.create_lobby("Friday", password, max_players);
    host.pump();
    assert!(host.has(|e| matches!(e, TransportEvent::LobbyCreated(_))));
    host
}

fn discover_one(client: &mut Node, host: &mut Node) -> LobbyDescriptor {
    client.transport.request_lobby_list();
    assert!(
        run_until(&mut [host, &mut *client], WAIT, |n| {
            lobby_list(&n[1]).is_some_and(|l| !l.is_empty())
        }),
        "lobby not discovered"
    );
    lobby_list(client).unwrap().remove(0)
}

#[test]
fn client_discovers_and_joins_lobby() {
    init_tracing();
    let ports = port_block(4);
    let mut host = host_lobby(&ports, None, 4);
    let mut client = Node::lan("Client", lan_config(&ports));

    let lobby = discover_one(&mut client, &mut host);
    let host_addr = host.addr.unwrap();
    assert_eq!(lobby.id, host_addr.to_string());
    assert_eq!(lobby.name, "Friday");
    assert_eq!(lobby.owner_name, "Host");
    assert_eq!((lobby.current_players, lobby.max_players), (1, 4));

    client.transport.join_lobby(&lobby, None);
    assert!(run_until(&mut [&mut host, &mut client], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PlayerJoined(_)))
            && n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));

    let (joined_lobby, members, local) = client
        .find(|e| match e {
            TransportEvent::LobbyJoined {
                lobby,
                members,
                local,
            } => Some((lobby.clone(), members.clone(), local.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(joined_lobby.current_players, 2);
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].id.as_str(), lobby.id);
    assert_eq!(local.id.to_string(), client.addr.unwrap().to_string());

    let joined = host
        .find(|e| match e {
            TransportEvent::PlayerJoined(peer) => Some(peer.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(joined.id, local.id);
    assert_eq!(joined.name, "Client");

    // Later discovery answers carry the new head count.
    let mut browser = Node::lan("Browser", lan_config(&ports));
    browser.transport.request_lobby_list();
    assert!(run_until(&mut [&mut host, &mut client, &mut browser], WAIT, |n| {
        lobby_list(&n[2]).is_some_and(|l| !l.is_empty())
    }));
    let relisted = lobby_list(&browser).unwrap().remove(0);
    assert_eq!((relisted.current_players, relisted.max_players), (2, 4));
}

#[test]
fn discovery_with_no_hosts_reports_empty_list() {
    init_tracing();
    let ports = port_block(3);
    let mut client = Node::lan("Client", lan_config(&ports));

    client.transport.request_lobby_list();
    settle(&mut [&mut client], Duration::from_millis(500));
    assert!(lobby_list(&client).is_none(), "list reported before the window closed");

    assert!(run_until(&mut [&mut client], WAIT, |n| lobby_list(&n[0]).is_some()));
    assert!(lobby_list(&client).unwrap().is_empty());
}

#[test]
fn game_data_flows_between_members() {
    init_tracing();
    let ports = port_block(4);
    let mut host = host_lobby(&ports, None, 4);
    let mut client = Node::lan("Client", lan_config(&ports));
    let lobby = discover_one(&mut client, &mut host);
    client.transport.join_lobby(&lobby, None);
    assert!(run_until(&mut [&mut host, &mut client], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));

    client
        .transport
        .send_to_host(b"command", Reliability::Reliable)
        .unwrap();
    host.transport
        .send_to_all(b"snapshot", Reliability::Unreliable)
        .unwrap();

    assert!(run_until(&mut [&mut host, &mut client], WAIT, |n| {
        let got = |node: &Node, body: &'static [u8]| {
            node.has(|e| matches!(e, TransportEvent::PacketReceived { payload, .. } if &payload[..] == body))
        };
        got(&*n[0], &b"command"[..]) && got(&*n[1], &b"snapshot"[..])
    }));

    let from = host
        .find(|e| match e {
            TransportEvent::PacketReceived { from, .. } => Some(from.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(from.to_string(), client.addr.unwrap().to_string());
}

#[test]
fn game_data_from_strangers_is_dropped() {
    init_tracing();
    let ports = port_block(4);
    let mut host = host_lobby(&ports, None, 4);

    let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
    stranger.send_to(b"not a member", host.addr.unwrap()).unwrap();

    settle(&mut [&mut host], Duration::from_millis(300));
    assert!(!host.has(|e| matches!(e, TransportEvent::PacketReceived { .. })));
}

#[test]
fn browser_sees_every_host() {
    init_tracing();
    let ports = port_block(4);
    let mut first = host_lobby(&ports, None, 4);
    let mut second = host_lobby(&ports, Some("pw"), 2);
    let mut browser = Node::lan("Browser", lan_config(&ports));

    assert_ne!(first.addr, second.addr);

    browser.transport.request_lobby_list();
    assert!(run_until(
        &mut [&mut first, &mut second, &mut browser],
        WAIT,
        |n| lobby_list(&n[2]).is_some_and(|l| l.len() == 2)
    ));

    let list = lobby_list(&browser).unwrap();
    let ids: Vec<_> = list.iter().map(|l| l.id.clone()).collect();
    assert!(ids.contains(&first.addr.unwrap().to_string()));
    assert!(ids.contains(&second.addr.unwrap().to_string()));
    assert_eq!(list.iter().filter(|l| l.has_password).count(), 1);
}

#[test]
fn instances_on_one_machine_take_distinct_ports() {
    init_tracing();
    let ports = port_block(4);
    let a = Node::lan("A", lan_config(&ports));
    let b = Node::lan("B", lan_config(&ports));

    let (a, b) = (a.addr.unwrap(), b.addr.unwrap());
    assert_ne!(a.port(), b.port());
    assert!(ports.contains(&a.port()));
    assert!(ports.contains(&b.port()));
}

#[test]
fn wrong_password_is_rejected() {
    init_tracing();
    let ports = port_block(4);
    let mut host = host_lobby(&ports, Some("secret"), 4);
    let mut client = Node::lan("Client", lan_config(&ports));
    let lobby = discover_one(&mut client, &mut host);
    assert!(lobby.has_password);

    client.transport.join_lobby(&lobby, Some("guess"));
    assert!(run_until(&mut [&mut host, &mut client], WAIT, |n| {
        join_failure(&n[1]).is_some()
    }));
    assert_eq!(join_failure(&client).unwrap(), "wrong password");
    assert!(!host.has(|e| matches!(e, TransportEvent::PlayerJoined(_))));

    client.transport.join_lobby(&lobby, Some("secret"));
    assert!(run_until(&mut [&mut host, &mut client], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));
}

#[test]
fn full_lobby_is_rejected() {
    init_tracing();
    let ports = port_block(4);
    let mut host = host_lobby(&ports, None, 1);
    let mut client = Node::lan("Client", lan_config(&ports));
    let lobby = discover_one(&mut client, &mut host);

    client.transport.join_lobby(&lobby, None);
    assert!(run_until(&mut [&mut host, &mut client], WAIT, |n| {
        join_failure(&n[1]).is_some()
    }));
    assert_eq!(join_failure(&client).unwrap(), "lobby is full");
}

#[test]
fn unanswered_join_times_out() {
    init_tracing();
    let ports = port_block(2);
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut config = lan_config(&ports);
    config.join_timeout_ms = 300;
    let mut client = Node::lan("Client", config);

    client
        .transport
        .join_lobby(&LobbyDescriptor::direct(silent.local_addr().unwrap()), None);
    assert!(run_until(&mut [&mut client], WAIT, |n| {
        join_failure(&n[0]).is_some()
    }));
    assert_eq!(join_failure(&client).unwrap(), "join timed out");

    // The abandoned host is told to let go of the slot.
    silent
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut buf = [0u8; 2048];
    let mut kinds = Vec::new();
    while let Ok((len, _)) = silent.recv_from(&mut buf) {
        if let Ok(packet) = decode_control(&buf[..len]) {
            kinds.push(packet.kind);
        }
    }
    assert!(kinds.contains(&ControlKind::JoinRequest));
    assert_eq!(kinds.last(), Some(&ControlKind::Leave));
}

#[test]
fn deadlines_follow_the_tick_clock() {
    init_tracing();
    let ports = port_block(2);
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = lan_config(&ports);
    let (join_timeout, window) = (config.join_timeout(), config.discovery_window());
    let mut transport = LanTransport::new(config, "Client");
    transport.initialize().unwrap();
    let events = transport.events();

    let start = Instant::now() + Duration::from_secs(60);
    transport.tick(start);
    transport.join_lobby(&LobbyDescriptor::direct(silent.local_addr().unwrap()), None);
    transport.request_lobby_list();

    transport.tick(start + window);
    assert_eq!(events.try_iter().count(), 0, "window closed early");

    transport.tick(start + window + Duration::from_millis(1));
    transport.tick(start + join_timeout - Duration::from_millis(1));
    let seen: Vec<TransportEvent> = events.try_iter().collect();
    assert!(matches!(&seen[..], [TransportEvent::LobbyListUpdated(list)] if list.is_empty()));

    transport.tick(start + join_timeout);
    assert!(events.try_iter().any(
        |e| matches!(e, TransportEvent::LobbyJoinFailed { reason } if reason == "join timed out")
    ));
}

#[test]
fn leaving_is_reported_to_the_other_side() {
    init_tracing();
    let ports = port_block(5);
    let mut host = host_lobby(&ports, None, 4);
    let mut first = Node::lan("First", lan_config(&ports));
    let mut second = Node::lan("Second", lan_config(&ports));
    let lobby = discover_one(&mut first, &mut host);

    first.transport.join_lobby(&lobby, None);
    assert!(run_until(&mut [&mut host, &mut first], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));
    second.transport.join_lobby(&lobby, None);
    assert!(run_until(&mut [&mut host, &mut first, &mut second], WAIT, |n| {
        n[2].has(|e| matches!(e, TransportEvent::LobbyJoined { .. }))
    }));

    // The earlier joiner hears about the later one.
    assert!(run_until(&mut [&mut host, &mut first, &mut second], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::PlayerJoined(p) if p.name == "Second"))
    }));

    second.transport.leave_lobby();
    assert!(run_until(&mut [&mut host, &mut first, &mut second], WAIT, |n| {
        n[0].has(|e| matches!(e, TransportEvent::PlayerLeft(_)))
            && n[1].has(|e| matches!(e, TransportEvent::PlayerLeft(_)))
    }));

    host.transport.leave_lobby();
    assert!(run_until(&mut [&mut host, &mut first, &mut second], WAIT, |n| {
        n[1].has(|e| matches!(e, TransportEvent::LobbyLeft { reason } if reason == "host left"))
    }));
    assert!(first.transport.send_to_host(b"x", Reliability::Reliable).is_err());
}

#[test]
fn shutdown_is_idempotent() {
    init_tracing();
    let ports = port_block(2);
    let mut host = host_lobby(&ports, None, 4);
    host.transport.shutdown();
    host.transport.shutdown();
    host.pump();
    assert!(host.has(|e| matches!(e, TransportEvent::LobbyLeft { .. })));
    assert!(host.transport.local_peer().is_none());
}
