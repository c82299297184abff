mod common;

use std::net::{IpAddr, SocketAddr};

use common::{CLIENT_IP, SERVER_IP, Serving, client_config, server_config, stack_on};
use qnet::net::{ControlMessage, Datagram, ServerInfoReply};
use qnet::{ManualClock, NetConfig, NetStack, PlayerRecord, ProbeKind, SimWire, SizeBuf};

const SECOND_SERVER_IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 3));

/// Steps the client's server list to completion, letting each server answer
/// between polls.
fn run_slist(client: &mut NetStack, clock: &ManualClock, servers: &mut [&mut NetStack]) {
    client.slist();
    let mut polls = 0;
    while client.slist_in_progress() {
        client.poll().unwrap();
        for server in servers.iter_mut() {
            for _ in 0..4 {
                server.check_new_connections().unwrap();
            }
        }
        clock.advance(0.05);
        polls += 1;
        assert!(polls < 200, "server list never finished");
    }
}

#[test]
fn test_slist_collects_servers_with_unique_names() {
    let wire = SimWire::new();
    let server_clock = ManualClock::new();
    let mut first = stack_on(&wire, SERVER_IP, server_config(), &server_clock);
    let mut second = stack_on(&wire, SECOND_SERVER_IP, server_config(), &server_clock);
    first.server_status_mut().level_name = "e1m1".to_string();
    first.server_status_mut().players.push(PlayerRecord {
        name: "ranger".to_string(),
        colors: 0,
        frags: 3,
        socket: None,
    });
    second.server_status_mut().level_name = "dm4".to_string();

    let clock = ManualClock::new();
    let mut client = stack_on(&wire, CLIENT_IP, client_config(), &clock);
    run_slist(&mut client, &clock, &mut [&mut first, &mut second]);

    let entries = client.host_cache().entries();
    assert_eq!(entries.len(), 2);
    let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    names.sort();
    assert_eq!(names, ["arena", "arena0"]);

    let e1m1 = entries.iter().find(|e| e.map == "e1m1").unwrap();
    assert_eq!(e1m1.users, 1);
    assert_eq!(e1m1.max_users, 8);
    assert_eq!(e1m1.addr, SocketAddr::new(SERVER_IP, 26000));
    assert_eq!(e1m1.cname, "10.0.0.2:26000");
}

#[test]
fn test_slist_marks_incompatible_servers() {
    let wire = SimWire::new();
    let old_server = wire.host(SECOND_SERVER_IP).bind_raw(26000).unwrap();

    let clock = ManualClock::new();
    let mut client = stack_on(&wire, CLIENT_IP, client_config(), &clock);
    client.slist();
    client.poll().unwrap();

    let mut buf = [0u8; 1100];
    let (len, from) = old_server.recv_from(&mut buf).unwrap();
    assert!(matches!(
        ControlMessage::decode(&buf[..len]),
        Some(ControlMessage::ServerInfo { .. })
    ));

    let reply = ControlMessage::ServerInfoReply(ServerInfoReply {
        address: String::new(),
        host_name: "oldbox-with-a-long-name".to_string(),
        level_name: "start".to_string(),
        current_players: 0,
        max_players: 4,
        protocol_version: 2,
    });
    let mut out = SizeBuf::alloc(1100);
    reply.encode(&mut out).unwrap();
    old_server.send_to(out.data(), from).unwrap();

    while client.slist_in_progress() {
        clock.advance(0.1);
        client.poll().unwrap();
    }

    let entries = client.host_cache().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "*oldbox-with-a-");
    assert_eq!(entries[0].name.len(), 15);
}

#[test]
fn test_connect_by_host_cache_name() {
    let wire = SimWire::new();
    let server_clock = ManualClock::new();
    let mut server = stack_on(&wire, SERVER_IP, server_config(), &server_clock);

    let clock = ManualClock::with_step(0.001);
    let mut client = stack_on(&wire, CLIENT_IP, client_config(), &clock);
    run_slist(&mut client, &clock, &mut [&mut server]);
    assert_eq!(client.host_cache().len(), 1);

    wire.clear_log();
    let serving = Serving::start(server);
    let id = client.connect(Some("ARENA")).expect("connect");
    let (_, accepted) = serving.stop();
    assert_eq!(accepted.len(), 1);
    assert_eq!(client.socket_peer_addr(id).unwrap().ip(), SERVER_IP);

    let broadcasts = wire
        .sent()
        .iter()
        .filter(|r| r.to.ip() == IpAddr::V4(std::net::Ipv4Addr::BROADCAST))
        .count();
    assert_eq!(broadcasts, 0);
}

#[test]
fn test_connect_picks_the_only_server() {
    let wire = SimWire::new();
    let server_clock = ManualClock::new();
    let server = stack_on(&wire, SERVER_IP, server_config(), &server_clock);

    let clock = ManualClock::with_step(0.001);
    let mut client = stack_on(&wire, CLIENT_IP, client_config(), &clock);
    let serving = Serving::start(server);
    let id = client.connect(None).expect("connect");
    serving.stop();

    assert_eq!(client.host_cache().len(), 1);
    assert_eq!(client.socket_peer_addr(id).unwrap().ip(), SERVER_IP);
}

fn probe_fixture() -> (SimWire, NetStack, NetStack, ManualClock) {
    let wire = SimWire::new();
    let server_clock = ManualClock::new();
    let mut server = stack_on(&wire, SERVER_IP, server_config(), &server_clock);
    let status = server.server_status_mut();
    for (name, frags) in [("ranger", 12), ("grunt", -1)] {
        status.players.push(PlayerRecord {
            name: name.to_string(),
            colors: 0x24,
            frags,
            socket: None,
        });
    }
    status.set_rule("deathmatch", "1");
    status.set_rule("fraglimit", "20");
    status.set_rule("timelimit", "15");

    let clock = ManualClock::new();
    let client = stack_on(&wire, CLIENT_IP, client_config(), &clock);
    (wire, server, client, clock)
}

#[test]
fn test_player_probe_collects_every_player() {
    let (_wire, mut server, mut client, clock) = probe_fixture();
    assert!(client.start_probe(ProbeKind::Players, "10.0.0.2").unwrap());
    assert!(client.probe_in_progress(ProbeKind::Players));

    let mut polls = 0;
    while client.probe_in_progress(ProbeKind::Players) {
        for _ in 0..20 {
            server.check_new_connections().unwrap();
        }
        clock.advance(0.1);
        client.poll().unwrap();
        polls += 1;
        assert!(polls < 40);
    }

    let report = client.probe(ProbeKind::Players).unwrap();
    assert!(report.finished);
    assert_eq!(report.error, None);
    let names: Vec<&str> = report.players.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["ranger", "grunt"]);
    assert_eq!(report.players[1].frags, -1);
    assert_eq!(report.players[0].colors, 0x24);
}

#[test]
fn test_rule_probe_walks_the_rule_list() {
    let (_wire, mut server, mut client, clock) = probe_fixture();
    assert!(client.start_probe(ProbeKind::Rules, "10.0.0.2").unwrap());

    let mut polls = 0;
    while client.probe_in_progress(ProbeKind::Rules) {
        server.check_new_connections().unwrap();
        clock.advance(0.05);
        client.poll().unwrap();
        polls += 1;
        assert!(polls < 40);
    }

    let report = client.probe(ProbeKind::Rules).unwrap();
    assert!(report.finished);
    assert_eq!(report.error, None);
    assert_eq!(report.rules, server.server_status().rules);
}

#[test]
fn test_rule_probe_rejects_unexpected_reply() {
    let wire = SimWire::new();
    let fake = wire.host(SERVER_IP).bind_raw(26000).unwrap();
    let clock = ManualClock::new();
    let mut client = stack_on(&wire, CLIENT_IP, client_config(), &clock);

    assert!(client.start_probe(ProbeKind::Rules, "10.0.0.2").unwrap());
    let mut buf = [0u8; 1100];
    let (_, from) = fake.recv_from(&mut buf).unwrap();
    let mut out = SizeBuf::alloc(64);
    ControlMessage::Accept { port: 1 }.encode(&mut out).unwrap();
    fake.send_to(out.data(), from).unwrap();

    clock.advance(0.05);
    client.poll().unwrap();

    assert!(!client.probe_in_progress(ProbeKind::Rules));
    let report = client.probe(ProbeKind::Rules).unwrap();
    assert!(report.finished);
    assert!(report.error.is_some());
}

#[test]
fn test_no_lan_disables_discovery() {
    let wire = SimWire::new();
    let clock = ManualClock::new();
    let config = NetConfig {
        no_lan: true,
        ..client_config()
    };
    let mut client = stack_on(&wire, CLIENT_IP, config, &clock);
    run_slist(&mut client, &clock, &mut []);
    assert!(wire.sent().is_empty());
    assert!(client.host_cache().is_empty());
}
