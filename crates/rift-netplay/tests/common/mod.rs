#![allow(dead_code)]

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use rand::Rng;
use rift_netplay::config::LanConfig;
use rift_netplay::transport::{LanTransport, Transport, TransportEvent};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A block of consecutive ports in the dynamic range, picked at random so
/// parallel tests rarely collide.
pub fn port_block(len: u16) -> Vec<u16> {
    let base: u16 = rand::rng().random_range(20_000..60_000);
    (base..base + len).collect()
}

pub fn lan_config(ports: &[u16]) -> LanConfig {
    LanConfig {
        join_timeout_ms: 2_000,
        join_retry_ms: 200,
        discovery_window_ms: 1_500,
        ..LanConfig::loopback(ports.to_vec())
    }
}

/// A transport plus every event it has produced so far.
pub struct Node {
    pub transport: Box<dyn Transport>,
    pub addr: Option<SocketAddr>,
    events: Receiver<TransportEvent>,
    pub seen: Vec<TransportEvent>,
}

impl Node {
    pub fn new(mut transport: Box<dyn Transport>) -> Self {
        transport.initialize().expect("initialize transport");
        let events = transport.events();
        Self {
            transport,
            addr: None,
            events,
            seen: Vec::new(),
        }
    }

    pub fn lan(name: &str, config: LanConfig) -> Self {
        let mut transport = LanTransport::new(config, name);
        transport.initialize().expect("bind LAN transport");
        let addr = transport.local_addr();
        let mut node = Self::new(Box::new(transport));
        node.addr = addr;
        node
    }

    pub fn pump(&mut self) {
        self.transport.tick(Instant::now());
        self.seen.extend(self.events.try_iter());
    }

    pub fn find<T>(&self, f: impl Fn(&TransportEvent) -> Option<T>) -> Option<T> {
        self.seen.iter().rev().find_map(f)
    }

    pub fn has(&self, f: impl Fn(&TransportEvent) -> bool) -> bool {
        self.seen.iter().any(f)
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Pump every node until `done` holds or `timeout` passes.
pub fn run_until(
    nodes: &mut [&mut Node],
    timeout: Duration,
    mut done: impl FnMut(&[&mut Node]) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        for node in nodes.iter_mut() {
            node.pump();
        }
        if done(nodes) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Pump for a fixed duration.
pub fn settle(nodes: &mut [&mut Node], duration: Duration) {
    run_until(nodes, duration, |_| false);
}
