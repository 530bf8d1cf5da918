use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use rift_netplay::{
    EntityId, EntityState, LobbyDescriptor, Reliability, ReplicatedWorld, SessionConfig,
    SessionEvent, SessionManager, TransportBuilder, TransportKind,
};
use rift_netproto::constants::{DEFAULT_LAN_PORTS, DEFAULT_MAX_PLAYERS};
use rift_netproto::{EnvelopeKind, Target};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const FRAME: Duration = Duration::from_millis(16);
const STATUS_EVERY: Duration = Duration::from_secs(5);

/// Rift LAN session tool
#[derive(Parser, Debug)]
#[command(name = "rift-lan")]
#[command(about = "Host, browse or join Rift lobbies on the local network", long_about = None)]
struct Args {
    /// Display name announced to other players
    #[arg(short, long, default_value = "Player")]
    name: String,

    /// Candidate UDP ports, tried in order when binding
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_LAN_PORTS.to_vec())]
    ports: Vec<u16>,

    /// Host replication tick rate
    #[arg(long, default_value_t = 20)]
    tick_rate: u32,

    /// Stop after this many seconds (runs until killed when omitted)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a lobby and replicate a few demo entities
    Host {
        #[arg(long, default_value = "Rift lobby")]
        lobby: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_PLAYERS)]
        max_players: u8,
        /// Number of orbiting demo entities
        #[arg(long, default_value_t = 3)]
        entities: u32,
    },
    /// List lobbies answering discovery, then exit
    Browse,
    /// Join a lobby by host address, or the first discovered one
    Join {
        addr: Option<SocketAddr>,
        #[arg(long)]
        password: Option<String>,
    },
}

/// Entities orbiting the origin; state is `x, y` as little-endian `f32`.
struct DemoWorld {
    started: Instant,
    authoritative: u32,
    proxies: BTreeMap<EntityId, (f32, f32)>,
}

impl DemoWorld {
    fn new(authoritative: u32) -> Self {
        Self {
            started: Instant::now(),
            authoritative,
            proxies: BTreeMap::new(),
        }
    }

    fn decode(state: &[u8]) -> Option<(f32, f32)> {
        let x = f32::from_le_bytes(state.get(0..4)?.try_into().ok()?);
        let y = f32::from_le_bytes(state.get(4..8)?.try_into().ok()?);
        Some((x, y))
    }
}

impl ReplicatedWorld for DemoWorld {
    fn collect_entities(&mut self) -> Vec<EntityState> {
        let t = self.started.elapsed().as_secs_f32();
        (0..self.authoritative)
            .map(|id| {
                let radius = 10.0 * (id + 1) as f32;
                let angle = t * (1.0 + id as f32 * 0.25);
                let mut state = (radius * angle.cos()).to_le_bytes().to_vec();
                state.extend_from_slice(&(radius * angle.sin()).to_le_bytes());
                EntityState::new(id, state)
            })
            .collect()
    }

    fn spawn_proxy(&mut self, id: EntityId, state: &[u8]) {
        match Self::decode(state) {
            Some(pos) => {
                info!(entity = id, x = pos.0, y = pos.1, "proxy spawned");
                self.proxies.insert(id, pos);
            }
            None => warn!(entity = id, len = state.len(), "malformed entity state"),
        }
    }

    fn update_proxy(&mut self, id: EntityId, state: &[u8]) {
        if let Some(pos) = Self::decode(state) {
            self.proxies.insert(id, pos);
        }
    }

    fn despawn_proxy(&mut self, id: EntityId) {
        self.proxies.remove(&id);
        info!(entity = id, "proxy despawned");
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = SessionConfig {
        player_name: args.name.clone(),
        transport: TransportKind::Lan,
        tick_rate_hz: args.tick_rate,
        ..SessionConfig::default()
    };
    config.lan.candidate_ports = args.ports.clone();

    let mut session = SessionManager::new(TransportBuilder::new(config))?;
    let events = session.subscribe();
    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    match args.command {
        Command::Host {
            lobby,
            password,
            max_players,
            entities,
        } => {
            session.create_lobby(&lobby, password.as_deref(), max_players);
            run(&mut session, &events, DemoWorld::new(entities), deadline)
        }
        Command::Browse => browse(&mut session, &events),
        Command::Join { addr, password } => {
            let lobby = match addr {
                Some(addr) => LobbyDescriptor::direct(addr),
                None => match discover(&mut session, &events)?.into_iter().next() {
                    Some(lobby) => lobby,
                    None => anyhow::bail!("no lobbies found on the local network"),
                },
            };
            info!(lobby = %lobby.id, "joining");
            session.join_lobby(&lobby, password.as_deref());
            run(&mut session, &events, DemoWorld::new(0), deadline)
        }
    }
}

fn discover(
    session: &mut SessionManager,
    events: &Receiver<SessionEvent>,
) -> anyhow::Result<Vec<LobbyDescriptor>> {
    let mut world = DemoWorld::new(0);
    session.request_lobby_list();
    loop {
        session.update(Instant::now(), &mut world);
        for event in events.try_iter() {
            if let SessionEvent::LobbyListUpdated(lobbies) = event {
                return Ok(lobbies);
            }
        }
        thread::sleep(FRAME);
    }
}

fn browse(session: &mut SessionManager, events: &Receiver<SessionEvent>) -> anyhow::Result<()> {
    let lobbies = discover(session, events)?;
    if lobbies.is_empty() {
        info!("no lobbies found");
    }
    for lobby in lobbies {
        info!(
            id = %lobby.id,
            name = %lobby.name,
            owner = %lobby.owner_name,
            players = %format!("{}/{}", lobby.current_players, lobby.max_players),
            locked = lobby.has_password,
            "lobby"
        );
    }
    session.shutdown();
    Ok(())
}

fn run(
    session: &mut SessionManager,
    events: &Receiver<SessionEvent>,
    mut world: DemoWorld,
    deadline: Option<Instant>,
) -> anyhow::Result<()> {
    let mut next_status = Instant::now() + STATUS_EVERY;

    loop {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            break;
        }

        session.update(now, &mut world);
        for event in events.try_iter() {
            if !log_event(&event) {
                session.shutdown();
                return Ok(());
            }
        }

        if now >= next_status {
            next_status = now + STATUS_EVERY;
            let players = session.roster().len();
            if session.is_host() {
                info!(players, entities = world.authoritative, "hosting");
            } else if session.in_lobby() {
                info!(players, proxies = world.proxies.len(), "connected");
                let name = session.local_peer().map(|peer| peer.name).unwrap_or_default();
                let ping = format!("ping from {name}");
                if let Err(e) = session.send(
                    Target::Host,
                    EnvelopeKind::GameCommand,
                    ping.into_bytes(),
                    Reliability::Reliable,
                ) {
                    warn!(error = %e, "failed to send command");
                }
            }
        }

        thread::sleep(FRAME);
    }

    session.shutdown();
    Ok(())
}

/// Log a session event; returns `false` once the session is over.
fn log_event(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::LobbyCreated(lobby) => {
            info!(lobby = %lobby.name, id = %lobby.id, "lobby created");
        }
        SessionEvent::LobbyJoined(lobby) => {
            info!(lobby = %lobby.name, host = %lobby.owner_name, "joined lobby");
        }
        SessionEvent::PlayerJoined(peer) => info!(player = %peer.name, id = %peer.id, "player joined"),
        SessionEvent::PlayerLeft(peer) => info!(player = %peer.name, "player left"),
        SessionEvent::PlayerInfoUpdated(peer) => info!(player = %peer.name, "player renamed"),
        SessionEvent::Envelope { from, envelope } => {
            info!(
                from = %from,
                kind = ?envelope.kind,
                text = %String::from_utf8_lossy(&envelope.payload),
                "game message"
            );
        }
        SessionEvent::LobbyListUpdated(lobbies) => debug!(count = lobbies.len(), "lobby list"),
        SessionEvent::AvatarReady(_) => {}
        SessionEvent::LobbyCreateFailed { reason } | SessionEvent::LobbyJoinFailed { reason } => {
            warn!(%reason, "lobby request failed");
            return false;
        }
        SessionEvent::LobbyLeft { reason } | SessionEvent::Disconnected { reason } => {
            info!(%reason, "session ended");
            return false;
        }
    }
    true
}
