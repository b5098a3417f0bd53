//! Session coordinator.
//!
//! A [`Session`] owns the role, the local identity, the transport link and
//! the world. The game loop drives it through [`Session::tick`]; transport
//! tasks drive it through its [`LinkHandler`] implementation. The state lock
//! and the world lock are never held together, and neither is held while
//! calling into the transport.

use crate::combat::CombatResolver;
use crate::config::SessionConfig;
use crate::error::ConnectionError;
use crate::lock;
use crate::map::Passability;
use crate::persistence::SaveState;
use crate::player::MovementIntent;
use crate::transport::{ConnectionHandler, ConnectionListener, LinkHandler, RemoteEndpoint};
use crate::world::World;
use log::{debug, error, info, warn};
use shared::protocol::{ClientUpdate, Message, ServerUpdate};
use shared::{NetworkId, Role, CLIENT_PLAYER_ID, HOST_PLAYER_ID};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PeerJoined(NetworkId),
    PeerLeft(NetworkId),
    /// The Client received its player id from the Host.
    IdentityAssigned(NetworkId),
    /// The link to the Host was lost.
    Disconnected,
    GameOver,
}

enum Link {
    Listener(ConnectionListener),
    Remote(RemoteEndpoint),
}

impl Link {
    fn is_connected(&self) -> bool {
        match self {
            Link::Listener(listener) => listener.is_connected(),
            Link::Remote(endpoint) => endpoint.is_connected(),
        }
    }

    fn stop(&self) {
        match self {
            Link::Listener(listener) => listener.stop(),
            Link::Remote(endpoint) => endpoint.stop(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    role: Role,
    local_id: Option<NetworkId>,
    /// Client waiting for `AssignIdentity`.
    pending: bool,
    link: Option<Arc<Link>>,
    /// Host: connection that owns the Client player slot.
    /// Client: the connection to the Host once known.
    peer_connection: Option<u32>,
    last_send: Option<Instant>,
}

impl SessionState {
    /// Back to idle. The link is handed back so it can be stopped unlocked.
    fn reset(&mut self) -> Option<Arc<Link>> {
        self.role = Role::None;
        self.local_id = None;
        self.pending = false;
        self.peer_connection = None;
        self.last_send = None;
        self.link.take()
    }
}

struct SessionShared {
    config: SessionConfig,
    combat: CombatResolver,
    world: Mutex<World>,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        debug!("Session event: {:?}", event);
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }

    fn apply_assign_identity(&self, id: NetworkId) {
        {
            let mut state = lock(&self.state);
            if state.role != Role::Client || !state.pending {
                warn!("Unexpected AssignIdentity {} in role {:?}", id, state.role);
                return;
            }
            state.local_id = Some(id);
            state.pending = false;
        }

        {
            let mut world = lock(&self.world);
            world.spawn_local_player(id);
            world.ensure_remote_player(HOST_PLAYER_ID);
        }
        info!("Assigned player id {}", id);
        self.emit(SessionEvent::IdentityAssigned(id));
        self.emit(SessionEvent::PeerJoined(HOST_PLAYER_ID));
    }

    fn apply_client_update(&self, connection_id: u32, update: &ClientUpdate) {
        {
            let state = lock(&self.state);
            if state.role != Role::Host || state.peer_connection != Some(connection_id) {
                debug!("Ignoring ClientUpdate from connection {}", connection_id);
                return;
            }
        }
        if update.player_id != CLIENT_PLAYER_ID {
            warn!(
                "Connection {} reported player {}, expected {}",
                connection_id, update.player_id, CLIENT_PLAYER_ID
            );
            return;
        }

        let mut world = lock(&self.world);
        if !world.is_game_over() {
            world.apply_client_update(update);
        }
    }

    fn apply_server_update(&self, update: &ServerUpdate) {
        {
            let state = lock(&self.state);
            if state.role != Role::Client || state.pending {
                debug!("Ignoring ServerUpdate in role {:?}", state.role);
                return;
            }
        }

        let newly_over = {
            let mut world = lock(&self.world);
            if world.is_game_over() {
                return;
            }
            world.apply_server_update(update);
            let local_dead = world.local_player().map_or(false, |p| !p.is_alive());
            if local_dead {
                world.set_game_over();
            }
            local_dead
        };
        if newly_over {
            self.emit(SessionEvent::GameOver);
        }
    }
}

impl LinkHandler for SessionShared {
    fn on_accepted(&self, connection: &Arc<ConnectionHandler>) {
        let admitted = {
            let mut state = lock(&self.state);
            if state.role == Role::Host && state.peer_connection.is_none() {
                state.peer_connection = Some(connection.id());
                true
            } else {
                false
            }
        };
        if !admitted {
            warn!("Client slot taken, closing connection {}", connection.id());
            connection.close();
            return;
        }

        lock(&self.world).ensure_remote_player(CLIENT_PLAYER_ID);
        connection.send(&Message::AssignIdentity {
            id: CLIENT_PLAYER_ID,
        });
        info!(
            "Connection {} joined as player {}",
            connection.id(),
            CLIENT_PLAYER_ID
        );
        self.emit(SessionEvent::PeerJoined(CLIENT_PLAYER_ID));
    }

    fn on_message(&self, connection_id: u32, message: Message) {
        match message {
            Message::AssignIdentity { id } => self.apply_assign_identity(id),
            Message::ClientUpdate(update) => self.apply_client_update(connection_id, &update),
            Message::ServerUpdate(update) => self.apply_server_update(&update),
        }
    }

    fn on_disconnected(&self, connection_id: u32) {
        let mut state = lock(&self.state);
        let role = state.role;
        match role {
            Role::Host if state.peer_connection == Some(connection_id) => {
                state.peer_connection = None;
                drop(state);

                lock(&self.world).remove_player(CLIENT_PLAYER_ID);
                info!("Player {} left", CLIENT_PLAYER_ID);
                self.emit(SessionEvent::PeerLeft(CLIENT_PLAYER_ID));
            }
            Role::Client
                if state.peer_connection.is_none()
                    || state.peer_connection == Some(connection_id) =>
            {
                let link = state.reset();
                drop(state);

                lock(&self.world).set_game_over();
                if let Some(link) = link {
                    link.stop();
                }
                warn!("Lost connection to the Host");
                self.emit(SessionEvent::Disconnected);
            }
            _ => debug!("Ignoring disconnect of connection {}", connection_id),
        }
    }
}

/// Handle to one peer's session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        map: Arc<dyn Passability>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = SessionShared {
            combat: CombatResolver::new(&config),
            world: Mutex::new(World::new(&config, map)),
            state: Mutex::new(SessionState::default()),
            events,
            config,
        };

        (
            Self {
                shared: Arc::new(shared),
            },
            events_rx,
        )
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Authoritative play with no transport. The local player is id 0.
    pub fn setup_single_player(&self) {
        self.teardown_link();
        self.begin(Role::None, Some(HOST_PLAYER_ID));
        info!("Single-player session started");
    }

    /// Listens on `port` (0 picks a free one) and returns the bound address.
    pub async fn start_host(&self, port: u16) -> Result<SocketAddr, ConnectionError> {
        self.teardown_link();
        self.begin(Role::Host, Some(HOST_PLAYER_ID));

        let handler: Arc<dyn LinkHandler> = self.shared.clone();
        let listener =
            match ConnectionListener::bind(port, self.shared.config.max_clients, handler).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Could not start hosting: {}", e);
                    self.abort_setup();
                    return Err(e);
                }
            };

        let addr = listener.local_addr();
        let mut state = lock(&self.shared.state);
        if state.role != Role::Host {
            drop(state);
            listener.stop();
            return Ok(addr);
        }
        state.link = Some(Arc::new(Link::Listener(listener)));
        info!("Hosting on {}", addr);
        Ok(addr)
    }

    /// Connects to a Host. The local player appears once the Host assigns
    /// an id; until then the session is pending.
    pub async fn start_client(&self, host: &str, port: u16) -> Result<(), ConnectionError> {
        self.teardown_link();
        self.begin(Role::Client, None);

        let handler: Arc<dyn LinkHandler> = self.shared.clone();
        let endpoint = match RemoteEndpoint::connect(host, port, handler).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("Could not join: {}", e);
                self.abort_setup();
                return Err(e);
            }
        };

        let mut state = lock(&self.shared.state);
        if state.role != Role::Client || !endpoint.is_connected() {
            // Stopped or dropped by the Host while connecting.
            drop(state);
            endpoint.stop();
            return Ok(());
        }
        state.peer_connection = Some(endpoint.connection_id());
        state.link = Some(Arc::new(Link::Remote(endpoint)));
        Ok(())
    }

    /// Closes the transport and clears the world. Safe to call repeatedly.
    pub fn stop(&self) {
        self.teardown_link();
        let mut world = lock(&self.shared.world);
        world.clear();
        world.set_role(Role::None);
    }

    fn begin(&self, role: Role, local_id: Option<NetworkId>) {
        {
            let mut state = lock(&self.shared.state);
            state.role = role;
            state.local_id = local_id;
            state.pending = role == Role::Client;
        }

        let mut world = lock(&self.shared.world);
        world.clear();
        world.set_role(role);
        if let Some(id) = local_id {
            world.spawn_local_player(id);
        }
    }

    fn abort_setup(&self) {
        self.teardown_link();
        let mut world = lock(&self.shared.world);
        world.clear();
        world.set_role(Role::None);
    }

    fn teardown_link(&self) {
        let link = lock(&self.shared.state).reset();
        if let Some(link) = link {
            link.stop();
        }
    }

    /// One frame: world update, combat when authoritative, then the
    /// throttled outbound update.
    pub fn tick(&self, dt: f32) {
        let local_id = lock(&self.shared.state).local_id;
        if local_id.is_none() {
            return;
        }

        let newly_over = {
            let mut world = lock(&self.shared.world);
            if world.is_game_over() {
                false
            } else {
                let fallen = world.update(dt);
                if world.is_authoritative() {
                    if !fallen.is_empty() {
                        world.set_game_over();
                    }
                    self.shared.combat.resolve(&mut world);
                }
                world.is_game_over()
            }
        };
        if newly_over {
            self.shared.emit(SessionEvent::GameOver);
        }

        self.maybe_broadcast();
    }

    /// Sends the role's outbound update if the interval has elapsed since
    /// the last one. Returns whether anything was sent.
    pub fn maybe_broadcast(&self) -> bool {
        let now = Instant::now();
        let (role, link) = {
            let mut state = lock(&self.shared.state);
            let Some(link) = state.link.clone() else {
                return false;
            };
            if state.role == Role::None || !link.is_connected() {
                return false;
            }
            if let Some(last) = state.last_send {
                if now.duration_since(last) < self.shared.config.broadcast_interval {
                    return false;
                }
            }
            state.last_send = Some(now);
            (state.role, link)
        };

        let message = {
            let world = lock(&self.shared.world);
            match role {
                Role::Host => world.build_server_update().map(Message::ServerUpdate),
                Role::Client => world
                    .local_player()
                    .filter(|p| p.is_alive())
                    .and_then(|_| world.build_client_update())
                    .map(Message::ClientUpdate),
                Role::None => None,
            }
        };
        let Some(message) = message else {
            return false;
        };

        match link.as_ref() {
            Link::Listener(listener) => listener.broadcast(&message),
            Link::Remote(endpoint) => endpoint.send(&message),
        }
        true
    }

    /// Replaces the local player's held movement keys.
    pub fn set_movement(&self, intent: MovementIntent) {
        if let Some(player) = lock(&self.shared.world).local_player_mut() {
            player.intent = intent;
        }
    }

    pub fn clear_movement(&self) {
        self.set_movement(MovementIntent::default());
    }

    pub fn request_attack(&self) {
        if let Some(player) = lock(&self.shared.world).local_player_mut() {
            player.request_attack();
        }
    }

    /// Fires from the local player. Only the authoritative side shoots.
    pub fn fire_projectile(&self, target_x: f32, target_y: f32) -> bool {
        lock(&self.shared.world).fire_projectile(target_x, target_y)
    }

    pub fn role(&self) -> Role {
        lock(&self.shared.state).role
    }

    pub fn local_id(&self) -> Option<NetworkId> {
        lock(&self.shared.state).local_id
    }

    pub fn is_authoritative(&self) -> bool {
        self.role().is_authoritative()
    }

    pub fn is_connection_pending(&self) -> bool {
        lock(&self.shared.state).pending
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state)
            .link
            .as_ref()
            .map_or(false, |link| link.is_connected())
    }

    pub fn score(&self) -> u32 {
        lock(&self.shared.world).score()
    }

    pub fn is_game_over(&self) -> bool {
        lock(&self.shared.world).is_game_over()
    }

    /// Locks the world for inspection or direct manipulation. Keep the guard short-lived.
    pub fn world(&self) -> MutexGuard<'_, World> {
        lock(&self.shared.world)
    }

    /// Pure snapshot of the session for an external save facility.
    pub fn capture_state(&self) -> SaveState {
        let (role, local_id) = {
            let state = lock(&self.shared.state);
            (state.role, state.local_id)
        };
        lock(&self.shared.world).capture(role, local_id)
    }

    /// Tears down networking and rebuilds the world from `save`. Play resumes
    /// authoritatively without a peer.
    pub fn restore_state(&self, save: &SaveState) {
        self.teardown_link();
        {
            let mut state = lock(&self.shared.state);
            state.role = Role::None;
            state.local_id = save.local_id;
        }
        lock(&self.shared.world).restore(save);
        info!(
            "Restored saved game (score {}, {} players, {} enemies)",
            save.score,
            save.players.len(),
            save.enemies.len()
        );
    }
}
