use crate::prediction::{ClientPredictor, ReconcileOutcome};
use log::{debug, info};
use shared::{
    CollisionWorld, GameplayState, InputSample, MovementConfig, MovementSimulator, RemoteEntity,
    StateOverride, StatePayload, Tick, ENTITY_HEIGHT,
};
use std::collections::HashMap;

/// Everything the client knows about the world: its own predicted entity
/// and the last replicated position of everyone else.
pub struct ClientGameState {
    predictor: Option<ClientPredictor>,
    client_id: Option<u32>,
    world: CollisionWorld,
    remotes: HashMap<u32, RemoteEntity>,
    last_world_tick: Option<Tick>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::with_world(CollisionWorld::arena())
    }

    pub fn with_world(world: CollisionWorld) -> Self {
        Self {
            predictor: None,
            client_id: None,
            world,
            remotes: HashMap::new(),
            last_world_tick: None,
        }
    }

    /// Creates the local entity once the server has accepted us.
    pub fn spawn(&mut self, client_id: u32, simulator: MovementSimulator, spawn: StatePayload) {
        info!(
            "Spawning entity {} at ({:.1}, {:.1}, {:.1})",
            client_id, spawn.position.x, spawn.position.y, spawn.position.z
        );
        self.client_id = Some(client_id);
        self.predictor = Some(ClientPredictor::new(simulator, spawn));
    }

    pub fn despawn(&mut self) {
        if let Some(client_id) = self.client_id.take() {
            info!("Despawning entity {}", client_id);
        }
        self.predictor = None;
        self.remotes.clear();
        self.world.set_colliders(Vec::new());
        self.last_world_tick = None;
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn predictor(&self) -> Option<&ClientPredictor> {
        self.predictor.as_ref()
    }

    pub fn world(&self) -> &CollisionWorld {
        &self.world
    }

    pub fn remotes(&self) -> &HashMap<u32, RemoteEntity> {
        &self.remotes
    }

    /// Next tick the local entity will simulate, if spawned.
    pub fn next_tick(&self) -> Option<Tick> {
        self.predictor.as_ref().map(ClientPredictor::next_tick)
    }

    pub fn on_snapshot(&mut self, state: StatePayload, gameplay: GameplayState) -> bool {
        match self.predictor.as_mut() {
            Some(predictor) => predictor.on_server_state(state, gameplay),
            None => false,
        }
    }

    /// Applies an override. Returns the id to acknowledge, which is the
    /// override's own id even when it was already applied.
    pub fn on_override(&mut self, correction: &StateOverride) -> Option<u32> {
        let predictor = self.predictor.as_mut()?;
        if !predictor.apply_override(correction, &self.world) {
            debug!("Override {} already applied", correction.id);
        }
        Some(correction.id)
    }

    /// Rebuilds the dynamic colliders from a world broadcast. Broadcasts
    /// older than the last one applied are ignored.
    pub fn apply_world_state(&mut self, server_tick: Tick, entities: Vec<RemoteEntity>) -> bool {
        if self.last_world_tick.is_some_and(|tick| server_tick <= tick) {
            return false;
        }
        self.last_world_tick = Some(server_tick);

        self.remotes = entities
            .into_iter()
            .filter(|entity| Some(entity.id) != self.client_id)
            .map(|entity| (entity.id, entity))
            .collect();

        let remotes: Vec<RemoteEntity> = self.remotes.values().copied().collect();
        let radius = self
            .predictor
            .as_ref()
            .map_or(MovementConfig::default().capsule_radius, |predictor| {
                predictor.simulator().config().capsule_radius
            });
        self.world.set_remote_entities(&remotes, radius, ENTITY_HEIGHT);
        true
    }

    /// One local tick: reconcile against the newest authoritative state, then
    /// predict with the input `sample` produces for the tick that follows.
    ///
    /// Sampling happens after reconciliation because a hard resync moves the
    /// local timeline.
    pub fn tick<F>(&mut self, sample: F) -> Option<(ReconcileOutcome, InputSample, StatePayload)>
    where
        F: FnOnce(Tick) -> InputSample,
    {
        let predictor = self.predictor.as_mut()?;
        let outcome = predictor.reconcile(&self.world);
        let input = InputSample {
            tick: predictor.next_tick(),
            ..sample(predictor.next_tick())
        };
        let state = predictor.predict(input, &self.world);
        Some((outcome, input, state))
    }
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}
