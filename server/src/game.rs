//! Server-side world: every connected entity's authority plus the collision
//! world they move through.

use crate::authority::{EntityAuthority, DEFAULT_MAX_INPUT_STARVATION};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{
    CollisionWorld, DynamicCollider, GameplayState, InputSample, MovementConfig,
    MovementSimulator, Quat, RemoteEntity, StateOverride, StatePayload, Vec3, ENTITY_HEIGHT,
    KILL_PLANE_Y,
};
use std::collections::BTreeMap;

/// Where entities appear on connect and after falling out of the world.
const SPAWN_POINTS: [Vec3; 4] = [
    Vec3::new(-10.0, 0.0, -10.0),
    Vec3::new(10.0, 0.0, -10.0),
    Vec3::new(-10.0, 0.0, 10.0),
    Vec3::new(10.0, 0.0, 10.0),
];

#[derive(Debug)]
pub struct GameState {
    /// Server ticks run since startup
    pub tick: u32,
    simulator: MovementSimulator,
    world: CollisionWorld,
    /// Ordered by id so every tick visits entities in the same order
    entities: BTreeMap<u32, EntityAuthority>,
    spawn_points: Vec<Vec3>,
    max_input_starvation: u32,
    rng: StdRng,
}

impl GameState {
    pub fn new(movement: MovementConfig, dt: f32) -> Self {
        Self::with_world(movement, dt, CollisionWorld::arena(), StdRng::from_entropy())
    }

    pub fn with_world(movement: MovementConfig, dt: f32, world: CollisionWorld, rng: StdRng) -> Self {
        Self {
            tick: 0,
            simulator: MovementSimulator::new(movement, dt),
            world,
            entities: BTreeMap::new(),
            spawn_points: SPAWN_POINTS.to_vec(),
            max_input_starvation: DEFAULT_MAX_INPUT_STARVATION,
            rng,
        }
    }

    pub fn set_max_input_starvation(&mut self, ticks: u32) {
        self.max_input_starvation = ticks;
    }

    pub fn movement(&self) -> &MovementConfig {
        self.simulator.config()
    }

    pub fn world(&self) -> &CollisionWorld {
        &self.world
    }

    /// Creates the entity for `client_id` at a spawn point picked from its
    /// id, so reconnecting clients land in a predictable place.
    pub fn spawn(&mut self, client_id: u32) -> StatePayload {
        let index = client_id as usize % self.spawn_points.len().max(1);
        let position = self.spawn_points.get(index).copied().unwrap_or(Vec3::ZERO);
        let spawn = StatePayload::spawn(0, position, Quat::IDENTITY);

        let authority = EntityAuthority::spawn(client_id, spawn, self.max_input_starvation);
        self.entities.insert(client_id, authority);

        info!(
            "Spawned entity {} at ({:.1}, {:.1}, {:.1})",
            client_id, position.x, position.y, position.z
        );
        spawn
    }

    pub fn despawn(&mut self, client_id: u32) -> bool {
        let removed = self.entities.remove(&client_id).is_some();
        if removed {
            info!("Despawned entity {}", client_id);
        }
        removed
    }

    pub fn entity(&self, client_id: u32) -> Option<&EntityAuthority> {
        self.entities.get(&client_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Queues an input until the next tick. Returns false for unknown ids.
    pub fn queue_input(&mut self, client_id: u32, sample: InputSample) -> bool {
        match self.entities.get_mut(&client_id) {
            Some(authority) => {
                authority.enqueue(sample);
                true
            }
            None => false,
        }
    }

    pub fn set_gameplay(&mut self, client_id: u32, gameplay: GameplayState) -> bool {
        match self.entities.get_mut(&client_id) {
            Some(authority) => {
                authority.set_gameplay(gameplay);
                true
            }
            None => false,
        }
    }

    pub fn force(&mut self, client_id: u32, position: Vec3, rotation: Quat) -> Option<StateOverride> {
        self.entities
            .get_mut(&client_id)
            .map(|authority| authority.force(position, rotation))
    }

    pub fn acknowledge_override(&mut self, client_id: u32, override_id: u32) -> bool {
        self.entities
            .get_mut(&client_id)
            .is_some_and(|authority| authority.acknowledge(override_id))
    }

    /// Runs one server tick for every entity.
    ///
    /// Dynamic colliders are taken from where everyone stood before the tick
    /// and stay fixed while entities step. Returns the ids whose entity
    /// published a new snapshot.
    pub fn step(&mut self) -> Vec<u32> {
        let radius = self.simulator.config().capsule_radius;
        let colliders = self
            .entities
            .values()
            .map(|authority| DynamicCollider {
                id: authority.id(),
                position: authority.current().position,
                radius,
                height: ENTITY_HEIGHT,
            })
            .collect();
        self.world.set_colliders(colliders);

        let mut advanced = Vec::new();
        for (id, authority) in self.entities.iter_mut() {
            let view = self.world.view_for(*id);
            if authority.tick(&self.simulator, &view).is_some() {
                advanced.push(*id);
            }
        }

        self.respawn_fallen();
        self.tick += 1;
        advanced
    }

    fn respawn_fallen(&mut self) {
        for (id, authority) in self.entities.iter_mut() {
            if authority.current().position.y >= KILL_PLANE_Y {
                continue;
            }
            let position = self
                .spawn_points
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(Vec3::ZERO);
            info!("Entity {} fell out of the world, respawning", id);
            authority.force(position, Quat::IDENTITY);
        }
    }

    /// Latest published state and gameplay flags for every entity that has
    /// advanced at least once.
    pub fn snapshots(&self) -> Vec<(u32, StatePayload, GameplayState)> {
        self.entities
            .values()
            .filter_map(|authority| {
                authority
                    .published()
                    .map(|state| (authority.id(), *state, *authority.gameplay()))
            })
            .collect()
    }

    /// Overrides still waiting for an acknowledgement.
    pub fn pending_overrides(&self) -> Vec<(u32, StateOverride)> {
        self.entities
            .values()
            .filter_map(|authority| {
                authority
                    .pending_override()
                    .map(|correction| (authority.id(), *correction))
            })
            .collect()
    }

    pub fn remote_entities(&self) -> Vec<RemoteEntity> {
        self.entities
            .values()
            .map(|authority| {
                let state = authority.current();
                RemoteEntity {
                    id: authority.id(),
                    tick: state.tick,
                    position: state.position,
                    rotation: state.rotation,
                    velocity: state.velocity,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec2;

    const DT: f32 = 1.0 / 60.0;

    fn test_game() -> GameState {
        GameState::with_world(
            MovementConfig::default(),
            DT,
            CollisionWorld::flat(),
            StdRng::seed_from_u64(7),
        )
    }

    fn forward(tick: u32) -> InputSample {
        InputSample::new(tick, Vec2::new(1.0, 0.0), Quat::IDENTITY)
    }

    #[test]
    fn test_game_state_creation() {
        let game = test_game();
        assert_eq!(game.tick, 0);
        assert!(game.is_empty());
        assert!(game.snapshots().is_empty());
    }

    #[test]
    fn test_spawn_and_despawn() {
        let mut game = test_game();
        let spawn = game.spawn(1);
        assert_eq!(spawn.position, SPAWN_POINTS[1]);
        assert_eq!(game.len(), 1);

        assert!(game.despawn(1));
        assert!(!game.despawn(1));
        assert!(game.is_empty());
    }

    #[test]
    fn test_queue_input_unknown_entity() {
        let mut game = test_game();
        assert!(!game.queue_input(5, forward(0)));
    }

    #[test]
    fn test_step_publishes_snapshot() {
        let mut game = test_game();
        game.spawn(1);
        game.spawn(2);
        game.queue_input(1, forward(0));

        let advanced = game.step();
        assert_eq!(advanced, vec![1]);
        assert_eq!(game.tick, 1);

        let snapshots = game.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].0, 1);
        assert_eq!(snapshots[0].1.tick, 0);
        assert!(snapshots[0].1.position.x > SPAWN_POINTS[1].x);
    }

    #[test]
    fn test_entities_collide_with_each_other() {
        let mut game = test_game();
        game.spawn(1);
        game.spawn(3);
        // Entity 3 stands right in front of entity 1
        game.force(3, SPAWN_POINTS[1] + Vec3::new(0.85, 0.0, 0.0), Quat::IDENTITY);

        for tick in 0..10 {
            game.queue_input(1, forward(tick));
            game.step();
        }

        let blocked = game.entity(1).unwrap().current().position;
        assert_eq!(blocked.x, SPAWN_POINTS[1].x);
    }

    #[test]
    fn test_fallen_entity_is_respawned() {
        let mut world = CollisionWorld::flat();
        world.ground_height = None;
        let mut game = GameState::with_world(MovementConfig::default(), DT, world, StdRng::seed_from_u64(1));
        game.set_max_input_starvation(0);
        game.spawn(1);

        let mut respawned = None;
        for _ in 0..600 {
            game.step();
            if let Some((_, correction)) = game.pending_overrides().first() {
                respawned = Some(*correction);
                break;
            }
        }

        let correction = respawned.expect("entity should have hit the kill plane");
        assert!(SPAWN_POINTS.contains(&correction.position));
        assert_eq!(game.entity(1).unwrap().current().position, correction.position);
    }

    #[test]
    fn test_acknowledge_override() {
        let mut game = test_game();
        game.spawn(1);
        let correction = game.force(1, Vec3::new(1.0, 0.0, 1.0), Quat::IDENTITY).unwrap();

        assert_eq!(game.pending_overrides().len(), 1);
        assert!(!game.acknowledge_override(1, correction.id + 1));
        assert!(game.acknowledge_override(1, correction.id));
        assert!(game.pending_overrides().is_empty());
    }

    #[test]
    fn test_remote_entities_list_everyone() {
        let mut game = test_game();
        game.spawn(2);
        game.spawn(1);

        let remotes = game.remote_entities();
        let ids: Vec<u32> = remotes.iter().map(|entity| entity.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
