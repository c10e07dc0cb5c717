//! Demo arena land: players join at a random spawn point, walk toward
//! targets they pick, and chat.

use async_trait::async_trait;
use log::{error, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{EventTarget, LifecycleKind, RecordedResolverOutput, RecordingMetadata};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::LandError;
use crate::registry::{HandlerRegistry, LandState, RegistryError, TickContext, TypeIdentified};
use crate::resolver::{capture, Resolver, ResolverContext, ResolverError};

pub const LAND_TYPE: &str = "arena";
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
/// Distance an avatar covers per tick
pub const MOVE_SPEED: f32 = 4.0;
pub const MAX_CHAT_LENGTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    pub x: f32,
    pub y: f32,
    pub target_x: f32,
    pub target_y: f32,
    pub is_guest: bool,
}

impl Avatar {
    fn at(x: f32, y: f32, is_guest: bool) -> Self {
        Self {
            x,
            y,
            target_x: x,
            target_y: y,
            is_guest,
        }
    }

    fn advance(&mut self) {
        let dx = self.target_x - self.x;
        let dy = self.target_y - self.y;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance <= MOVE_SPEED {
            self.x = self.target_x;
            self.y = self.target_y;
        } else {
            self.x += dx / distance * MOVE_SPEED;
            self.y += dy / distance * MOVE_SPEED;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArenaState {
    pub tick: u64,
    pub players: BTreeMap<String, Avatar>,
    pub chat_count: u64,
}

impl ArenaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial state for a replay. The arena has no creation-time options,
    /// so every recording starts from the empty arena.
    pub fn from_metadata(_metadata: &RecordingMetadata) -> Self {
        Self::new()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }
}

impl LandState for ArenaState {
    fn state_hash(&self) -> String {
        crate::hash::state_hash(self).unwrap_or_else(|e| {
            error!("Failed to encode arena state for hashing: {}", e);
            String::new()
        })
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), LandError> {
        self.tick = ctx.tick_id();
        for avatar in self.players.values_mut() {
            avatar.advance();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveTo {
    pub x: f32,
    pub y: f32,
}

impl TypeIdentified for MoveTo {
    const TYPE_IDENTIFIER: &'static str = "MoveTo";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub text: String,
}

impl TypeIdentified for Chat {
    const TYPE_IDENTIFIER: &'static str = "Chat";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub player_id: String,
    pub text: String,
}

impl TypeIdentified for ChatMessage {
    const TYPE_IDENTIFIER: &'static str = "ChatMessage";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoined {
    pub player_id: String,
    pub x: f32,
    pub y: f32,
}

impl TypeIdentified for PlayerJoined {
    const TYPE_IDENTIFIER: &'static str = "PlayerJoined";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    pub player_id: String,
}

impl TypeIdentified for PlayerLeft {
    const TYPE_IDENTIFIER: &'static str = "PlayerLeft";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: f32,
    pub y: f32,
}

impl TypeIdentified for SpawnPoint {
    const TYPE_IDENTIFIER: &'static str = "SpawnPoint";
}

/// Picks a random spawn point; replay reuses the captured one
pub struct SpawnPointResolver;

#[async_trait]
impl Resolver for SpawnPointResolver {
    fn name(&self) -> &str {
        "spawn"
    }

    async fn resolve(
        &self,
        _ctx: &ResolverContext,
    ) -> Result<RecordedResolverOutput, ResolverError> {
        let spawn = {
            let mut rng = rand::thread_rng();
            SpawnPoint {
                x: rng.gen_range(0.0..WORLD_WIDTH).floor(),
                y: rng.gen_range(0.0..WORLD_HEIGHT).floor(),
            }
        };
        capture(&spawn)
    }
}

fn clamp_to_world(x: f32, y: f32) -> (f32, f32) {
    (x.clamp(0.0, WORLD_WIDTH), y.clamp(0.0, WORLD_HEIGHT))
}

/// Handlers for the arena land type
pub fn registry() -> Result<HandlerRegistry<ArenaState>, RegistryError> {
    let mut registry = HandlerRegistry::new(LAND_TYPE);

    registry.on_lifecycle(
        LifecycleKind::Join,
        vec![Arc::new(SpawnPointResolver)],
        |state: &mut ArenaState, ctx: &mut TickContext<'_>, event| {
            let player_id = ctx.player_id()?.to_string();
            let spawn: SpawnPoint = ctx.resolved("spawn")?;
            let is_guest = event.is_guest.unwrap_or(false);
            state
                .players
                .insert(player_id.clone(), Avatar::at(spawn.x, spawn.y, is_guest));
            info!(
                "Player {} joined at ({}, {}) on tick {}",
                player_id,
                spawn.x,
                spawn.y,
                ctx.tick_id()
            );
            ctx.emit(
                &PlayerJoined {
                    player_id,
                    x: spawn.x,
                    y: spawn.y,
                },
                EventTarget::All,
            )
        },
    )?;

    registry.on_lifecycle(
        LifecycleKind::Leave,
        Vec::new(),
        |state: &mut ArenaState, ctx: &mut TickContext<'_>, _event| {
            let player_id = ctx.player_id()?.to_string();
            if state.players.remove(&player_id).is_none() {
                return Err(LandError::Handler(format!(
                    "player {} is not in the arena",
                    player_id
                )));
            }
            info!("Player {} left on tick {}", player_id, ctx.tick_id());
            ctx.emit(&PlayerLeft { player_id }, EventTarget::All)
        },
    )?;

    registry.on_action::<MoveTo, _>(|state, ctx, move_to| {
        let player_id = ctx.player_id()?;
        let Some(avatar) = state.players.get_mut(player_id) else {
            return Err(LandError::Handler(format!(
                "player {} is not in the arena",
                player_id
            )));
        };
        let (x, y) = clamp_to_world(move_to.x, move_to.y);
        avatar.target_x = x;
        avatar.target_y = y;
        Ok(())
    })?;

    registry.on_client_event::<Chat, _>(|state, ctx, chat| {
        let text = chat.text.trim();
        if text.is_empty() || text.len() > MAX_CHAT_LENGTH {
            return Err(LandError::Handler(format!(
                "chat message must be 1 to {} bytes",
                MAX_CHAT_LENGTH
            )));
        }
        let player_id = ctx.player_id()?.to_string();
        state.chat_count += 1;
        ctx.emit(
            &ChatMessage {
                player_id,
                text: text.to_string(),
            },
            EventTarget::All,
        )
    })?;

    Ok(registry)
}
