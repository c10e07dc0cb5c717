//! Type-identifier dispatch from pending items to typed handlers
//!
//! Handlers are registered per payload type; the registry decodes the
//! item's JSON payload into that type before invoking the handler. There
//! is no open reflection: an identifier without a registration is an error.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared::{ActorIdentity, EventTarget, LifecycleKind, ResolverOutputs};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::error::LandError;
use crate::pending::{ItemKind, LifecycleEvent, PendingItem};
use crate::resolver::{decode_output, Resolver};

/// Payload types carry the identifier they are dispatched and recorded by
pub trait TypeIdentified {
    const TYPE_IDENTIFIER: &'static str;
}

/// The mutable state a land's handlers operate on
pub trait LandState: Send + 'static {
    /// Hash of the current state; equal states must hash equally
    fn state_hash(&self) -> String;

    /// Business-logic update run once per tick after all items are applied
    fn on_tick(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), LandError> {
        Ok(())
    }
}

/// A server event emitted by a handler during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub type_identifier: String,
    pub payload: Value,
    pub target: EventTarget,
}

/// What a handler can see and do while its item executes
pub struct TickContext<'a> {
    tick_id: u64,
    actor: &'a ActorIdentity,
    resolver_outputs: &'a ResolverOutputs,
    emitted: &'a mut Vec<OutboundEvent>,
}

impl<'a> TickContext<'a> {
    pub fn new(
        tick_id: u64,
        actor: &'a ActorIdentity,
        resolver_outputs: &'a ResolverOutputs,
        emitted: &'a mut Vec<OutboundEvent>,
    ) -> Self {
        Self {
            tick_id,
            actor,
            resolver_outputs,
            emitted,
        }
    }

    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    pub fn actor(&self) -> &ActorIdentity {
        self.actor
    }

    /// The acting player's id, or a handler error if the item has none
    pub fn player_id(&self) -> Result<&str, LandError> {
        self.actor
            .player_id
            .as_deref()
            .ok_or_else(|| LandError::Handler("item has no player identity".to_string()))
    }

    /// Reads a captured resolver output, verifying its type identifier
    pub fn resolved<T>(&self, name: &str) -> Result<T, LandError>
    where
        T: TypeIdentified + DeserializeOwned,
    {
        let output = self
            .resolver_outputs
            .get(name)
            .ok_or_else(|| LandError::MissingResolverOutput(name.to_string()))?;
        decode_output(name, output)
    }

    pub fn emit<E>(&mut self, event: &E, target: EventTarget) -> Result<(), LandError>
    where
        E: TypeIdentified + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|source| LandError::Decode {
            type_identifier: E::TYPE_IDENTIFIER.to_string(),
            source,
        })?;
        self.emit_raw(E::TYPE_IDENTIFIER, payload, target);
        Ok(())
    }

    pub fn emit_raw(&mut self, type_identifier: &str, payload: Value, target: EventTarget) {
        self.emitted.push(OutboundEvent {
            type_identifier: type_identifier.to_string(),
            payload,
            target,
        });
    }
}

type InputHandler<S> =
    Box<dyn Fn(&mut S, &mut TickContext<'_>, &Value) -> Result<(), LandError> + Send + Sync>;
type LifecycleHandler<S> = Box<
    dyn Fn(&mut S, &mut TickContext<'_>, &LifecycleEvent) -> Result<(), LandError> + Send + Sync,
>;

struct Registration<H> {
    handler: H,
    resolvers: Vec<Arc<dyn Resolver>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a {kind} handler for '{type_identifier}' is already registered")]
    Duplicate {
        kind: &'static str,
        type_identifier: String,
    },
    #[error("resolver output name '{0}' is declared twice for one handler")]
    DuplicateResolver(String),
}

/// Handlers and declared resolvers for one land type
pub struct HandlerRegistry<S> {
    land_type: String,
    actions: HashMap<String, Registration<InputHandler<S>>>,
    client_events: HashMap<String, InputHandler<S>>,
    lifecycle: HashMap<LifecycleKind, Registration<LifecycleHandler<S>>>,
}

fn decode_payload<T: DeserializeOwned>(
    type_identifier: &str,
    payload: &Value,
) -> Result<T, LandError> {
    T::deserialize(payload).map_err(|source| LandError::Decode {
        type_identifier: type_identifier.to_string(),
        source,
    })
}

fn check_resolver_names(resolvers: &[Arc<dyn Resolver>]) -> Result<(), RegistryError> {
    for (i, resolver) in resolvers.iter().enumerate() {
        if resolvers[..i].iter().any(|r| r.name() == resolver.name()) {
            return Err(RegistryError::DuplicateResolver(resolver.name().to_string()));
        }
    }
    Ok(())
}

impl<S: LandState> HandlerRegistry<S> {
    pub fn new(land_type: impl Into<String>) -> Self {
        Self {
            land_type: land_type.into(),
            actions: HashMap::new(),
            client_events: HashMap::new(),
            lifecycle: HashMap::new(),
        }
    }

    pub fn land_type(&self) -> &str {
        &self.land_type
    }

    pub fn on_action<A, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        A: TypeIdentified + DeserializeOwned + 'static,
        F: Fn(&mut S, &mut TickContext<'_>, A) -> Result<(), LandError> + Send + Sync + 'static,
    {
        self.on_action_with_resolvers::<A, F>(Vec::new(), handler)
    }

    pub fn on_action_with_resolvers<A, F>(
        &mut self,
        resolvers: Vec<Arc<dyn Resolver>>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        A: TypeIdentified + DeserializeOwned + 'static,
        F: Fn(&mut S, &mut TickContext<'_>, A) -> Result<(), LandError> + Send + Sync + 'static,
    {
        if self.actions.contains_key(A::TYPE_IDENTIFIER) {
            return Err(RegistryError::Duplicate {
                kind: "action",
                type_identifier: A::TYPE_IDENTIFIER.to_string(),
            });
        }
        check_resolver_names(&resolvers)?;

        let handler: InputHandler<S> = Box::new(
            move |state: &mut S, ctx: &mut TickContext<'_>, payload: &Value| {
                let action = decode_payload::<A>(A::TYPE_IDENTIFIER, payload)?;
                handler(state, ctx, action)
            },
        );
        self.actions.insert(
            A::TYPE_IDENTIFIER.to_string(),
            Registration { handler, resolvers },
        );
        Ok(())
    }

    /// Client events never declare resolvers
    pub fn on_client_event<E, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        E: TypeIdentified + DeserializeOwned + 'static,
        F: Fn(&mut S, &mut TickContext<'_>, E) -> Result<(), LandError> + Send + Sync + 'static,
    {
        if self.client_events.contains_key(E::TYPE_IDENTIFIER) {
            return Err(RegistryError::Duplicate {
                kind: "client event",
                type_identifier: E::TYPE_IDENTIFIER.to_string(),
            });
        }
        let handler: InputHandler<S> = Box::new(
            move |state: &mut S, ctx: &mut TickContext<'_>, payload: &Value| {
                let event = decode_payload::<E>(E::TYPE_IDENTIFIER, payload)?;
                handler(state, ctx, event)
            },
        );
        self.client_events
            .insert(E::TYPE_IDENTIFIER.to_string(), handler);
        Ok(())
    }

    pub fn on_lifecycle<F>(
        &mut self,
        kind: LifecycleKind,
        resolvers: Vec<Arc<dyn Resolver>>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&mut S, &mut TickContext<'_>, &LifecycleEvent) -> Result<(), LandError>
            + Send
            + Sync
            + 'static,
    {
        if self.lifecycle.contains_key(&kind) {
            return Err(RegistryError::Duplicate {
                kind: "lifecycle",
                type_identifier: kind.as_str().to_string(),
            });
        }
        check_resolver_names(&resolvers)?;
        self.lifecycle.insert(
            kind,
            Registration {
                handler: Box::new(handler),
                resolvers,
            },
        );
        Ok(())
    }

    /// Resolvers declared for an item, or an error if nothing handles it
    pub fn resolvers_for(
        &self,
        kind: ItemKind,
        type_identifier: &str,
    ) -> Result<&[Arc<dyn Resolver>], LandError> {
        match kind {
            ItemKind::Action => self
                .actions
                .get(type_identifier)
                .map(|r| r.resolvers.as_slice())
                .ok_or_else(|| LandError::UnknownType(type_identifier.to_string())),
            ItemKind::ClientEvent => self
                .client_events
                .get(type_identifier)
                .map(|_| &[][..])
                .ok_or_else(|| LandError::UnknownType(type_identifier.to_string())),
            ItemKind::Lifecycle(kind) => Ok(self
                .lifecycle
                .get(&kind)
                .map(|r| r.resolvers.as_slice())
                .unwrap_or(&[])),
        }
    }

    /// Applies one item to the state
    pub fn dispatch(
        &self,
        state: &mut S,
        ctx: &mut TickContext<'_>,
        item: &PendingItem,
    ) -> Result<(), LandError> {
        match item.kind {
            ItemKind::Action => {
                let registration = self
                    .actions
                    .get(&item.type_identifier)
                    .ok_or_else(|| LandError::UnknownType(item.type_identifier.clone()))?;
                (registration.handler)(state, ctx, &item.payload)
            }
            ItemKind::ClientEvent => {
                let handler = self
                    .client_events
                    .get(&item.type_identifier)
                    .ok_or_else(|| LandError::UnknownType(item.type_identifier.clone()))?;
                handler(state, ctx, &item.payload)
            }
            ItemKind::Lifecycle(kind) => match self.lifecycle.get(&kind) {
                Some(registration) => {
                    let default_event = LifecycleEvent::default();
                    let event = item.lifecycle.as_ref().unwrap_or(&default_event);
                    (registration.handler)(state, ctx, event)
                }
                // Lands are free to ignore lifecycle kinds they do not observe.
                None => Ok(()),
            },
        }
    }
}
