use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use super::command::{Command, CommandName, RemoteCommand};
use super::handler::{CommandHandler, Publisher};
use crate::event_sourcing::core::{CodecError, Data, Entity, EventStoreError};
use crate::event_sourcing::render::LoadError;
use crate::event_sourcing::store::EventStore;

// ============================================================================
// Dispatcher - Command Name to Handler
// ============================================================================
//
// Handlers are registered per command type and stored type-erased by name.
// A typed command is handed over as-is; a remote command is decoded into the
// handler's command type first. Dispatch reports whether the handler
// committed anything so the caller knows whether a reload is needed.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("command not found: {0}")]
    CommandNotFound(CommandName),

    #[error("unexpected command {command}: {source}")]
    UnexpectedCommand {
        command: CommandName,
        #[source]
        source: CodecError,
    },

    #[error("command {0} does not match the type its handler expects")]
    MismatchedCommand(CommandName),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("command {command} failed: {source}")]
    Handler {
        command: CommandName,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    /// True if a publish somewhere under this command lost a race
    pub fn is_revision_conflict(&self) -> bool {
        match self {
            DispatchError::Store(err) | DispatchError::Load(LoadError::Store(err)) => err.is_revision_conflict(),
            DispatchError::Handler { source, .. } => source.chain().any(|cause| {
                cause
                    .downcast_ref::<EventStoreError>()
                    .is_some_and(EventStoreError::is_revision_conflict)
            }),
            _ => false,
        }
    }
}

enum CommandInput {
    Typed(Box<dyn Any + Send>),
    Remote(Data),
}

#[async_trait]
trait ErasedHandler<T>: Send + Sync {
    async fn call(
        &self,
        name: &CommandName,
        entity: &Entity<T>,
        input: CommandInput,
        publisher: &Publisher,
    ) -> Result<(), DispatchError>;
}

struct Registered<H>(H);

#[async_trait]
impl<T, H> ErasedHandler<T> for Registered<H>
where
    T: Send + Sync + 'static,
    H: CommandHandler<T>,
{
    async fn call(
        &self,
        name: &CommandName,
        entity: &Entity<T>,
        input: CommandInput,
        publisher: &Publisher,
    ) -> Result<(), DispatchError> {
        let command: H::Command = match input {
            CommandInput::Typed(command) => *command
                .downcast::<H::Command>()
                .map_err(|_| DispatchError::MismatchedCommand(name.clone()))?,
            CommandInput::Remote(payload) => payload.decode().map_err(|source| DispatchError::UnexpectedCommand {
                command: name.clone(),
                source,
            })?,
        };

        self.0
            .handle(entity, command, publisher)
            .await
            .map_err(|source| DispatchError::Handler {
                command: name.clone(),
                source,
            })
    }
}

pub struct Dispatcher<T> {
    handlers: HashMap<CommandName, Box<dyn ErasedHandler<T>>>,
}

impl<T: Send + Sync + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: CommandHandler<T> + 'static,
    {
        self.handlers
            .insert(<H::Command as Command>::command_name(), Box::new(Registered(handler)));
        self
    }

    pub fn handles(&self, name: &CommandName) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run the handler for `command`; returns whether anything was published
    pub async fn dispatch<C: Command>(
        &self,
        store: Arc<dyn EventStore>,
        entity: &Entity<T>,
        command: C,
    ) -> Result<bool, DispatchError> {
        self.dispatch_input(store, entity, C::command_name(), CommandInput::Typed(Box::new(command)))
            .await
    }

    pub async fn dispatch_remote(
        &self,
        store: Arc<dyn EventStore>,
        entity: &Entity<T>,
        command: RemoteCommand,
    ) -> Result<bool, DispatchError> {
        self.dispatch_input(store, entity, command.command, CommandInput::Remote(command.payload))
            .await
    }

    async fn dispatch_input(
        &self,
        store: Arc<dyn EventStore>,
        entity: &Entity<T>,
        name: CommandName,
        input: CommandInput,
    ) -> Result<bool, DispatchError> {
        let handler = self
            .handlers
            .get(&name)
            .ok_or_else(|| DispatchError::CommandNotFound(name.clone()))?;

        let publisher = Publisher::new(store, entity.id.clone());
        handler.call(&name, entity, input, &publisher).await?;

        tracing::debug!(
            command = %name,
            stream = %entity.id,
            published = publisher.published(),
            "Dispatched command"
        );

        Ok(publisher.published())
    }
}

impl<T: Send + Sync + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}
