use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::event::string_newtype;
use crate::event_sourcing::core::{CodecError, Data, Named};

string_newtype!(
    /// Name a handler is registered under, e.g. `counter:increment`
    CommandName
);

/// Typed command with a registered name
pub trait Command: Named + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn command_name() -> CommandName
    where
        Self: Sized,
    {
        CommandName::from(Self::type_name())
    }
}

/// A command that arrived by name with an encoded payload
///
/// The payload is decoded into the handler's command type at dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub command: CommandName,
    pub payload: Data,
}

impl RemoteCommand {
    pub fn new(command: impl Into<CommandName>, payload: Data) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }

    pub fn from_command<C: Command>(command: &C) -> Result<Self, CodecError> {
        Ok(Self::new(C::command_name(), Data::json(command)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct RestockShelf {
        items: u32,
    }

    impl Named for RestockShelf {}
    impl Command for RestockShelf {}

    #[test]
    fn test_command_name_defaults_to_type_name() {
        assert_eq!(RestockShelf::command_name().as_str(), "tests:restock-shelf");
    }

    #[test]
    fn test_remote_command_carries_encoded_payload() {
        let remote = RemoteCommand::from_command(&RestockShelf { items: 4 }).unwrap();
        assert_eq!(remote.command, RestockShelf::command_name());
        assert_eq!(remote.payload.decode::<RestockShelf>().unwrap(), RestockShelf { items: 4 });

        let json = serde_json::to_value(&remote).unwrap();
        assert_eq!(json["command"], "tests:restock-shelf");
        assert_eq!(json["payload"]["encoding"], "application/json");
    }
}
