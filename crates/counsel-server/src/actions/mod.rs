//! Built-in actions.
//!
//! | action | body | reply |
//! |---|---|---|
//! | `join` | `{channelKey}` | 200, socket joins chat channel |
//! | `leave` | `{}` | 204 |
//! | `subscribeNotifications` | `{}` | 200 `{channelKey}`, socket joins caller's feed |
//! | `sendMessage` | `{groupId, text}` | 200 `{messageId}`, `incomingMessage` to the group |
//! | `updateStatus` | `{lawyerId, status}` | 202 `{messageId}`, publishes `lawyerStatusChanged` |

pub mod channel;
pub mod chat;
pub mod status;

use std::fmt;
use std::str::FromStr;

use counsel_core::CoreError;
use counsel_rpc::{ActionRegistry, DispatchOptions, EndpointDefinition, EndpointMap};
use counsel_schema::SchemaDescriptor;

use crate::invocation::Invocation;

/// Lawyer availability values.
pub const STATUSES: &[&str] = &["online", "busy", "offline"];

/// Every action the gateway serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Join a chat channel.
    Join,
    /// Leave whatever channel the socket is in.
    Leave,
    /// Post a chat message.
    SendMessage,
    /// Join the caller's notification feed.
    SubscribeNotifications,
    /// Change a lawyer's availability.
    UpdateStatus,
}

impl Action {
    /// All actions.
    pub const ALL: [Self; 5] = [
        Self::Join,
        Self::Leave,
        Self::SendMessage,
        Self::SubscribeNotifications,
        Self::UpdateStatus,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::SendMessage => "sendMessage",
            Self::SubscribeNotifications => "subscribeNotifications",
            Self::UpdateStatus => "updateStatus",
        }
    }

    /// Path of the REST adapter route for this action.
    pub fn http_path(self) -> String {
        format!("/api/{}", self.as_str())
    }

    /// Attach this action's request and response schemas to `def`.
    fn with_schemas(self, def: EndpointDefinition) -> Result<EndpointDefinition, CoreError> {
        let message_id = || {
            SchemaDescriptor::object()
                .field("messageId", SchemaDescriptor::string().min_length(1))
        };
        match self {
            Self::Join => def.request_schema(
                &SchemaDescriptor::object()
                    .field("channelKey", SchemaDescriptor::string().min_length(1).max_length(128))
                    .named("action.join.request"),
            ),
            Self::Leave => def.request_schema(&SchemaDescriptor::object().named("action.leave.request")),
            Self::SendMessage => def
                .request_schema(
                    &SchemaDescriptor::object()
                        .field("groupId", SchemaDescriptor::string().min_length(1))
                        .field("text", SchemaDescriptor::string().min_length(1).max_length(4000))
                        .named("action.sendMessage.request"),
                )?
                .response_schema(&message_id().named("action.sendMessage.response")),
            Self::SubscribeNotifications => def
                .request_schema(&SchemaDescriptor::object().named("action.subscribeNotifications.request"))?
                .response_schema(
                    &SchemaDescriptor::object()
                        .field("channelKey", SchemaDescriptor::string())
                        .named("action.subscribeNotifications.response"),
                ),
            Self::UpdateStatus => def
                .request_schema(
                    &SchemaDescriptor::object()
                        .field("lawyerId", SchemaDescriptor::string().min_length(1))
                        .field("status", SchemaDescriptor::string().one_of(STATUSES))
                        .named("action.updateStatus.request"),
                )?
                .response_schema(&message_id().named("action.updateStatus.response")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| CoreError::internal(format!("unknown action '{s}'")))
    }
}

/// Endpoint map for every [`Action`], keyed by wire name.
pub fn websocket_endpoints() -> Result<EndpointMap, CoreError> {
    let entries = Action::ALL
        .into_iter()
        .map(|a| a.with_schemas(EndpointDefinition::websocket(a.as_str())).map(|def| (a.as_str(), def)))
        .collect::<Result<Vec<_>, _>>()?;
    EndpointMap::websocket(entries)
}

/// Endpoint map for the REST adapter: every [`Action`] as `POST /api/{action}`
/// with the same schemas as its `WebSocket` endpoint.
pub fn http_endpoints() -> Result<EndpointMap, CoreError> {
    let entries = Action::ALL
        .into_iter()
        .map(|a| a.with_schemas(EndpointDefinition::http(a.as_str(), "POST", a.http_path())))
        .collect::<Result<Vec<_>, _>>()?;
    EndpointMap::http(entries)
}

/// Registry with a handler for every action. Fails if any endpoint is left
/// without one.
pub fn build_registry(options: DispatchOptions) -> Result<ActionRegistry<Invocation>, CoreError> {
    let mut registry = ActionRegistry::new(websocket_endpoints()?, options);
    for action in Action::ALL {
        let name = action.as_str();
        match action {
            Action::Join => registry.register(name, channel::JoinHandler)?,
            Action::Leave => registry.register(name, channel::LeaveHandler)?,
            Action::SubscribeNotifications => registry.register(name, channel::SubscribeNotificationsHandler)?,
            Action::SendMessage => registry.register(name, chat::SendMessageHandler)?,
            Action::UpdateStatus => registry.register(name, status::UpdateStatusHandler)?,
        }
    }
    registry.verify()?;
    Ok(registry)
}

/// Deserialize a validated body into a typed request.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T, CoreError> {
    serde_json::from_value(body)
        .map_err(|e| CoreError::Validation(vec![counsel_core::FieldError::new("/body", e.to_string(), serde_json::Value::Null)]))
}
