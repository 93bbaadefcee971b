use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod chatbots;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod enrich;
pub mod history;
pub mod keypool;
pub mod session;
pub mod ui;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Model,
}

#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[inline]
    #[must_use]
    pub const fn new(role: Role, content: String) -> Self {
        Self { role, content }
    }
}

/// A source reference returned alongside a generated reply when the
/// provider grounded the answer in web results.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub uri: String,
    pub title: Option<String>,
}

/// The extracted result of one successful exchange.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Raw outcome of one transport call, before classification. The body is
/// kept as text so quota detection can inspect it even on error statuses.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RawReply {
    pub status: u16,
    pub body: String,
}

impl RawReply {
    #[inline]
    #[must_use]
    pub const fn new(status: u16, body: String) -> Self {
        Self { status, body }
    }
}

/// Transport-level failures where no HTTP status was observed.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("Request timed out.")]
    Timeout,
    #[error("Network error: {0}.")]
    Network(String),
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Response body was not valid JSON: {0}.")]
    MalformedBody(#[from] serde_json::Error),
    #[error("Response contained no candidates.")]
    NoCandidates,
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ChatbotCreationError {
    #[error("Unknown model.")]
    UnknownModel,
}

// Traits with `async fn` have limitations using dynamic dispatch, and the
// REPL holds the active chatbot as a `Box<dyn Chatbot>`, so `async_trait`
// it is.
#[async_trait]
pub trait Chatbot: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Perform one HTTP exchange with the given API key. Only transport
    /// faults are errors here; HTTP error statuses come back as a
    /// `RawReply` so the dispatcher can classify them.
    async fn exchange(
        &self,
        messages: &[Message],
        key: &str,
    ) -> Result<RawReply, TransportFault>;

    /// Pull the reply text (and any grounding citations) out of a 2xx
    /// response body.
    fn extract(&self, body: &str) -> Result<Reply, ExtractError>;
}
