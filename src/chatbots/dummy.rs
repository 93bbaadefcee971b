use async_trait::async_trait;

use crate::{
    Chatbot, ExtractError, Message, RawReply, Reply, Role, TransportFault,
};

/// Offline chatbot that echoes the last user message. Useful for trying
/// the REPL without keys and for exercising the dispatch path end to end.
#[non_exhaustive]
#[derive(Default)]
pub struct DummyChatbot;

impl DummyChatbot {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Chatbot for DummyChatbot {
    #[inline]
    fn name(&self) -> &'static str {
        "Dummy"
    }

    #[inline]
    fn model(&self) -> &str {
        "dummy-1"
    }

    #[inline]
    async fn exchange(
        &self,
        messages: &[Message],
        _key: &str,
    ) -> Result<RawReply, TransportFault> {
        let body = messages.last().map_or_else(
            || "Dummy response to an empty conversation.".to_owned(),
            |last_msg| {
                if last_msg.role == Role::User {
                    format!("Dummy response to: \"{}\".", last_msg.content)
                } else {
                    "Dummy response.".to_owned()
                }
            },
        );

        Ok(RawReply::new(200, body))
    }

    #[inline]
    fn extract(&self, body: &str) -> Result<Reply, ExtractError> {
        Ok(Reply {
            text: body.to_owned(),
            citations: Vec::new(),
        })
    }
}
