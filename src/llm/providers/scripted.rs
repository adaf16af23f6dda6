//! Scripted provider: replays a fixed queue of replies in order.
//!
//! Used by tests and for replaying captured model output without a network.
//! Each queued entry is either a reply text or an error message; once the
//! queue is drained every further call fails.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::llm::{LlmResponse, ProviderError};

#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every user prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub async fn complete(
        &self,
        content: &str,
        _system: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(content.to_string());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| ProviderError::Request("scripted queue poisoned".into()))?
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(LlmResponse { text, usage: None }),
            Some(Err(message)) => Err(ProviderError::Request(message)),
            None => Err(ProviderError::Request("scripted replies exhausted".into())),
        }
    }
}
