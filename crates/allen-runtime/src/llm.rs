//! LLM client layer.
//!
//! Inference goes through the [`ChatExecutor`] trait so tests can substitute
//! scripted backends; the default implementation delegates to a
//! `genai::Client` configured from the agent's `LlmConfig` (endpoint, auth,
//! and adapter are forced through a service-target resolver).

use allen_contract::{ApiType, ChatRole, DialogueContext, ErrorKind, LlmConfig};
use async_trait::async_trait;
use genai::adapter::AdapterKind;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Abstraction over LLM inference backends.
#[async_trait]
pub trait ChatExecutor: Send + Sync {
    /// Run a non-streaming chat completion.
    async fn exec_chat(
        &self,
        model: &str,
        chat_req: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> genai::Result<genai::chat::ChatResponse>;

    /// Stable label for logging / debug output.
    fn name(&self) -> &'static str;
}

/// Default executor backed by `genai::Client`.
#[derive(Clone)]
pub struct GenaiChatExecutor {
    client: genai::Client,
}

impl GenaiChatExecutor {
    pub fn new(client: genai::Client) -> Self {
        Self { client }
    }

    /// Build a client whose service target is pinned to the config's
    /// endpoint, auth, and adapter (openai or ollama).
    pub fn from_config(config: &LlmConfig) -> Self {
        let base_url = config.base_url.clone();
        let api_key = config.api_key.clone();
        let model = config.model.clone();
        let adapter = match config.api_type {
            ApiType::Openai => AdapterKind::OpenAI,
            ApiType::Ollama => AdapterKind::Ollama,
        };
        let client = genai::Client::builder()
            .with_service_target_resolver_fn(move |mut target: genai::ServiceTarget| {
                if !base_url.is_empty() {
                    target.endpoint = genai::resolver::Endpoint::from_owned(base_url.clone());
                }
                if !api_key.is_empty() {
                    target.auth = genai::resolver::AuthData::from_single(api_key.clone());
                }
                target.model = genai::ModelIden::new(adapter, model.clone());
                Ok(target)
            })
            .build();
        Self { client }
    }
}

#[async_trait]
impl ChatExecutor for GenaiChatExecutor {
    async fn exec_chat(
        &self,
        model: &str,
        chat_req: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> genai::Result<genai::chat::ChatResponse> {
        self.client.exec_chat(model, chat_req, options).await
    }

    fn name(&self) -> &'static str {
        "genai_client"
    }
}

/// Builds one [`ChatExecutor`] per agent LLM config.
pub trait ChatExecutorFactory: Send + Sync {
    fn for_config(&self, config: &LlmConfig) -> Arc<dyn ChatExecutor>;
}

/// Default factory: one genai client per config.
#[derive(Default)]
pub struct GenaiFactory;

impl ChatExecutorFactory for GenaiFactory {
    fn for_config(&self, config: &LlmConfig) -> Arc<dyn ChatExecutor> {
        Arc::new(GenaiChatExecutor::from_config(config))
    }
}

/// LLM call failures, materialized into the step by the calling executor.
#[derive(Debug, Error)]
pub enum LlmCallError {
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),

    #[error("llm transport error: {0}")]
    Transport(String),

    #[error("llm returned an empty response")]
    EmptyResponse,
}

impl LlmCallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmCallError::Timeout(_) => ErrorKind::ExecutorLlmTimeout,
            LlmCallError::Transport(_) | LlmCallError::EmptyResponse => {
                ErrorKind::ExecutorLlmTransport
            }
        }
    }
}

/// Per-agent LLM client: a chat executor plus the agent's config.
///
/// The rolling dialogue context lives in `AgentState`; the preamble is
/// re-prepended on every call so trimming old turns never loses it.
#[derive(Clone)]
pub struct LlmClient {
    executor: Arc<dyn ChatExecutor>,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(executor: Arc<dyn ChatExecutor>, config: LlmConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Run one completion: `preamble` as the system message, the rolling
    /// dialogue, then `prompt` as the newest user turn. On success both the
    /// prompt and the reply are appended to the dialogue.
    pub async fn call(
        &self,
        preamble: &str,
        prompt: &str,
        dialogue: &mut DialogueContext,
    ) -> Result<String, LlmCallError> {
        let mut messages = Vec::with_capacity(dialogue.len() + 2);
        if !preamble.is_empty() {
            messages.push(ChatMessage::system(preamble));
        }
        for turn in dialogue.turns() {
            match turn.role {
                ChatRole::User => messages.push(ChatMessage::user(turn.content.clone())),
                ChatRole::Assistant => {
                    messages.push(ChatMessage::assistant(turn.content.clone()))
                }
            }
        }
        messages.push(ChatMessage::user(prompt));

        let request = ChatRequest::new(messages);
        let options = ChatOptions::default()
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let timeout = Duration::from_secs(self.config.timeout);
        let response =
            match tokio::time::timeout(
                timeout,
                self.executor
                    .exec_chat(&self.config.model, request, Some(&options)),
            )
            .await
            {
                Err(_) => {
                    warn!(model = %self.config.model, "llm call timed out");
                    return Err(LlmCallError::Timeout(timeout));
                }
                Ok(Err(e)) => return Err(LlmCallError::Transport(e.to_string())),
                Ok(Ok(response)) => response,
            };

        let text = response
            .first_text()
            .map(str::to_string)
            .ok_or(LlmCallError::EmptyResponse)?;

        dialogue.push(ChatRole::User, prompt);
        dialogue.push(ChatRole::Assistant, text.clone());
        Ok(text)
    }
}

/// Scripted inference backends for tests.
pub mod testing {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted chat executor: pops canned replies in order; repeats the
    /// last one when the script runs dry.
    pub struct ScriptedChat {
        replies: Mutex<VecDeque<String>>,
        last: Mutex<Option<String>>,
        /// Prompts received, for assertions.
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
                last: Mutex::new(None),
                prompts: Mutex::new(Vec::new()),
            })
        }

        /// Append one more canned reply.
        pub fn push_reply(&self, reply: impl Into<String>) {
            self.replies.lock().unwrap().push_back(reply.into());
        }
    }

    #[async_trait]
    impl ChatExecutor for ScriptedChat {
        async fn exec_chat(
            &self,
            _model: &str,
            chat_req: ChatRequest,
            _options: Option<&ChatOptions>,
        ) -> genai::Result<genai::chat::ChatResponse> {
            if let Some(last) = chat_req.messages.last() {
                self.prompts
                    .lock()
                    .unwrap()
                    .push(format!("{:?}", last.content));
            }
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                match replies.pop_front() {
                    Some(reply) => {
                        *self.last.lock().unwrap() = Some(reply.clone());
                        reply
                    }
                    None => self.last.lock().unwrap().clone().unwrap_or_default(),
                }
            };
            let model_iden = genai::ModelIden::new(AdapterKind::OpenAI, "scripted");
            Ok(genai::chat::ChatResponse {
                content: genai::chat::MessageContent::from_text(reply),
                reasoning_content: None,
                model_iden: model_iden.clone(),
                provider_model_iden: model_iden,
                usage: genai::chat::Usage::default(),
                captured_raw_body: None,
            })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Script that routes canned replies by the delimiter the prompt asks
    /// for: the reply whose tag appears as `<tag>` in the prompt is served.
    /// Robust against interleaving of planned steps and message-receipt
    /// steps, which ordered scripts are not.
    #[derive(Default)]
    pub struct TagScript {
        replies: Mutex<HashMap<String, VecDeque<String>>>,
    }

    impl TagScript {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Queue a reply for prompts that ask for `<tag>` output. The reply
        /// is served wrapped in its delimiters.
        pub fn on(&self, tag: &str, body: impl Into<String>) -> &Self {
            self.replies
                .lock()
                .unwrap()
                .entry(tag.to_string())
                .or_default()
                .push_back(body.into());
            self
        }
    }

    #[async_trait]
    impl ChatExecutor for TagScript {
        async fn exec_chat(
            &self,
            _model: &str,
            chat_req: ChatRequest,
            _options: Option<&ChatOptions>,
        ) -> genai::Result<genai::chat::ChatResponse> {
            let prompt = chat_req
                .messages
                .last()
                .map(|m| format!("{:?}", m.content))
                .unwrap_or_default();
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                let tag = replies
                    .iter()
                    .filter(|(tag, queue)| {
                        !queue.is_empty() && prompt.contains(&format!("<{tag}>"))
                    })
                    .map(|(tag, _)| tag.clone())
                    .next();
                match tag {
                    Some(tag) => {
                        let body = replies
                            .get_mut(&tag)
                            .and_then(|q| q.pop_front())
                            .unwrap_or_default();
                        format!("<{tag}>{body}</{tag}>")
                    }
                    None => String::new(),
                }
            };
            let model_iden = genai::ModelIden::new(AdapterKind::OpenAI, "tag-script");
            Ok(genai::chat::ChatResponse {
                content: genai::chat::MessageContent::from_text(reply),
                reasoning_content: None,
                model_iden: model_iden.clone(),
                provider_model_iden: model_iden,
                usage: genai::chat::Usage::default(),
                captured_raw_body: None,
            })
        }

        fn name(&self) -> &'static str {
            "tag_script"
        }
    }

    /// Factory handing each model name its own scripted executor, so
    /// multi-agent tests drive every agent with a distinct script.
    #[derive(Default)]
    pub struct ScriptedFactory {
        scripts: Mutex<HashMap<String, Arc<dyn ChatExecutor>>>,
    }

    impl ScriptedFactory {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Install an ordered script for one model name.
        pub fn script_for_model(
            &self,
            model: &str,
            replies: impl IntoIterator<Item = impl Into<String>>,
        ) -> Arc<ScriptedChat> {
            let chat = ScriptedChat::new(replies);
            self.scripts
                .lock()
                .unwrap()
                .insert(model.to_string(), chat.clone());
            chat
        }

        /// Install a tag-routed script for one model name.
        pub fn tag_script_for_model(&self, model: &str) -> Arc<TagScript> {
            let chat = TagScript::new();
            self.scripts
                .lock()
                .unwrap()
                .insert(model.to_string(), chat.clone());
            chat
        }
    }

    impl ChatExecutorFactory for ScriptedFactory {
        fn for_config(&self, config: &LlmConfig) -> Arc<dyn ChatExecutor> {
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .entry(config.model.clone())
                .or_insert_with(|| ScriptedChat::new(Vec::<String>::new()) as Arc<dyn ChatExecutor>)
                .clone()
        }
    }

    /// A minimal LLM config pointed at a scripted model.
    pub fn scripted_config(model: &str) -> LlmConfig {
        LlmConfig {
            api_type: ApiType::Openai,
            base_url: String::new(),
            model: model.to_string(),
            api_key: String::new(),
            max_tokens: 256,
            temperature: 0.0,
            timeout: 5,
        }
    }
}
