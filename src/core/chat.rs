//! Conversation engine
//!
//! The ConversationEngine owns one live transcript. For every line the user
//! submits it:
//! 1. Ignores blank input
//! 2. Ends the session on an exit command
//! 3. Otherwise appends the user turn, renders the full prompt, asks the
//!    completion service for a reply and appends it as the agent turn
//!
//! A failed completion leaves the user turn in place so the request can be
//! retried without losing what the user said.

use std::sync::Arc;

use crate::config::{PromptTemplate, RequestConfig, TemplateError};
use crate::conversation::{ConversationRecord, Speaker, Transcript, TranscriptError};
use crate::providers::{CompletionError, CompletionRequest, CompletionService};

/// Inputs that end the session, compared trimmed and case-insensitively
pub const EXIT_COMMANDS: &[&str] = &["exit", "quit"];

/// Where the engine is in the turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingInput,
    Processing,
    Terminating,
    Done,
}

/// Result of one submitted line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input, nothing happened
    Ignored,
    /// The agent's reply, already appended to the transcript
    Replied(String),
    /// The session ended, with the closing line if one was added
    Finished { closing_line: Option<String> },
}

/// Errors from the chat engine
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("Session has already ended")]
    SessionEnded,

    #[error("Nothing to retry: the last turn is not from the user")]
    NothingToRetry,
}

pub fn is_exit_command(text: &str) -> bool {
    let text = text.trim();
    EXIT_COMMANDS.iter().any(|cmd| text.eq_ignore_ascii_case(cmd))
}

/// Static farewell, independent of the prompt template
pub fn closing_line(user_name: &str) -> String {
    format!("Goodbye {}, it was nice talking with you.", user_name)
}

/// Drives one linear conversation
pub struct ConversationEngine {
    chat_id: String,
    user_name: String,
    agent_name: String,
    transcript: Transcript,
    template: PromptTemplate,
    request_config: RequestConfig,
    service: Arc<dyn CompletionService>,
    state: EngineState,
}

impl ConversationEngine {
    /// Take ownership of a resolved record for the length of the session
    pub fn new(
        record: ConversationRecord,
        template: PromptTemplate,
        request_config: RequestConfig,
        service: Arc<dyn CompletionService>,
    ) -> Self {
        let transcript = Transcript::from_record(&record);
        Self {
            chat_id: record.chat_id,
            user_name: record.user_name,
            agent_name: record.agent_name,
            transcript,
            template,
            request_config,
            service,
            state: EngineState::AwaitingInput,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Snapshot for persistence
    pub fn record(&self) -> ConversationRecord {
        self.transcript
            .to_record(&self.chat_id, &self.user_name, &self.agent_name)
    }

    /// Handle one line of user input
    pub async fn submit_user_text(&mut self, text: &str) -> Result<TurnOutcome, ChatError> {
        if self.state == EngineState::Done {
            return Err(ChatError::SessionEnded);
        }

        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }

        if is_exit_command(text) {
            let closing_line = self.end_session()?;
            return Ok(TurnOutcome::Finished { closing_line });
        }

        self.transcript.append(Speaker::User, text)?;
        self.exchange().await.map(TurnOutcome::Replied)
    }

    /// Re-issue the completion for a user turn that never got a reply
    pub async fn retry(&mut self) -> Result<String, ChatError> {
        if self.state == EngineState::Done {
            return Err(ChatError::SessionEnded);
        }
        if self.transcript.last_speaker() != Some(Speaker::User) {
            return Err(ChatError::NothingToRetry);
        }
        self.exchange().await
    }

    /// Close the session, adding a farewell if the user is still waiting on a reply.
    ///
    /// Calling this again once the session is done is a no-op.
    pub fn end_session(&mut self) -> Result<Option<String>, ChatError> {
        if self.state == EngineState::Done {
            return Ok(None);
        }
        self.state = EngineState::Terminating;

        let closing = if self.transcript.last_speaker() == Some(Speaker::User) {
            let line = closing_line(&self.user_name);
            self.transcript.append(Speaker::Agent, &line)?;
            Some(line)
        } else {
            None
        };

        tracing::info!(chat_id = %self.chat_id, turns = self.transcript.len(), "Session finished");
        self.state = EngineState::Done;
        Ok(closing)
    }

    /// Render, complete and append one agent turn
    async fn exchange(&mut self) -> Result<String, ChatError> {
        self.state = EngineState::Processing;
        let result = self.request_reply().await;
        self.state = EngineState::AwaitingInput;

        let answer = result?;
        self.transcript.append(Speaker::Agent, &answer)?;
        Ok(answer)
    }

    async fn request_reply(&self) -> Result<String, ChatError> {
        let prompt = self.template.render_body(
            &self.transcript.render(),
            &self.user_name,
            &self.agent_name,
        )?;
        let tag = format!("chat_turn[{}]", self.transcript.len());

        tracing::debug!(%tag, "Prompt:\n{}", prompt);

        let result = self
            .service
            .complete(CompletionRequest {
                prompt: &prompt,
                params: &self.request_config,
                tag: &tag,
            })
            .await
            .inspect_err(|e| tracing::warn!(%tag, error = %e, "Completion failed"))?;

        tracing::debug!(%tag, "Completion result: {:?}", result);

        let answer = result.top_answer().map(str::trim).unwrap_or_default();
        if answer.is_empty() {
            return Err(CompletionError::NoAnswer.into());
        }
        Ok(answer.to_string())
    }
}
