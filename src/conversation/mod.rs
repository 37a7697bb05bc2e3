//! Conversation types and transcript state

use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    /// Label used when the transcript is rendered into a prompt
    pub fn label(self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Agent => "Agent",
        }
    }
}

/// One utterance, already trimmed
///
/// Stored turns go through the same checks as appended ones when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTurn")]
pub struct Turn {
    speaker: Speaker,
    text: String,
}

/// A turn as found on disk, before validation
#[derive(Deserialize)]
struct RawTurn {
    speaker: Speaker,
    text: String,
}

impl TryFrom<RawTurn> for Turn {
    type Error = TranscriptError;

    fn try_from(raw: RawTurn) -> Result<Self, Self::Error> {
        Turn::new(raw.speaker, &raw.text)
    }
}

impl Turn {
    fn new(speaker: Speaker, text: &str) -> Result<Self, TranscriptError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TranscriptError::EmptyTurn(speaker));
        }
        Ok(Self {
            speaker,
            text: text.to_string(),
        })
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The turn as a single prompt line, e.g. `User: hello there`
    pub fn render_line(&self) -> String {
        format!("{}: {}", self.speaker.label(), single_line(&self.text))
    }
}

/// Collapse every line break into a space so a turn never spans lines
fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("Refusing to append an empty {0:?} turn")]
    EmptyTurn(Speaker),
}

/// Append-only, ordered turn log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transcript with the agent's opening line
    pub fn with_opening(opening_line: &str) -> Result<Self, TranscriptError> {
        let mut transcript = Self::new();
        transcript.append(Speaker::Agent, opening_line)?;
        Ok(transcript)
    }

    pub fn append(&mut self, speaker: Speaker, text: &str) -> Result<&Turn, TranscriptError> {
        self.turns.push(Turn::new(speaker, text)?);
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// One line per turn, in append order
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(Turn::render_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn last_speaker(&self) -> Option<Speaker> {
        self.turns.last().map(|t| t.speaker)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Hand the turns over to a record for persistence
    pub fn to_record(
        &self,
        chat_id: impl Into<String>,
        user_name: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> ConversationRecord {
        ConversationRecord {
            chat_id: chat_id.into(),
            turns: self.clone(),
            user_name: user_name.into(),
            agent_name: agent_name.into(),
        }
    }

    /// Rebuild the transcript exactly as it was stored
    pub fn from_record(record: &ConversationRecord) -> Self {
        record.turns.clone()
    }
}

/// The persisted form of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub chat_id: String,
    pub turns: Transcript,
    pub user_name: String,
    pub agent_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transcript {
        let mut transcript = Transcript::with_opening("Hi Ann, how can I help?").unwrap();
        transcript.append(Speaker::User, "  what's the\nweather?  ").unwrap();
        transcript.append(Speaker::Agent, "Sunny.\r\nWarm too.").unwrap();
        transcript.append(Speaker::User, "thanks").unwrap();
        transcript
    }

    #[test]
    fn test_append_trims_text() {
        let transcript = sample();
        assert_eq!(transcript.turns()[1].text(), "what's the\nweather?");
        assert_eq!(transcript.len(), 4);
    }

    #[test]
    fn test_empty_turn_rejected() {
        let mut transcript = Transcript::new();
        assert_eq!(
            transcript.append(Speaker::User, "   \n\t").unwrap_err(),
            TranscriptError::EmptyTurn(Speaker::User)
        );
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_render_one_line_per_turn() {
        let transcript = sample();
        let rendered = transcript.render();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), transcript.len());
        assert_eq!(lines[0], "Agent: Hi Ann, how can I help?");
        assert_eq!(lines[1], "User: what's the weather?");
        assert_eq!(lines[2], "Agent: Sunny. Warm too.");
        assert_eq!(lines[3], "User: thanks");
        assert!(!rendered.contains('\r'));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(Transcript::new().render(), "");
    }

    #[test]
    fn test_same_speaker_runs_allowed() {
        let mut transcript = Transcript::new();
        transcript.append(Speaker::User, "one").unwrap();
        transcript.append(Speaker::User, "two").unwrap();
        assert_eq!(transcript.render(), "User: one\nUser: two");
    }

    #[test]
    fn test_last_speaker() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.last_speaker(), None);
        transcript.append(Speaker::Agent, "hello").unwrap();
        assert_eq!(transcript.last_speaker(), Some(Speaker::Agent));
        transcript.append(Speaker::User, "hi").unwrap();
        assert_eq!(transcript.last_speaker(), Some(Speaker::User));
    }

    #[test]
    fn test_record_round_trip_through_json() {
        let transcript = sample();
        let record = transcript.to_record("test_chat_1a2b3c4d", "Ann", "Bo");

        let json = serde_json::to_string(&record).unwrap();
        let restored: ConversationRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(Transcript::from_record(&restored), transcript);
        assert_eq!(restored.user_name, "Ann");
        assert_eq!(restored.agent_name, "Bo");
    }

    #[test]
    fn test_stored_turns_are_normalized() {
        let json = r#"{"speaker": "user", "text": "  hi\n"}"#;
        let turn: Turn = serde_json::from_str(json).unwrap();
        assert_eq!(turn.text(), "hi");
        assert_eq!(turn.speaker(), Speaker::User);
    }

    #[test]
    fn test_blank_stored_turn_rejected() {
        let json = r#"{
            "chat_id": "c_1",
            "user_name": "Ann",
            "agent_name": "Bo",
            "turns": [
                {"speaker": "agent", "text": "Hello"},
                {"speaker": "user", "text": "   "}
            ]
        }"#;
        let err = serde_json::from_str::<ConversationRecord>(json).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_record_json_shape() {
        let mut transcript = Transcript::new();
        transcript.append(Speaker::Agent, "Hello").unwrap();
        let record = transcript.to_record("c_1", "Ann", "Bo");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["chat_id"], "c_1");
        assert_eq!(value["user_name"], "Ann");
        assert_eq!(value["agent_name"], "Bo");
        assert_eq!(value["turns"][0]["speaker"], "agent");
        assert_eq!(value["turns"][0]["text"], "Hello");
    }
}
