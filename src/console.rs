//! Line-based terminal front end
//!
//! Reads one line per prompt, hands it to the engine and prints the reply.
//! Type `exit` or `quit` to leave, `/retry` to re-send an unanswered message.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::conversation::Speaker;
use crate::core::{ChatError, ConversationEngine, EngineState, TurnOutcome};

const RETRY_COMMAND: &str = "/retry";

fn display_name<'a>(engine: &'a ConversationEngine, speaker: Speaker) -> &'a str {
    match speaker {
        Speaker::User => engine.user_name(),
        Speaker::Agent => engine.agent_name(),
    }
}

async fn write_turn<W>(output: &mut W, name: &str, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(format!("{}: {}\n", name, text).as_bytes())
        .await?;
    output.flush().await
}

/// Print every stored turn, e.g. when resuming a chat
pub async fn print_transcript<W>(engine: &ConversationEngine, output: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for turn in engine.transcript().turns() {
        write_turn(output, display_name(engine, turn.speaker()), turn.text()).await?;
    }
    Ok(())
}

/// Run the prompt loop until the user exits or input ends
pub async fn run<R, W>(
    engine: &mut ConversationEngine,
    input: R,
    output: &mut W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while engine.state() != EngineState::Done {
        output
            .write_all(format!("{}: ", engine.user_name()).as_bytes())
            .await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            // EOF behaves like exit
            output.write_all(b"\n").await?;
            match engine.end_session() {
                Ok(Some(closing)) => write_turn(output, engine.agent_name(), &closing).await?,
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Could not close the session"),
            }
            break;
        };

        let result = if line.trim() == RETRY_COMMAND {
            engine.retry().await.map(TurnOutcome::Replied)
        } else {
            engine.submit_user_text(&line).await
        };

        match result {
            Ok(TurnOutcome::Ignored) => {}
            Ok(TurnOutcome::Replied(reply)) => {
                write_turn(output, engine.agent_name(), &reply).await?;
            }
            Ok(TurnOutcome::Finished { closing_line }) => {
                if let Some(closing) = closing_line {
                    write_turn(output, engine.agent_name(), &closing).await?;
                }
            }
            Err(ChatError::Completion(e)) => {
                let hint = if e.is_transient() {
                    format!(" (type {} to try again)", RETRY_COMMAND)
                } else {
                    String::new()
                };
                output
                    .write_all(format!("[error] {}{}\n", e, hint).as_bytes())
                    .await?;
            }
            Err(e) => {
                tracing::error!(error = %e, "Turn failed");
                output.write_all(format!("[error] {}\n", e).as_bytes()).await?;
            }
        }
    }

    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerationDefaults, PromptTemplate, RequestConfig};
    use crate::conversation::Transcript;
    use crate::providers::{CompletionError, CompletionRequest, CompletionResult, CompletionService};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails the first call, then echoes the call count
    struct FlakyService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionService for FlakyService {
        async fn complete(
            &self,
            _request: CompletionRequest<'_>,
        ) -> Result<CompletionResult, CompletionError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(CompletionError::NoAnswer),
                n => Ok(CompletionResult::single(format!("reply {}", n))),
            }
        }
    }

    fn engine() -> ConversationEngine {
        let template = PromptTemplate::load("Hi {user_name}!\n######\n{transcript}\nAgent:").unwrap();
        let record = Transcript::with_opening("Hi Ann!")
            .unwrap()
            .to_record("demo_00000000", "Ann", "Bo");
        let config = RequestConfig::for_participants(&GenerationDefaults::default(), "Ann", "Bo");
        let service = Arc::new(FlakyService {
            calls: AtomicUsize::new(0),
        });
        ConversationEngine::new(record, template, config, service)
    }

    #[tokio::test]
    async fn test_session_with_retry_and_exit() {
        let mut engine = engine();
        let input: &[u8] = b"hello\n/retry\n\n  how are you?\nEXIT\nignored after exit\n";
        let mut output = Vec::new();

        run(&mut engine, input, &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("[error] Completion returned no answer (type /retry to try again)"));
        assert!(text.contains("Bo: reply 1\n"));
        assert!(text.contains("Bo: reply 2\n"));
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(engine.transcript().len(), 5);
    }

    #[tokio::test]
    async fn test_eof_closes_pending_turn() {
        let mut engine = engine();
        let input: &[u8] = b"hello\n";
        let mut output = Vec::new();

        run(&mut engine, input, &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Bo: Goodbye Ann"));
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(engine.transcript().last_speaker(), Some(Speaker::Agent));
    }

    #[tokio::test]
    async fn test_print_transcript_uses_names() {
        let engine = engine();
        let mut output = Vec::new();
        print_transcript(&engine, &mut output).await.unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "Bo: Hi Ann!\n");
    }
}
