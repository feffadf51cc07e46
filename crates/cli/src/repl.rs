//! Line-oriented terminal front end for a chat session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent::{ChatSession, session::IMAGE_PENDING_MESSAGE};
use proto::{Attachment, ChatModel, Message, MessageKind, Role, TurnEvent, TurnPhase};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::attachment;

const PROMPT: &str = "omnichat> ";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Plain text sent as a turn.
    Submit(String),
    /// `/attach <path>`
    Attach(PathBuf),
    /// `/detach`
    Detach,
    /// `/model` lists, `/model <name>` selects.
    Model(Option<String>),
    Clear,
    History,
    Help,
    Quit,
    /// Anything starting with `/` that is not a known command.
    Unknown(String),
}

/// Trims an input line and drops empty lines.
pub fn normalize_input_line(raw: &str) -> Option<String> {
    let line = raw.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Returns true when input requests REPL termination.
pub fn is_quit_command(line: &str) -> bool {
    line == "/quit" || line == "/exit"
}

/// Parses a normalized input line.
pub fn parse_command(line: &str) -> ReplCommand {
    if is_quit_command(line) {
        return ReplCommand::Quit;
    }
    if !line.starts_with('/') {
        return ReplCommand::Submit(line.to_string());
    }

    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, Some(rest.trim()).filter(|r| !r.is_empty())),
        None => (line, None),
    };
    match (name, arg) {
        ("/attach", Some(path)) => ReplCommand::Attach(PathBuf::from(path)),
        ("/detach", None) => ReplCommand::Detach,
        ("/model", arg) => ReplCommand::Model(arg.map(str::to_string)),
        ("/clear", None) => ReplCommand::Clear,
        ("/history", None) => ReplCommand::History,
        ("/help", None) => ReplCommand::Help,
        _ => ReplCommand::Unknown(line.to_string()),
    }
}

/// Usage text for `/help`.
pub fn help_text() -> &'static str {
    "Commands:
  /attach <path>   stage an image for the next message
  /detach          drop the staged image
  /model [name]    list models or switch (flash, pro, image)
  /clear           start a new conversation
  /history         print the conversation so far
  /quit, /exit     leave
Anything else is sent to the assistant."
}

/// Renders one transcript message for the terminal.
pub fn format_message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "gemini",
        Role::System => "system",
    };
    let body = match message.kind {
        MessageKind::Text => message.content.clone(),
        MessageKind::Image => match Attachment::parse_data_uri(&message.content) {
            Ok(image) => format!("<generated image, {}>", image.mime_type),
            Err(_) => "<generated image>".to_string(),
        },
        MessageKind::Error => format!("Error: {}", message.content),
    };
    let mut out = format!("[{speaker}] {body}");
    if let Some(attachment) = &message.attachment {
        out.push_str(&format!(" (+ {} attachment)", attachment.mime_type));
    }
    if message.streaming {
        out.push_str(" …");
    }
    out
}

/// Renders the whole transcript, one message per paragraph.
pub fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(format_message)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lists the model catalog, marking the current selection.
pub fn format_model_list(current: ChatModel) -> String {
    ChatModel::all()
        .iter()
        .map(|model| {
            let marker = if *model == current { "*" } else { " " };
            format!(
                "{marker} {:<6} {:<24} {}",
                model.alias(),
                model.id(),
                model.label()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Streams reply text to `out` as fragments arrive.
///
/// Progress events are best-effort, so each fragment prints whatever part of
/// `accumulated` is still missing. Returns how many bytes were printed.
pub async fn render_progress<W>(
    mut rx: mpsc::Receiver<TurnEvent>,
    out: &mut W,
) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut printed = 0;
    while let Some(event) = rx.recv().await {
        if let TurnEvent::Fragment { accumulated, .. } = event
            && let Some(missing) = accumulated.get(printed..)
            && !missing.is_empty()
        {
            out.write_all(missing.as_bytes()).await?;
            out.flush().await?;
            printed = accumulated.len();
        }
    }
    Ok(printed)
}

/// Finishes a rendered reply from its final transcript state.
fn format_completion(message: &Message, printed: usize, image_dir: &Path) -> String {
    match message.kind {
        MessageKind::Text => {
            let rest = message.content.get(printed..).unwrap_or_default();
            format!("{rest}\n")
        }
        MessageKind::Error if printed > 0 => format!("\nError: {}\n", message.content),
        MessageKind::Error => format!("Error: {}\n", message.content),
        MessageKind::Image => {
            match attachment::save_data_uri(image_dir, &message.id, &message.content) {
                Ok(path) => format!("Image saved to {}\n", path.display()),
                Err(e) => format!("Could not save image: {e:#}\n"),
            }
        }
    }
}

/// Image picked with `/attach`, waiting for the next message.
struct StagedAttachment {
    path: PathBuf,
    attachment: Attachment,
}

/// Interactive loop over one [`ChatSession`].
pub struct Repl {
    session: Arc<ChatSession>,
    image_dir: PathBuf,
    staged: Option<StagedAttachment>,
}

impl Repl {
    pub fn new(session: Arc<ChatSession>, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            image_dir: image_dir.into(),
            staged: None,
        }
    }

    /// Stages an image for the next turn.
    pub fn attach(&mut self, path: &Path) -> anyhow::Result<()> {
        let attachment = attachment::encode_file(path)?;
        self.staged = Some(StagedAttachment {
            path: path.to_path_buf(),
            attachment,
        });
        Ok(())
    }

    /// Reads stdin until EOF or `/quit`.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        info!(model = %self.session.model(), "REPL started");
        let greeting = format_transcript(&self.session.transcript().snapshot());
        stdout
            .write_all(format!("{greeting}\n\n{PROMPT}").as_bytes())
            .await?;
        stdout.flush().await?;

        while let Some(line) = lines.next_line().await? {
            if let Some(line) = normalize_input_line(&line)
                && !self.handle_line(&line, &mut stdout).await?
            {
                break;
            }
            stdout.write_all(PROMPT.as_bytes()).await?;
            stdout.flush().await?;
        }

        info!("REPL stopped");
        Ok(())
    }

    /// Handles one normalized line. Returns `false` when the user quits.
    pub async fn handle_line<W>(&mut self, line: &str, out: &mut W) -> anyhow::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        let reply = match parse_command(line) {
            ReplCommand::Quit => return Ok(false),
            ReplCommand::Submit(prompt) => {
                self.send_turn(prompt, out).await?;
                return Ok(true);
            }
            ReplCommand::Attach(path) => match self.attach(&path) {
                Ok(()) => format!("Attached {}", path.display()),
                Err(e) => format!("Error: {e:#}"),
            },
            ReplCommand::Detach => match self.staged.take() {
                Some(staged) => format!("Detached {}", staged.path.display()),
                None => "No attachment staged".to_string(),
            },
            ReplCommand::Model(None) => format_model_list(self.session.model()),
            ReplCommand::Model(Some(name)) => match name.parse::<ChatModel>() {
                Ok(model) => {
                    self.session.select_model(model);
                    format!("Model set to {} ({})", model.label(), model.id())
                }
                Err(e) => format!("Error: {e}"),
            },
            ReplCommand::Clear => {
                self.session.clear_transcript();
                self.staged = None;
                format_transcript(&self.session.transcript().snapshot())
            }
            ReplCommand::History => format_transcript(&self.session.transcript().snapshot()),
            ReplCommand::Help => help_text().to_string(),
            ReplCommand::Unknown(cmd) => format!("Unknown command: {cmd} (try /help)"),
        };
        out.write_all(format!("{reply}\n\n").as_bytes()).await?;
        out.flush().await?;
        Ok(true)
    }

    /// Sends one turn with the staged attachment and renders it live.
    ///
    /// Returns the terminal phase, or `None` when the turn was rejected.
    pub async fn send_turn<W>(
        &mut self,
        prompt: String,
        out: &mut W,
    ) -> anyhow::Result<Option<TurnPhase>>
    where
        W: AsyncWrite + Unpin,
    {
        let attachment = self.staged.take().map(|s| s.attachment);
        let model = self.session.model();
        if model.is_image_generation() {
            out.write_all(format!("{IMAGE_PENDING_MESSAGE}\n").as_bytes())
                .await?;
            out.flush().await?;
        }
        let (tx, rx) = mpsc::channel(64);

        let (outcome, printed) = tokio::join!(
            self.session
                .submit_turn_with_progress(prompt, attachment, model, tx),
            render_progress(rx, out),
        );
        let printed = printed?;

        match outcome {
            Ok(outcome) => {
                // Absent when the transcript was cleared mid-turn.
                if let Some(reply) = self
                    .session
                    .transcript()
                    .get(&outcome.turn.assistant_message_id)
                {
                    let text = format_completion(&reply, printed, &self.image_dir);
                    out.write_all(text.as_bytes()).await?;
                }
                debug!(phase = %outcome.phase, "Turn rendered");
                out.write_all(b"\n").await?;
                out.flush().await?;
                Ok(Some(outcome.phase))
            }
            Err(e) => {
                out.write_all(format!("{e}\n\n").as_bytes()).await?;
                out.flush().await?;
                Ok(None)
            }
        }
    }
}
