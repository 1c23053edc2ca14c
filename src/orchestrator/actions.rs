//! User actions, parsed from console input lines.

use std::path::PathBuf;

pub const HELP: &str = "\
Type a message to talk to the robot, or one of:
  /listen on|off     start or stop voice input
  /camera on|off     start or stop the camera
  /filter <name>     camera filter (none, grayscale, blur, edges, sepia, invert, cartoon)
  /capture [path]    save the current camera frame
  /voice <id>        select a synthesis voice
  /rate <n>          speech rate in words per minute
  /volume <n>        speech volume, 0-100
  /mute, /unmute     toggle spoken answers
  /stop              stop speaking
  /status            show module status
  /clear             clear the chat
  /help              show this help
  /quit              shut down";

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    /// Typed chat input; routed like recognized speech.
    Say(String),
    Help,
    Status,
    Clear,
    Listen(bool),
    Camera(bool),
    Filter(String),
    Capture(Option<PathBuf>),
    Voice(String),
    Rate(i32),
    Volume(u8),
    Mute,
    Unmute,
    StopSpeaking,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("unknown command /{0}; try /help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl UiAction {
    /// Parse one input line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown slash commands or malformed arguments.
    pub fn parse_line(line: &str) -> Result<Option<Self>, ActionError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Say(line.to_owned())));
        };
        let (command, arg) = match rest.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (rest, ""),
        };

        let action = match command.to_ascii_lowercase().as_str() {
            "help" | "?" => Self::Help,
            "status" => Self::Status,
            "clear" => Self::Clear,
            "listen" => Self::Listen(on_off(arg, "/listen on|off")?),
            "camera" => Self::Camera(on_off(arg, "/camera on|off")?),
            "filter" => Self::Filter(required(arg, "/filter <name>")?),
            "capture" => Self::Capture((!arg.is_empty()).then(|| PathBuf::from(arg))),
            "voice" => Self::Voice(required(arg, "/voice <id>")?),
            "rate" => Self::Rate(arg.parse().map_err(|_| ActionError::Usage("/rate <n>"))?),
            "volume" => Self::Volume(
                arg.parse::<u8>()
                    .ok()
                    .filter(|v| *v <= 100)
                    .ok_or(ActionError::Usage("/volume <0-100>"))?,
            ),
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "stop" => Self::StopSpeaking,
            "quit" | "exit" => Self::Quit,
            other => return Err(ActionError::Unknown(other.to_owned())),
        };
        Ok(Some(action))
    }
}

fn on_off(arg: &str, usage: &'static str) -> Result<bool, ActionError> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "start" | "1" => Ok(true),
        "off" | "stop" | "0" => Ok(false),
        _ => Err(ActionError::Usage(usage)),
    }
}

fn required(arg: &str, usage: &'static str) -> Result<String, ActionError> {
    if arg.is_empty() {
        Err(ActionError::Usage(usage))
    } else {
        Ok(arg.to_owned())
    }
}
