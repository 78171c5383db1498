// SPDX-License-Identifier: MIT OR Apache-2.0
//! Console commands.
//!
//! One command per line: transport triggers (`play`, `stop`, `pause`,
//! `toggle`, `prev`, `next`) plus editing and inspection commands.

use cuedeck_sequencer::{Sequence, SequenceError, Trigger};
use std::path::PathBuf;
use std::str::FromStr;

/// Error type for command parsing and execution
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Unknown command word
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),

    /// Missing or malformed argument
    #[error("Invalid argument for `{command}`: {reason}")]
    InvalidArgument {
        /// Command word
        command: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Saving failed
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// A parsed console command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Fire a transport trigger
    Trigger(Trigger),
    /// Jump to a time in seconds
    Seek(f32),
    /// Add a cue at a time, current time when omitted
    AddCue(Option<f32>),
    /// Set play speed
    Speed(f32),
    /// Enable or disable looping
    Loop(bool),
    /// Set evaluation rate
    Fps(u32),
    /// Toggle the editing flag
    Edit(bool),
    /// List cues
    Cues,
    /// Log a status line
    Status,
    /// Save the sequence
    Save(PathBuf),
    /// Print usage
    Help,
    /// Exit the player
    Quit,
}

/// Usage text for `help`
pub const HELP: &str = "\
commands:
  play | stop | pause | toggle | prev | next
  seek <seconds>     jump to a time
  cue [seconds]      add a cue (at the playhead by default)
  speed <factor>     set play speed
  loop on|off        toggle looping
  fps <rate>         set evaluation rate
  edit on|off        set the editing flag
  cues               list cues
  status             print transport state
  save <path>        write the sequence as RON
  quit";

fn number<T: FromStr>(command: &'static str, arg: Option<&str>) -> Result<T, CommandError> {
    let arg = arg.ok_or_else(|| CommandError::InvalidArgument {
        command,
        reason: "missing value".to_string(),
    })?;
    arg.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        reason: format!("`{arg}` is not a number"),
    })
}

fn switch(command: &'static str, arg: Option<&str>) -> Result<bool, CommandError> {
    match arg {
        Some("on" | "true" | "1") => Ok(true),
        Some("off" | "false" | "0") => Ok(false),
        other => Err(CommandError::InvalidArgument {
            command,
            reason: format!("expected on/off, got {other:?}"),
        }),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err(CommandError::Unknown(String::new()));
        };
        let arg = words.next();

        if let Some(trigger) = Trigger::from_name(word) {
            return Ok(Command::Trigger(trigger));
        }
        match word {
            "seek" => Ok(Command::Seek(number("seek", arg)?)),
            "cue" => match arg {
                Some(_) => Ok(Command::AddCue(Some(number("cue", arg)?))),
                None => Ok(Command::AddCue(None)),
            },
            "speed" => Ok(Command::Speed(number("speed", arg)?)),
            "loop" => Ok(Command::Loop(switch("loop", arg)?)),
            "fps" => Ok(Command::Fps(number("fps", arg)?)),
            "edit" => Ok(Command::Edit(switch("edit", arg)?)),
            "cues" => Ok(Command::Cues),
            "status" => Ok(Command::Status),
            "save" => arg
                .map(|path| Command::Save(PathBuf::from(path)))
                .ok_or(CommandError::InvalidArgument {
                    command: "save",
                    reason: "missing path".to_string(),
                }),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl Command {
    /// Apply the command to `sequence`
    pub fn execute(&self, sequence: &Sequence) -> Result<(), CommandError> {
        match self {
            Command::Trigger(trigger) => sequence.trigger(*trigger),
            Command::Seek(time) => sequence.seek(*time),
            Command::AddCue(time) => {
                let time = time.unwrap_or_else(|| sequence.current_time());
                let id = sequence.add_cue(time);
                if let Some(cue) = sequence.cue(id) {
                    tracing::info!(time, name = %cue.name, "Cue added");
                }
            }
            Command::Speed(speed) => sequence.set_play_speed(*speed),
            Command::Loop(looping) => sequence.set_looping(*looping),
            Command::Fps(fps) => sequence.set_fps(*fps),
            Command::Edit(editing) => sequence.set_being_edited(*editing),
            Command::Cues => {
                for (_, cue) in sequence.cues() {
                    let state = if cue.enabled { "" } else { " (disabled)" };
                    tracing::info!("{:>8.3}s  {}{state}", cue.time, cue.name);
                }
            }
            Command::Status => log_status(sequence),
            Command::Save(path) => sequence.save(path)?,
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }
}

/// Log one line describing the transport
pub fn log_status(sequence: &Sequence) {
    let time = sequence.current_time();
    tracing::info!(
        state = ?sequence.playback_state(),
        time = format_args!("{time:.3}"),
        total = sequence.total_time(),
        speed = sequence.play_speed(),
        audio = sequence.is_audio_driven(),
        nearest_cue = sequence.nearest_cue(time, false),
        "Status"
    );
}
