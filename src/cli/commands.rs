//! Slash commands understood by the REPL.

use crate::llm::model_directory::VisionFilter;
use crate::session::ConversationMode;
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// One parsed `/command` line
#[derive(Parser, Debug)]
#[command(multicall = true)]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Switch between single, dual and triple image conversations
    Mode { mode: ConversationMode },

    /// Load an image file into a slot
    Load {
        path: PathBuf,
        #[arg(short, long, default_value_t = 1, value_parser = slot_number())]
        slot: usize,
    },

    /// Rotate a slot clockwise by a multiple of 90 degrees
    Rotate {
        #[arg(allow_negative_numbers = true, default_value_t = 90)]
        degrees: i32,
        #[arg(short, long, default_value_t = 1, value_parser = slot_number())]
        slot: usize,
    },

    /// Undo all rotation on a slot
    ResetRotation {
        #[arg(short, long, default_value_t = 1, value_parser = slot_number())]
        slot: usize,
    },

    /// Empty a slot
    Remove {
        #[arg(short, long, default_value_t = 1, value_parser = slot_number())]
        slot: usize,
    },

    /// Send an extra image with the next message (single mode)
    Attach { path: PathBuf },

    /// Forget the conversation and its images
    Clear,

    /// Show the conversation so far
    History,

    /// List installed models
    Models {
        #[arg(long, default_value = "keyword")]
        filter: VisionFilter,
        /// Ignore the cached listing
        #[arg(long)]
        refresh: bool,
    },

    /// Show or change the chat model
    Model { name: Option<String> },

    /// Show or change the sampling temperature
    Temperature { value: Option<f32> },

    /// Download a model
    Pull { name: String },

    /// Remove an installed model
    Delete { name: String },

    /// Models currently loaded in memory
    Ps,

    /// Evict one model, or every loaded model
    Unload { name: Option<String> },

    /// Write the current composite image as JPEG
    SaveComposite { path: PathBuf },

    /// Show mode, model and slot state
    Status,

    /// Leave the chat
    #[command(alias = "exit")]
    Quit,
}

// Slots are numbered 1 to 3 on screen
fn slot_number() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..=3)
}

/// Split a command line into words, honouring double quotes
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    words.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        words.push(current);
    }
    words
}

/// Parse the text after the leading `/`
pub fn parse(line: &str) -> Result<Command, clap::Error> {
    CommandLine::try_parse_from(split_words(line)).map(|parsed| parsed.command)
}
