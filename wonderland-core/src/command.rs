//! Text command parsing.
//!
//! Turns a line typed by a visitor into either an [`Intent`] for the world
//! or a [`Meta`] request that only reads state. Meta commands are never
//! witnessed and never move the clock.

use crate::rules::Intent;
use crate::topology::Direction;
use thiserror::Error;

/// Read-only requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meta {
    Look,
    Exits,
    Inventory,
    Who,
    Time,
    Help,
    /// Show the last `n` witnessed events in this room.
    Witness(usize),
    Quit,
}

/// A parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Act(Intent),
    Meta(Meta),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{verb} needs {what}")]
    Missing { verb: String, what: &'static str },

    #[error("not a direction: {0}")]
    BadDirection(String),

    #[error("not a number: {0}")]
    BadNumber(String),
}

impl ParseError {
    pub fn narrative(&self) -> String {
        match self {
            ParseError::Empty => "Wonderland waits for you to do something.".to_string(),
            ParseError::Unknown(verb) => format!(
                "Wonderland tilts its head. '{}' means nothing here yet. Try 'help'.",
                verb
            ),
            ParseError::Missing { verb, what } => format!("To {} you need {}.", verb, what),
            ParseError::BadDirection(word) => {
                format!("'{}' is not a direction, even here.", word)
            }
            ParseError::BadNumber(word) => format!("'{}' is not a number you can count to.", word),
        }
    }
}

/// Default number of events shown by `witness`.
pub const DEFAULT_WITNESS_COUNT: usize = 10;

pub const HELP: &str = "\
Moving:      north/n, south/s, east/e, west/w, up/u, down/d, in, out (or: go <dir>)
Speaking:    say <words> ('<words>), emote <action> (:<action>)
Hosts:       greet <someone>, ask <someone> about <question>
Growing:     reflect [thought]
Things:      build <thing>, take <thing>, place <thing>, release <thing>
Community:   vouch <someone>, mentor <someone>
Travel:      teleport <place>
Looking:     look, exits, inventory, who, time, witness [n]
Leaving:     depart (leave the world), quit (end this session)";

fn required<'a>(verb: &str, rest: &'a str, what: &'static str) -> Result<&'a str, ParseError> {
    if rest.is_empty() {
        Err(ParseError::Missing {
            verb: verb.to_string(),
            what,
        })
    } else {
        Ok(rest)
    }
}

/// Parse one line of input.
pub fn parse(input: &str) -> Result<Command, ParseError> {
    let line = input.trim();
    let line = line
        .strip_prefix('#')
        .or_else(|| line.strip_prefix('/'))
        .unwrap_or(line)
        .trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(rest) = line.strip_prefix('\'').or_else(|| line.strip_prefix('"')) {
        let text = rest.trim().trim_end_matches('"').trim();
        return Ok(Command::Act(Intent::Say {
            text: required("say", text, "some words")?.to_string(),
        }));
    }
    if let Some(rest) = line.strip_prefix(':') {
        return Ok(Command::Act(Intent::Emote {
            text: required("emote", rest.trim(), "an action")?.to_string(),
        }));
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb.to_lowercase(), rest.trim()),
        None => (line.to_lowercase(), ""),
    };

    if rest.is_empty() {
        if let Some(direction) = Direction::parse(&verb) {
            return Ok(Command::Act(Intent::Move { direction }));
        }
    }

    let intent = match verb.as_str() {
        "look" | "l" => return Ok(Command::Meta(Meta::Look)),
        "exits" => return Ok(Command::Meta(Meta::Exits)),
        "inventory" | "inv" | "i" => return Ok(Command::Meta(Meta::Inventory)),
        "who" => return Ok(Command::Meta(Meta::Who)),
        "time" => return Ok(Command::Meta(Meta::Time)),
        "help" | "?" | "h" => return Ok(Command::Meta(Meta::Help)),
        "quit" | "q" => return Ok(Command::Meta(Meta::Quit)),
        "witness" | "history" => {
            let count = if rest.is_empty() {
                DEFAULT_WITNESS_COUNT
            } else {
                rest.parse()
                    .map_err(|_| ParseError::BadNumber(rest.to_string()))?
            };
            return Ok(Command::Meta(Meta::Witness(count)));
        }

        "go" | "walk" | "move" | "head" => {
            let word = required(&verb, rest, "a direction")?;
            let direction =
                Direction::parse(word).ok_or_else(|| ParseError::BadDirection(word.to_string()))?;
            Intent::Move { direction }
        }
        "say" => Intent::Say {
            text: required(&verb, rest, "some words")?.to_string(),
        },
        "emote" | "me" => Intent::Emote {
            text: required(&verb, rest, "an action")?.to_string(),
        },
        "reflect" | "ponder" | "meditate" => Intent::Reflect {
            thought: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "greet" | "hail" | "wave" => Intent::Greet {
            target: required(&verb, strip_to(rest), "someone to greet")?.to_string(),
        },
        "ask" => {
            let rest = required(&verb, rest, "someone and a question")?;
            let (target, text) = split_question(rest);
            Intent::Ask {
                target: target.to_string(),
                text: required(&verb, text, "a question")?.to_string(),
            }
        }
        "build" | "make" | "craft" => Intent::Build {
            item: required(&verb, strip_article(rest), "a thing to build")?.to_string(),
        },
        "take" | "get" => Intent::Take {
            item: required(&verb, strip_article(rest), "a thing to take")?.to_string(),
        },
        "place" | "put" | "drop" => Intent::Place {
            item: required(&verb, strip_article(rest), "a thing to place")?.to_string(),
        },
        "release" | "discard" => Intent::Release {
            item: required(&verb, strip_article(rest), "a thing to let go")?.to_string(),
        },
        "teleport" | "tp" | "travel" => Intent::Teleport {
            destination: required(&verb, strip_to(rest), "a destination")?.to_string(),
        },
        "vouch" => {
            let target = rest.strip_prefix("for ").unwrap_or(rest).trim();
            Intent::Vouch {
                target: required(&verb, target, "someone to vouch for")?.to_string(),
            }
        }
        "mentor" => Intent::Mentor {
            target: required(&verb, rest, "someone to mentor")?.to_string(),
        },
        "depart" => Intent::Depart,
        _ => return Err(ParseError::Unknown(verb)),
    };
    Ok(Command::Act(intent))
}

fn strip_to(rest: &str) -> &str {
    rest.strip_prefix("to ").unwrap_or(rest).trim()
}

fn strip_article(rest: &str) -> &str {
    ["a ", "an ", "the ", "some "]
        .iter()
        .find_map(|article| rest.strip_prefix(article))
        .unwrap_or(rest)
        .trim()
}

/// Split "cat about the way out" or "cat: the way out" into target and text.
fn split_question(rest: &str) -> (&str, &str) {
    if let Some((target, text)) = rest.split_once(" about ") {
        return (target.trim(), text.trim());
    }
    if let Some((target, text)) = rest.split_once(':') {
        return (target.trim(), text.trim());
    }
    match rest.split_once(char::is_whitespace) {
        Some((target, text)) => (target.trim(), text.trim()),
        None => (rest, ""),
    }
}
