//! Scripted command vocabulary.
//!
//! One command per line. `#` starts a comment; blank lines are skipped.
//! Insert commands accept the literal payload `RAND` to request a random
//! string from the run RNG.

use thiserror::Error;

/// A parsed harness command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `new` — create a fresh queue (frees any existing one first).
    New,
    /// `free` — free the current queue.
    Free,
    /// `ih str [n]` — insert `str` at the head, `n` times.
    InsertHead { text: String, count: usize },
    /// `it str [n]` — insert `str` at the tail, `n` times.
    InsertTail { text: String, count: usize },
    /// `rh [expected]` — remove from the head, optionally comparing the
    /// removed value.
    RemoveHead { expected: Option<String> },
    /// `rt [expected]` — remove from the tail.
    RemoveTail { expected: Option<String> },
    /// `rhq` — remove from the head without reporting the value.
    RemoveHeadQuiet,
    /// `reverse` — reverse the queue.
    Reverse,
    /// `sort` — sort ascending.
    Sort,
    /// `dedup` — delete adjacent-duplicate runs (queue must be sorted).
    Dedup,
    /// `dm` — delete the middle element.
    DeleteMiddle,
    /// `swap` — swap adjacent pairs.
    SwapPairs,
    /// `shuffle` — shuffle payloads.
    Shuffle,
    /// `size [n]` — compute the size `n` times and check it.
    Size { count: usize },
    /// `show` — print the queue contents.
    Show,
    /// `option name value` — set a runtime parameter.
    Param { name: String, value: i64 },
}

/// A rejected script line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{0} takes no arguments")]
    UnexpectedArguments(&'static str),
    #[error("{0} is missing an argument")]
    MissingArgument(&'static str),
    #[error("invalid count for {cmd}: {value}")]
    InvalidCount { cmd: &'static str, value: String },
    #[error("invalid value for option {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Parses one script line. `Ok(None)` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<Command>, ParseError> {
    let line = match line.find('#') {
        Some(at) => &line[..at],
        None => line,
    };
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let cmd = match name {
        "new" => no_args("new", &rest, Command::New)?,
        "free" => no_args("free", &rest, Command::Free)?,
        "ih" => insert("ih", &rest, true)?,
        "it" => insert("it", &rest, false)?,
        "rh" => Command::RemoveHead {
            expected: rest.first().map(|s| (*s).to_string()),
        },
        "rt" => Command::RemoveTail {
            expected: rest.first().map(|s| (*s).to_string()),
        },
        "rhq" => no_args("rhq", &rest, Command::RemoveHeadQuiet)?,
        "reverse" => no_args("reverse", &rest, Command::Reverse)?,
        "sort" => no_args("sort", &rest, Command::Sort)?,
        "dedup" => no_args("dedup", &rest, Command::Dedup)?,
        "dm" => no_args("dm", &rest, Command::DeleteMiddle)?,
        "swap" => no_args("swap", &rest, Command::SwapPairs)?,
        "shuffle" => no_args("shuffle", &rest, Command::Shuffle)?,
        "show" => no_args("show", &rest, Command::Show)?,
        "size" => Command::Size {
            count: parse_count("size", rest.first())?,
        },
        "option" => {
            let name = rest
                .first()
                .ok_or(ParseError::MissingArgument("option"))?
                .to_string();
            let raw = rest.get(1).ok_or(ParseError::MissingArgument("option"))?;
            let value = raw.parse::<i64>().map_err(|_| ParseError::InvalidValue {
                name: name.clone(),
                value: (*raw).to_string(),
            })?;
            Command::Param { name, value }
        }
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Some(cmd))
}

fn no_args(name: &'static str, rest: &[&str], cmd: Command) -> Result<Command, ParseError> {
    if rest.is_empty() {
        Ok(cmd)
    } else {
        Err(ParseError::UnexpectedArguments(name))
    }
}

fn insert(name: &'static str, rest: &[&str], at_head: bool) -> Result<Command, ParseError> {
    let text = rest
        .first()
        .ok_or(ParseError::MissingArgument(name))?
        .to_string();
    let count = parse_count(name, rest.get(1))?;
    Ok(if at_head {
        Command::InsertHead { text, count }
    } else {
        Command::InsertTail { text, count }
    })
}

fn parse_count(cmd: &'static str, word: Option<&&str>) -> Result<usize, ParseError> {
    match word {
        None => Ok(1),
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(ParseError::InvalidCount {
                cmd,
                value: (*raw).to_string(),
            }),
        },
    }
}
