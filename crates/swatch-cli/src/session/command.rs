//! Session command parsing.

use std::str::FromStr;

use anyhow::{anyhow, bail};
use swatch_variant::UsedId;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Next unseen variant, with identifiers the user has already seen.
    Next(Vec<UsedId>),
    /// Wait for one specific slot.
    Slot(u32),
    /// Start a new job from the same image.
    Fresh,
    /// List the slots shown so far.
    Served,
    /// List commands.
    Help,
    /// End the session.
    Quit,
}

impl Command {
    pub const HELP: &'static str = "\
commands:
  next [used ids...]   next unseen variant, e.g. `next 1 r3 4`
  slot <index>         wait for one specific slot
  fresh                start a new job from the same image
  served               list the slots shown so far
  help                 show this help
  quit                 wait for background calls and exit";
}

fn used_id(token: &str) -> UsedId {
    token
        .parse::<i64>()
        .map_or_else(|_| UsedId::from(token), UsedId::Index)
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            bail!("empty command");
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "next" | "n" => Self::Next(words.by_ref().map(used_id).collect()),
            "slot" | "s" => {
                let index = words
                    .next()
                    .ok_or_else(|| anyhow!("`slot` needs an index"))?;
                let index = index
                    .parse()
                    .map_err(|_| anyhow!("`{index}` is not a slot index"))?;
                Self::Slot(index)
            }
            "fresh" | "f" => Self::Fresh,
            "served" => Self::Served,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => bail!("unknown command `{other}`, type `help` for a list"),
        };

        if let Some(extra) = words.next() {
            bail!("unexpected argument `{extra}`");
        }

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_with_mixed_used_ids() -> anyhow::Result<()> {
        let command: Command = "next 1 r3 4".parse()?;
        assert_eq!(
            command,
            Command::Next(vec![
                UsedId::Index(1),
                UsedId::from("r3"),
                UsedId::Index(4)
            ])
        );
        Ok(())
    }

    #[test]
    fn test_slot_requires_number() {
        assert!("slot".parse::<Command>().is_err());
        assert!("slot abc".parse::<Command>().is_err());
        assert!(matches!("SLOT 2".parse::<Command>(), Ok(Command::Slot(2))));
    }

    #[test]
    fn test_rejects_trailing_arguments() {
        assert!("fresh now".parse::<Command>().is_err());
        assert!("quit".parse::<Command>().is_ok());
    }

    #[test]
    fn test_unknown_command() {
        assert!("dance".parse::<Command>().is_err());
        assert!("   ".parse::<Command>().is_err());
    }
}
