//! Operator commands

use anyhow::{anyhow, bail};

const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print `error` records, newest first
    ListFailed { limit: i64 },
    /// Re-run one event from Stripe's copy
    Replay { event_id: String },
    /// Re-run up to `max` failed events, oldest first
    ReplayFailed { max: Option<i64> },
}

pub const USAGE: &str = "\
usage: blogstandard-worker <command>

commands:
  list-failed [limit]      list failed webhook events (default 50)
  replay <evt_id>          replay one webhook event from Stripe
  replay-failed [max]      replay failed webhook events (default 100)";

impl Command {
    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("missing command"))?;

        match (name.as_str(), rest) {
            ("list-failed", []) => Ok(Command::ListFailed {
                limit: DEFAULT_LIST_LIMIT,
            }),
            ("list-failed", [limit]) => Ok(Command::ListFailed {
                limit: parse_positive(limit, "limit")?,
            }),
            ("replay", [event_id]) => Ok(Command::Replay {
                event_id: event_id.clone(),
            }),
            ("replay-failed", []) => Ok(Command::ReplayFailed { max: None }),
            ("replay-failed", [max]) => Ok(Command::ReplayFailed {
                max: Some(parse_positive(max, "max")?),
            }),
            (other, _) => bail!("unrecognized arguments for {:?}", other),
        }
    }
}

fn parse_positive(raw: &str, name: &str) -> anyhow::Result<i64> {
    match raw.parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("{} must be a positive integer, got {:?}", name, raw),
    }
}
