//! Command line surface and process exit signals.

use chrono::NaiveDate;
use outcome_core::{OutcomeError, PipelineStage};
use serde::Serialize;

pub const USAGE: &str = "usage: outcome-cli [-v|--verbose] <command>

commands:
  today                                 resolve yesterday and run today
  all-time                              backfill every window with match results
  status                                last completed stage per window
  stage <name> [--window YYYY-MM-DD]    run one stage (ingested, featurized,
                                        predicted, calibrated, validated,
                                        aggregated, published)
  correct <match_id> <home>:<away> --reason <text>
                                        replace a stored target and
                                        re-validate the match";

/// Options that consume the following argument
const VALUE_FLAGS: [&str; 2] = ["--window", "--reason"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Yesterday's outcome resolution, then today's window
    Today,
    AllTime,
    Status,
    Stage {
        stage: PipelineStage,
        window: NaiveDate,
    },
    /// Administrative score correction
    Correct {
        match_id: i64,
        home_goals: i32,
        away_goals: i32,
        reason: String,
    },
}

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub verbose: bool,
}

impl Invocation {
    /// Parse arguments without the program name. `today` is the default
    /// window of a stage command.
    pub fn parse<S: AsRef<str>>(args: &[S], today: NaiveDate) -> Result<Self, OutcomeError> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let verbose = args.iter().any(|a| *a == "-v" || *a == "--verbose");

        let window = match flag_value(&args, "--window")? {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                OutcomeError::Config(format!("invalid --window date '{}'", raw))
            })?,
            None => today,
        };
        let reason = flag_value(&args, "--reason")?;

        let positional: Vec<&str> = args
            .iter()
            .enumerate()
            .filter(|(i, a)| {
                !a.starts_with('-')
                    && !(*i > 0 && VALUE_FLAGS.contains(&args[*i - 1]))
            })
            .map(|(_, a)| *a)
            .collect();

        let command = match positional.as_slice() {
            ["today"] => Command::Today,
            ["all-time"] | ["all_time"] => Command::AllTime,
            ["status"] => Command::Status,
            ["stage", name] => Command::Stage {
                stage: name.parse()?,
                window,
            },
            ["stage"] => {
                return Err(OutcomeError::Config("stage needs a stage name".to_string()))
            }
            ["correct", match_id, score] => {
                let match_id = match_id.parse().map_err(|_| {
                    OutcomeError::Config(format!("invalid match id '{}'", match_id))
                })?;
                let (home_goals, away_goals) = parse_score(score)?;
                let reason = reason.ok_or_else(|| {
                    OutcomeError::Config("correct needs --reason".to_string())
                })?;
                Command::Correct {
                    match_id,
                    home_goals,
                    away_goals,
                    reason: reason.to_string(),
                }
            }
            ["correct", ..] => {
                return Err(OutcomeError::Config(
                    "correct needs a match id and a score (home:away)".to_string(),
                ))
            }
            [] => return Err(OutcomeError::Config("no command given".to_string())),
            other => {
                return Err(OutcomeError::Config(format!(
                    "unknown command '{}'",
                    other.join(" ")
                )))
            }
        };

        Ok(Self { command, verbose })
    }
}

fn flag_value<'a>(args: &[&'a str], flag: &str) -> Result<Option<&'a str>, OutcomeError> {
    match args.iter().position(|a| *a == flag) {
        Some(idx) => args
            .get(idx + 1)
            .copied()
            .map(Some)
            .ok_or_else(|| OutcomeError::Config(format!("{} needs a value", flag))),
        None => Ok(None),
    }
}

/// `home:away`, both non-negative
fn parse_score(raw: &str) -> Result<(i32, i32), OutcomeError> {
    let invalid = || OutcomeError::Config(format!("invalid score '{}', expected home:away", raw));
    let (home, away) = raw.split_once(':').ok_or_else(invalid)?;
    let home: i32 = home.trim().parse().map_err(|_| invalid())?;
    let away: i32 = away.trim().parse().map_err(|_| invalid())?;
    if home < 0 || away < 0 {
        return Err(invalid());
    }
    Ok((home, away))
}

/// How a run ended, as seen by the calling scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitSignal {
    Success,
    /// Some work is left over; re-running the same command can finish it
    Partial,
    Fatal,
}

impl ExitSignal {
    pub fn code(self) -> i32 {
        match self {
            ExitSignal::Success => 0,
            ExitSignal::Partial => 75,
            ExitSignal::Fatal => 1,
        }
    }
}
