use std::fmt;

use serde::Serialize;
use wordstats_types::{ChannelName, UserId};

use crate::ingest::UserResolver;
use crate::store::{StoreError, WordStatsDb};

const UNREGISTERED: &str = "unregistered user";

/// Arguments of a `wordstats` query. Which of `user` and `word` are present
/// selects one of four answers.
#[derive(Debug, Clone, Default)]
pub struct WordStatsQuery {
    pub user: Option<UserId>,
    pub word: Option<String>,
    /// Who is asking; their own rank is appended to word rankings.
    pub requester: Option<UserId>,
    /// Number of top users to show; falls back to the configured default.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedUser {
    pub user: u64,
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequesterRank {
    pub rank: usize,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WordStatsReport {
    TrackedWords {
        words: Vec<String>,
    },
    UserWord {
        user: u64,
        name: String,
        word: String,
        count: u64,
    },
    Ranking {
        word: String,
        total: u64,
        num_users: usize,
        top: Vec<RankedUser>,
        requester: Option<RequesterRank>,
    },
    UserBreakdown {
        user: u64,
        name: String,
        counts: Vec<(String, u64)>,
    },
}

pub fn run_query(
    db: &WordStatsDb,
    resolver: &dyn UserResolver,
    channel: &ChannelName,
    query: &WordStatsQuery,
    default_limit: usize,
) -> Result<WordStatsReport, StoreError> {
    let name_of = |user: UserId| {
        resolver
            .display_name(user)
            .unwrap_or_else(|| UNREGISTERED.to_string())
    };

    match (query.user, query.word.as_deref()) {
        (None, None) => Ok(WordStatsReport::TrackedWords {
            words: db.words(channel).iter().map(ToString::to_string).collect(),
        }),
        (Some(user), Some(word)) => {
            let count = db.word_count(channel, user, word)?;
            Ok(WordStatsReport::UserWord {
                user: user.0,
                name: name_of(user),
                word: word.to_string(),
                count,
            })
        }
        (None, Some(word)) => {
            let total = db
                .total_word_count(channel, word)
                .map_err(|_| StoreError::UnknownWord {
                    channel: channel.to_string(),
                    word: word.to_string(),
                })?;
            let limit = query.limit.unwrap_or(default_limit);
            let top: Vec<RankedUser> = db
                .top_users(channel, word, limit)
                .into_iter()
                .map(|(user, count)| RankedUser {
                    user: user.0,
                    name: name_of(user),
                    count,
                })
                .collect();
            let requester = query
                .requester
                .filter(|me| !top.iter().any(|r| r.user == me.0))
                .and_then(|me| db.rank_and_number(channel, me, word).ok())
                .map(|(rank, count)| RequesterRank { rank, count });
            Ok(WordStatsReport::Ranking {
                word: word.to_string(),
                total,
                num_users: db.num_users(channel),
                top,
                requester,
            })
        }
        (Some(user), None) => {
            let counts = db
                .user_word_counts(channel, user)?
                .into_iter()
                .map(|(word, count)| (word.to_string(), count))
                .collect();
            Ok(WordStatsReport::UserBreakdown {
                user: user.0,
                name: name_of(user),
                counts,
            })
        }
    }
}

fn times(n: u64) -> String {
    if n == 1 {
        "1 time".to_string()
    } else {
        format!("{n} times")
    }
}

/// Renders the chat reply for a report.
impl fmt::Display for WordStatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordStatsReport::TrackedWords { words } if words.is_empty() => {
                f.write_str("I am not currently keeping any word stats.")
            }
            WordStatsReport::TrackedWords { words } => {
                write!(f, "I am currently keeping stats for {}.", words.join(", "))
            }
            WordStatsReport::UserWord {
                name, word, count, ..
            } => {
                if *count == 0 {
                    write!(f, "{name} has never said {word:?}.")
                } else {
                    write!(f, "{name} has said {word:?} {}.", times(*count))
                }
            }
            WordStatsReport::Ranking { word, total: 0, .. } => write!(
                f,
                "I'm keeping stats on {word:?}, but I haven't seen it in this channel."
            ),
            WordStatsReport::Ranking {
                word,
                total,
                num_users,
                top,
                requester,
            } => {
                let shown: Vec<String> = top
                    .iter()
                    .map(|r| format!("{}: {}", r.name, r.count))
                    .collect();
                write!(
                    f,
                    "Top {} {word}ers (out of a total of {total} {word:?} seen): {}.",
                    top.len(),
                    shown.join(", ")
                )?;
                if let Some(me) = requester {
                    write!(
                        f,
                        "  You are ranked {} out of {num_users} with {}.",
                        me.rank,
                        times(me.count)
                    )?;
                }
                Ok(())
            }
            WordStatsReport::UserBreakdown { name, counts, .. } if counts.is_empty() => {
                write!(f, "I have no word stats for {name}.")
            }
            WordStatsReport::UserBreakdown { counts, .. } => {
                let parts: Vec<String> = counts
                    .iter()
                    .map(|(word, count)| format!("{word:?}: {count}"))
                    .collect();
                f.write_str(&parts.join(", "))
            }
        }
    }
}
