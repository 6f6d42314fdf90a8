use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::debug;
use wordstats_types::{ChannelName, InvalidWord, UserId, Word, is_channel, tokenize};

use crate::persist::Record;

/// Per-user word counts, keyed by user id so iteration order is stable.
type ChannelUsers = BTreeMap<UserId, BTreeMap<Word, u64>>;

/// In-memory word statistics for every channel.
///
/// Three tables are kept in step: the tracked words of each channel with their
/// channel-wide totals, and the per-(channel, user) counts. For every tracked
/// word the channel total equals the sum of the per-user counts; each
/// mutating method either applies completely or leaves both tables untouched.
#[derive(Debug, Default, Clone)]
pub struct WordStatsDb {
    totals: HashMap<ChannelName, BTreeMap<Word, u64>>,
    users: HashMap<ChannelName, ChannelUsers>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    InvalidWord(#[from] InvalidWord),
    #[error("{0:?} is not a valid channel name")]
    InvalidChannel(String),
    #[error("{word:?} is not a word being tracked in {channel}")]
    UnknownWord { channel: String, word: String },
    #[error("{0}")]
    NotFound(String),
    #[error("user {user} is not ranked for {word:?}")]
    NotRanked { user: UserId, word: String },
    #[error("count for {word:?} would overflow")]
    Overflow { word: String },
}

impl WordStatsDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the store from persisted per-user records.
    ///
    /// Channel totals are not persisted; they are summed here from the records
    /// so the total/per-user invariant holds as soon as loading finishes.
    pub fn from_records<I>(records: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut db = Self::new();
        for record in records {
            if !is_channel(&record.channel) {
                return Err(StoreError::InvalidChannel(record.channel));
            }
            let channel = ChannelName::new(&record.channel);
            let totals = db.totals.entry(channel.clone()).or_default();
            let counts = db
                .users
                .entry(channel)
                .or_default()
                .entry(record.user)
                .or_default();
            for (word, count) in record.counts {
                let total = totals.entry(word.clone()).or_insert(0);
                *total = total
                    .checked_add(count)
                    .ok_or_else(|| StoreError::Overflow {
                        word: word.to_string(),
                    })?;
                let slot = counts.entry(word.clone()).or_insert(0);
                *slot = slot.checked_add(count).ok_or_else(|| StoreError::Overflow {
                    word: word.to_string(),
                })?;
            }
        }
        Ok(db)
    }

    /// Every (channel, user) entry as a record, sorted by channel then user.
    pub fn records(&self) -> Vec<Record> {
        let mut channels: Vec<&ChannelName> = self.users.keys().collect();
        channels.sort();
        let mut out = Vec::new();
        for channel in channels {
            for (user, counts) in &self.users[channel] {
                out.push(Record {
                    channel: channel.as_str().to_string(),
                    user: *user,
                    counts: counts.iter().map(|(w, c)| (w.clone(), *c)).collect(),
                });
            }
        }
        out
    }

    /// Start tracking `word` in `channel`.
    ///
    /// Re-adding a tracked word resets its total and every per-user count to
    /// zero. Existing user entries get a zero count for the word.
    pub fn add_word(&mut self, channel: &ChannelName, word: &str) -> Result<(), StoreError> {
        if !is_channel(channel.as_str()) {
            return Err(StoreError::InvalidChannel(channel.to_string()));
        }
        let word = Word::parse(word)?;
        let totals = self.totals.entry(channel.clone()).or_default();
        // Replace the key so the latest spelling is the one displayed.
        totals.remove(&word);
        totals.insert(word.clone(), 0);
        if let Some(users) = self.users.get_mut(channel) {
            for counts in users.values_mut() {
                counts.remove(&word);
                counts.insert(word.clone(), 0);
            }
        }
        debug!(%channel, %word, "tracking word");
        Ok(())
    }

    /// Stop tracking `word` in `channel`, dropping its total and user counts.
    pub fn remove_word(&mut self, channel: &ChannelName, word: &str) -> Result<(), StoreError> {
        let unknown = || StoreError::UnknownWord {
            channel: channel.to_string(),
            word: word.to_string(),
        };
        let word = Word::parse(word).map_err(|_| unknown())?;
        let totals = self.totals.get_mut(channel).ok_or_else(unknown)?;
        if totals.remove(&word).is_none() {
            return Err(unknown());
        }
        if let Some(users) = self.users.get_mut(channel) {
            for counts in users.values_mut() {
                counts.remove(&word);
            }
        }
        debug!(%channel, %word, "stopped tracking word");
        Ok(())
    }

    /// Count tracked words in one message from `user`.
    ///
    /// Returns the number of tracked-word occurrences recorded. Increments are
    /// computed and overflow-checked before either table is written.
    pub fn record_message(
        &mut self,
        channel: &ChannelName,
        user: UserId,
        text: &str,
    ) -> Result<u64, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        let Some(totals) = self.totals.get(channel) else {
            return Ok(0);
        };
        if totals.is_empty() {
            return Ok(0);
        }

        let tokens: Vec<String> = tokenize(text).collect();
        let existing = self.users.get(channel).and_then(|users| users.get(&user));
        let mut increments: Vec<(Word, u64)> = Vec::new();
        for (word, total) in totals {
            let hits = tokens.iter().filter(|t| word.matches(t)).count() as u64;
            if hits == 0 {
                continue;
            }
            let user_count = existing
                .and_then(|counts| counts.get(word))
                .copied()
                .unwrap_or(0);
            if total.checked_add(hits).is_none() || user_count.checked_add(hits).is_none() {
                return Err(StoreError::Overflow {
                    word: word.to_string(),
                });
            }
            increments.push((word.clone(), hits));
        }
        if increments.is_empty() {
            return Ok(0);
        }

        let totals = self.totals.entry(channel.clone()).or_default();
        let counts = self
            .users
            .entry(channel.clone())
            .or_default()
            .entry(user)
            .or_default();
        let mut recorded = 0;
        for (word, hits) in increments {
            *totals.entry(word.clone()).or_insert(0) += hits;
            *counts.entry(word).or_insert(0) += hits;
            recorded += hits;
        }
        debug!(%channel, %user, recorded, "recorded tracked words");
        Ok(recorded)
    }

    pub fn word_count(
        &self,
        channel: &ChannelName,
        user: UserId,
        word: &str,
    ) -> Result<u64, StoreError> {
        let counts = self.user_entry(channel, user)?;
        Word::parse(word)
            .ok()
            .and_then(|w| counts.get(&w).copied())
            .ok_or_else(|| {
                StoreError::NotFound(format!("user {user} has no count for {word:?} in {channel}"))
            })
    }

    /// All of a user's counts in `channel`, sorted by word.
    pub fn user_word_counts(
        &self,
        channel: &ChannelName,
        user: UserId,
    ) -> Result<Vec<(Word, u64)>, StoreError> {
        let counts = self.user_entry(channel, user)?;
        Ok(counts.iter().map(|(w, c)| (w.clone(), *c)).collect())
    }

    /// Tracked words of `channel` in lexicographic order.
    pub fn words(&self, channel: &ChannelName) -> Vec<Word> {
        self.totals
            .get(channel)
            .map(|totals| totals.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_word_count(&self, channel: &ChannelName, word: &str) -> Result<u64, StoreError> {
        Word::parse(word)
            .ok()
            .and_then(|w| self.totals.get(channel)?.get(&w).copied())
            .ok_or_else(|| StoreError::NotFound(format!("{word:?} is not tracked in {channel}")))
    }

    /// Number of distinct users with an entry in `channel`.
    pub fn num_users(&self, channel: &ChannelName) -> usize {
        self.users.get(channel).map_or(0, BTreeMap::len)
    }

    /// `(user, count)` for every user holding an entry for `word`, by user id.
    pub(crate) fn counts_for_word<'a>(
        &'a self,
        channel: &ChannelName,
        word: &'a Word,
    ) -> impl Iterator<Item = (UserId, u64)> + use<'a> {
        self.users
            .get(channel)
            .into_iter()
            .flat_map(move |users| {
                users
                    .iter()
                    .filter_map(move |(user, counts)| counts.get(word).map(|c| (*user, *c)))
            })
    }

    fn user_entry(
        &self,
        channel: &ChannelName,
        user: UserId,
    ) -> Result<&BTreeMap<Word, u64>, StoreError> {
        self.users
            .get(channel)
            .and_then(|users| users.get(&user))
            .ok_or_else(|| {
                StoreError::NotFound(format!("no word stats for user {user} in {channel}"))
            })
    }
}

/// Store handle shared between the ingestion worker and query callers.
///
/// One writer at a time mutates all tables under the write lock; any number
/// of readers may query concurrently.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<WordStatsDb>>,
}

impl SharedStore {
    pub fn new(db: WordStatsDb) -> Self {
        Self {
            inner: Arc::new(RwLock::new(db)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, WordStatsDb> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, WordStatsDb> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
