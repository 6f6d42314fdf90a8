use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;
use wordstats_types::{ChannelName, UserId, irc_fold, is_channel};

use crate::store::{SharedStore, StoreError};

/// Maps raw sender identities (`nick!user@host`) to registered users.
pub trait UserResolver: Send + Sync {
    fn resolve(&self, sender: &str) -> Option<UserId>;
    fn display_name(&self, user: UserId) -> Option<String>;
}

/// In-memory user registry keyed by folded hostmask.
#[derive(Debug, Default)]
pub struct UserRegistry {
    hostmasks: DashMap<String, UserId>,
    names: DashMap<UserId, String>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or rename) `user` and attach the given hostmasks to it.
    pub fn register<I, S>(&self, user: UserId, name: &str, hostmasks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.names.insert(user, name.to_string());
        for mask in hostmasks {
            self.hostmasks.insert(irc_fold(mask.as_ref()), user);
        }
    }
}

impl UserResolver for UserRegistry {
    fn resolve(&self, sender: &str) -> Option<UserId> {
        self.hostmasks.get(&irc_fold(sender)).map(|entry| *entry)
    }

    fn display_name(&self, user: UserId) -> Option<String> {
        self.names.get(&user).map(|entry| entry.clone())
    }
}

/// One message as delivered by the chat host.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender: String,
    pub text: String,
    /// Set by the host when the message was a command addressed to the bot.
    #[serde(default)]
    pub is_command: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Counted; carries the number of tracked-word occurrences.
    Recorded(u64),
    NotChannel,
    Unregistered,
    IgnoredQuery,
}

/// Feeds inbound messages into the store.
#[derive(Clone)]
pub struct Ingestor {
    store: SharedStore,
    resolver: Arc<dyn UserResolver>,
    ignore_queries: bool,
}

impl Ingestor {
    pub fn new(store: SharedStore, resolver: Arc<dyn UserResolver>, ignore_queries: bool) -> Self {
        Self {
            store,
            resolver,
            ignore_queries,
        }
    }

    /// Unregistered senders and non-channel targets are dropped, not errors.
    pub fn ingest(&self, msg: &InboundMessage) -> Result<Outcome, StoreError> {
        if !is_channel(&msg.channel) {
            return Ok(Outcome::NotChannel);
        }
        if msg.is_command && self.ignore_queries {
            debug!(channel = %msg.channel, "queried and ignoring");
            return Ok(Outcome::IgnoredQuery);
        }
        let Some(user) = self.resolver.resolve(&msg.sender) else {
            debug!(sender = %msg.sender, "dropping message from unregistered sender");
            return Ok(Outcome::Unregistered);
        };
        let channel = ChannelName::new(&msg.channel);
        let recorded = self.store.write().record_message(&channel, user, &msg.text)?;
        Ok(Outcome::Recorded(recorded))
    }
}
