use std::cmp::Reverse;

use wordstats_types::{ChannelName, UserId, Word};

use crate::store::{StoreError, WordStatsDb};

impl WordStatsDb {
    /// Users who have said `word` in `channel`, most frequent first.
    ///
    /// Equal counts are ordered by ascending user id. Users whose count is
    /// zero are not ranked. `n == 0` returns the full ranking, otherwise at
    /// most `n` entries.
    pub fn top_users(&self, channel: &ChannelName, word: &str, n: usize) -> Vec<(UserId, u64)> {
        let Ok(word) = Word::parse(word) else {
            return Vec::new();
        };
        let mut ranking = self.ranked(channel, &word);
        ranking.retain(|&(_, count)| count > 0);
        if n > 0 {
            ranking.truncate(n);
        }
        ranking
    }

    /// 1-based rank of `user` for `word`, with the user's count.
    ///
    /// Every user holding an entry for the word is ranked, including those
    /// at zero, who place after everyone with a non-zero count.
    pub fn rank_and_number(
        &self,
        channel: &ChannelName,
        user: UserId,
        word: &str,
    ) -> Result<(usize, u64), StoreError> {
        let not_ranked = || StoreError::NotRanked {
            user,
            word: word.to_string(),
        };
        let parsed = Word::parse(word).map_err(|_| not_ranked())?;
        self.ranked(channel, &parsed)
            .into_iter()
            .enumerate()
            .find(|(_, (ranked, _))| *ranked == user)
            .map(|(idx, (_, count))| (idx + 1, count))
            .ok_or_else(not_ranked)
    }

    /// Every entry for `word`, ordered by descending count then user id.
    fn ranked(&self, channel: &ChannelName, word: &Word) -> Vec<(UserId, u64)> {
        let mut ranking: Vec<(UserId, u64)> = self.counts_for_word(channel, word).collect();
        ranking.sort_by_key(|&(user, count)| (Reverse(count), user));
        ranking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab() -> ChannelName {
        ChannelName::new("#lab")
    }

    fn pizza_lab() -> WordStatsDb {
        let mut db = WordStatsDb::new();
        db.add_word(&lab(), "pizza").unwrap();
        db.record_message(&lab(), UserId(1), "I love PIZZA!!").unwrap();
        db.record_message(&lab(), UserId(2), "pizza pizza").unwrap();
        db
    }

    #[test]
    fn ranks_users_by_count() {
        let db = pizza_lab();
        assert_eq!(db.total_word_count(&lab(), "pizza").unwrap(), 3);
        assert_eq!(db.top_users(&lab(), "pizza", 1), [(UserId(2), 2)]);
        assert_eq!(
            db.top_users(&lab(), "pizza", 0),
            [(UserId(2), 2), (UserId(1), 1)]
        );
        assert_eq!(db.rank_and_number(&lab(), UserId(1), "pizza").unwrap(), (2, 1));
        assert_eq!(db.rank_and_number(&lab(), UserId(2), "PIZZA").unwrap(), (1, 2));
    }

    #[test]
    fn n_larger_than_ranking_returns_everyone() {
        let db = pizza_lab();
        assert_eq!(db.top_users(&lab(), "pizza", 10).len(), 2);
    }

    #[test]
    fn ties_break_by_user_id() {
        let mut db = WordStatsDb::new();
        db.add_word(&lab(), "soup").unwrap();
        for user in [9, 4, 7] {
            db.record_message(&lab(), UserId(user), "soup").unwrap();
        }
        db.record_message(&lab(), UserId(5), "soup soup").unwrap();
        assert_eq!(
            db.top_users(&lab(), "soup", 0),
            [(UserId(5), 2), (UserId(4), 1), (UserId(7), 1), (UserId(9), 1)]
        );
    }

    #[test]
    fn zero_counts_rank_last_but_are_not_listed() {
        let mut db = pizza_lab();
        db.add_word(&lab(), "soup").unwrap();
        db.record_message(&lab(), UserId(3), "soup").unwrap();
        // Users 1 and 2 were backfilled with zero.
        assert_eq!(db.word_count(&lab(), UserId(1), "soup").unwrap(), 0);
        assert_eq!(db.top_users(&lab(), "soup", 0), [(UserId(3), 1)]);
        assert_eq!(db.rank_and_number(&lab(), UserId(3), "soup").unwrap(), (1, 1));
        assert_eq!(db.rank_and_number(&lab(), UserId(1), "soup").unwrap(), (2, 0));
        assert_eq!(db.rank_and_number(&lab(), UserId(2), "soup").unwrap(), (3, 0));
    }

    #[test]
    fn readded_word_ranks_everyone_at_zero() {
        let mut db = pizza_lab();
        db.add_word(&lab(), "pizza").unwrap();
        assert!(db.top_users(&lab(), "pizza", 0).is_empty());
        assert_eq!(db.rank_and_number(&lab(), UserId(1), "pizza").unwrap(), (1, 0));
        assert_eq!(db.rank_and_number(&lab(), UserId(2), "pizza").unwrap(), (2, 0));
    }

    #[test]
    fn unknown_words_and_users_are_not_ranked() {
        let db = pizza_lab();
        assert!(db.top_users(&lab(), "soup", 0).is_empty());
        assert!(db.top_users(&ChannelName::new("#other"), "pizza", 0).is_empty());
        assert!(matches!(
            db.rank_and_number(&lab(), UserId(42), "pizza"),
            Err(StoreError::NotRanked { .. })
        ));
    }

    #[test]
    fn rankings_are_sorted_descending() {
        let mut db = WordStatsDb::new();
        db.add_word(&lab(), "pizza").unwrap();
        for user in 0..20u64 {
            let line = "pizza ".repeat((user * 7 % 5 + 1) as usize);
            db.record_message(&lab(), UserId(user), &line).unwrap();
        }
        for n in [0, 1, 3, 20, 50] {
            let ranking = db.top_users(&lab(), "pizza", n);
            assert!(ranking.windows(2).all(|w| w[0].1 >= w[1].1));
        }
        assert_eq!(db.top_users(&lab(), "pizza", 0).len(), 20);
    }
}
