use std::collections::{HashMap, HashSet};
use std::env::vars;

/// UIDs that ordinary allocation must never hand out. Culturally or
/// aesthetically significant numbers reserved for manual assignment.
pub const RESERVED_UIDS: &[i32] = &[
    1, 2, 3, 5, 7, 8, 10, 13, 17, 21, 22, 23, 25, 34, 42, 50, 53, 55, 69, 80, 89, 112, 144, 187,
    233, 255, 311, 360, 377, 420, 443, 451, 500, 511, 610, 666, 777, 911, 987, 999, 1000, 1024,
    1234, 1337, 1492, 1597, 1711, 1776, 1789, 1811, 1914, 1917, 1941, 1945, 1961, 1969, 2584,
    3276, 3306, 4096, 4181, 5000, 5318, 5432, 6765, 6969, 8008, 9110, 9999, 10000, 10946, 11111,
    17711, 21845, 28657, 32768, 46368, 50000, 65535, 75025, 99999,
];

/// Runtime settings, read once from environment variables at startup and
/// passed into handlers by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub admin_ids: Vec<i64>,

    pub min_uid: i32,
    pub max_uid: i32,
    pub reserved_uids: HashSet<i32>,

    pub max_catalog_number: i32,
    pub catalog_slots: usize,
    pub max_priority_posts: u64,
    pub backfill_promoted_slot: bool,

    pub min_vote: i32,
    pub max_vote: i32,
    pub max_about_words: usize,
    pub max_word_length: usize,

    pub cooldowns: HashMap<String, i64>,
    pub default_cooldown: i64,
}

impl Config {
    pub fn from_env() -> Self {
        let vars: HashMap<_, _> = vars().collect();

        let mut cooldowns = HashMap::new();
        cooldowns.insert(
            "gorateme".to_string(),
            env_i64(&vars, "GORATEME_COOLDOWN", 10800),
        );
        cooldowns.insert("review".to_string(), env_i64(&vars, "REVIEW_COOLDOWN", 3600));

        Self {
            admin_ids: parse_id_list(vars.get("ADMIN_IDS").map(String::as_str).unwrap_or("")),
            min_uid: env_i32(&vars, "MIN_UID", 1),
            max_uid: env_i32(&vars, "MAX_UID", 99999),
            reserved_uids: RESERVED_UIDS.iter().copied().collect(),
            max_catalog_number: env_i32(&vars, "MAX_CATALOG_NUMBER", 9999),
            catalog_slots: env_i32(&vars, "CATALOG_SLOTS", 5) as usize,
            max_priority_posts: env_i32(&vars, "MAX_PRIORITY_POSTS", 10) as u64,
            backfill_promoted_slot: vars
                .get("BACKFILL_PROMOTED_SLOT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            min_vote: env_i32(&vars, "MIN_VOTE", -2),
            max_vote: env_i32(&vars, "MAX_VOTE", 2),
            max_about_words: env_i32(&vars, "MAX_ABOUT_WORDS", 3) as usize,
            max_word_length: env_i32(&vars, "MAX_WORD_LENGTH", 7) as usize,
            cooldowns,
            default_cooldown: env_i64(&vars, "DEFAULT_COOLDOWN", 3600),
        }
    }

    /// Fixed settings matching the production defaults, for unit tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let mut cooldowns = HashMap::new();
        cooldowns.insert("gorateme".to_string(), 10800);
        cooldowns.insert("review".to_string(), 3600);
        Self {
            admin_ids: vec![42],
            min_uid: 1,
            max_uid: 99999,
            reserved_uids: RESERVED_UIDS.iter().copied().collect(),
            max_catalog_number: 9999,
            catalog_slots: 5,
            max_priority_posts: 10,
            backfill_promoted_slot: false,
            min_vote: -2,
            max_vote: 2,
            max_about_words: 3,
            max_word_length: 7,
            cooldowns,
            default_cooldown: 3600,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn is_reserved_uid(&self, uid: i32) -> bool {
        self.reserved_uids.contains(&uid)
    }

    /// Cooldown duration in seconds for a command, with a fallback for
    /// commands that have no explicit entry.
    pub fn cooldown_for(&self, command: &str) -> i64 {
        self.cooldowns
            .get(command)
            .copied()
            .unwrap_or(self.default_cooldown)
    }
}

fn env_i32(vars: &HashMap<String, String>, key: &str, default: i32) -> i32 {
    vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(vars: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_uids_are_flagged() {
        let config = Config::for_tests();
        assert!(config.is_reserved_uid(1337));
        assert!(config.is_reserved_uid(99999));
        assert!(!config.is_reserved_uid(4));
    }

    #[test]
    fn cooldown_lookup_falls_back_to_default() {
        let config = Config::for_tests();
        assert_eq!(config.cooldown_for("gorateme"), 10800);
        assert_eq!(config.cooldown_for("review"), 3600);
        assert_eq!(config.cooldown_for("somethingelse"), 3600);
    }

    #[test]
    fn admin_id_list_parses_with_whitespace_and_junk() {
        assert_eq!(parse_id_list("1, 2,3"), vec![1, 2, 3]);
        assert_eq!(parse_id_list(""), Vec::<i64>::new());
        assert_eq!(parse_id_list("7,abc, 9"), vec![7, 9]);
    }
}
