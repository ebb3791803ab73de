/// Common test fixtures and data structures
use dynamo_gateway::{CompositeKey, Entity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Table every in-memory suite uses
pub const TABLE: &str = "GameScores";

/// High score of one user in one game
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct GameScore {
    pub user_id: String,
    pub game_title: String,
    #[serde(default)]
    pub top_score: i64,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub info: BTreeMap<String, i64>,
}

impl Entity for GameScore {
    type PK = String;
    type SK = String;
    const PARTITION_KEY: &'static str = "user_id";
    const SORT_KEY: Option<&'static str> = Some("game_title");

    fn partition_key(&self) -> String {
        self.user_id.clone()
    }

    fn sort_key(&self) -> Option<String> {
        Some(self.game_title.clone())
    }
}

pub fn score(user_id: &str, game_title: &str, top_score: i64) -> GameScore {
    GameScore {
        user_id: user_id.to_string(),
        game_title: game_title.to_string(),
        top_score,
        wins: 0,
        info: BTreeMap::new(),
    }
}

pub fn key(user_id: &str, game_title: &str) -> CompositeKey<String, String> {
    (user_id.to_string(), Some(game_title.to_string()))
}
