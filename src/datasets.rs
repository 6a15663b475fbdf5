use std::fmt;

use crate::parser::clean::Rule;
use crate::value::FieldType;

const BASE_URL: &str = "https://www.esportsearnings.com";

/// How many raw columns a source table must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCount {
    Exact(usize),
    /// Trailing columns past `n` are ignored.
    AtLeast(usize),
}

impl ColumnCount {
    pub fn accepts(self, actual: usize) -> bool {
        match self {
            ColumnCount::Exact(n) => actual == n,
            ColumnCount::AtLeast(n) => actual >= n,
        }
    }
}

impl fmt::Display for ColumnCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnCount::Exact(n) => write!(f, "{}", n),
            ColumnCount::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

/// A canonical field and the raw column it is read from.
#[derive(Debug, Clone)]
pub struct Field {
    pub position: usize,
    pub name: &'static str,
    pub ty: FieldType,
    pub rule: Rule,
}

const fn field(position: usize, name: &'static str, ty: FieldType, rule: Rule) -> Field {
    Field { position, name, ty, rule }
}

#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub name: &'static str,
    pub relation: &'static str,
    pub locators: Vec<String>,
    pub columns: ColumnCount,
    pub fields: Vec<Field>,
}

impl DatasetSpec {
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    #[cfg(test)]
    pub fn with_locators(mut self, locators: Vec<String>) -> Self {
        self.locators = locators;
        self
    }
}

/// All scraped datasets in run order.
pub fn all() -> Vec<DatasetSpec> {
    vec![countries(), players(), tournaments(), teams()]
}

pub fn by_name(name: &str) -> Option<DatasetSpec> {
    all().into_iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

pub fn countries() -> DatasetSpec {
    use FieldType::*;
    DatasetSpec {
        name: "countries",
        relation: "countries",
        locators: vec![format!("{}/countries", BASE_URL)],
        // rank, country, total, players, top game, game total, game share
        columns: ColumnCount::Exact(7),
        fields: vec![
            field(1, "name", Text, Rule::Identity),
            field(2, "total_earnings", Integer, Rule::Currency),
            field(3, "num_players", Integer, Rule::UnitCount("Player")),
            field(4, "top_game", Text, Rule::Identity),
            field(5, "game_earnings", Integer, Rule::Currency),
            field(6, "game_percent", Real, Rule::Percentage),
        ],
    }
}

pub fn players() -> DatasetSpec {
    use FieldType::*;
    let locators = (0..=1000)
        .step_by(100)
        .map(|i| match i {
            0 => format!("{}/players/highest-earnings", BASE_URL),
            n => format!("{}/players/highest-earnings-top-{}", BASE_URL, n),
        })
        .collect();
    DatasetSpec {
        name: "players",
        relation: "players",
        locators,
        // rank, id, name, total, top game, game total, game share
        columns: ColumnCount::Exact(7),
        fields: vec![
            field(1, "player_id", Text, Rule::Identity),
            field(2, "player_name", Text, Rule::Identity),
            field(3, "total_earnings", Integer, Rule::Currency),
            field(4, "main_game", Text, Rule::Identity),
            field(6, "earnings_percent", Real, Rule::Percentage),
        ],
    }
}

pub fn tournaments() -> DatasetSpec {
    use FieldType::*;
    let locators = (0..500)
        .step_by(100)
        .map(|i| match i {
            0 => format!("{}/tournaments/largest-overall-prize-pools", BASE_URL),
            n => format!("{}/tournaments/largest-overall-prize-pools-x{}", BASE_URL, n),
        })
        .collect();
    DatasetSpec {
        name: "tournaments",
        relation: "tournaments",
        locators,
        // rank, tournament, prize pool, game, then per-page extras
        columns: ColumnCount::AtLeast(4),
        fields: vec![
            field(1, "tournament_name", Text, Rule::Identity),
            field(2, "prize_pool", Integer, Rule::Currency),
            field(3, "game", Text, Rule::Identity),
        ],
    }
}

pub fn teams() -> DatasetSpec {
    use FieldType::*;
    let locators = (0..500)
        .step_by(100)
        .map(|i| match i {
            0 => format!("{}/teams/highest-overall", BASE_URL),
            n => format!("{}/teams/highest-overall-x{}", BASE_URL, n),
        })
        .collect();
    DatasetSpec {
        name: "teams",
        relation: "teams",
        locators,
        // rank, team, total, tournaments
        columns: ColumnCount::Exact(4),
        fields: vec![
            field(1, "team_name", Text, Rule::Identity),
            field(2, "revenue", Integer, Rule::Currency),
            field(3, "tournaments_played", Integer, Rule::UnitCount("Tournament")),
        ],
    }
}

/// Pre-cleaned CSV files loaded straight into their own relations.
pub struct CatalogImport {
    pub file: &'static str,
    pub relation: &'static str,
}

pub const CATALOGS: &[CatalogImport] = &[
    CatalogImport { file: "VideoGames.csv", relation: "VideoGames" },
    CatalogImport { file: "Steam.csv", relation: "SteamData" },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_fit_column_counts() {
        for spec in all() {
            let min = match spec.columns {
                ColumnCount::Exact(n) | ColumnCount::AtLeast(n) => n,
            };
            assert!(
                spec.fields.iter().all(|f| f.position < min),
                "{} maps a position outside its column count",
                spec.name
            );
        }
    }

    #[test]
    fn locator_counts() {
        assert_eq!(countries().locators.len(), 1);
        assert_eq!(players().locators.len(), 11);
        assert_eq!(tournaments().locators.len(), 5);
        assert_eq!(teams().locators.len(), 5);
        assert_eq!(
            teams().locators[1],
            "https://www.esportsearnings.com/teams/highest-overall-x100"
        );
    }

    #[test]
    fn canonical_field_order() {
        assert_eq!(
            countries().field_names(),
            ["name", "total_earnings", "num_players", "top_game", "game_earnings", "game_percent"]
        );
        assert_eq!(
            players().field_names(),
            ["player_id", "player_name", "total_earnings", "main_game", "earnings_percent"]
        );
        assert_eq!(tournaments().field_names(), ["tournament_name", "prize_pool", "game"]);
        assert_eq!(teams().field_names(), ["team_name", "revenue", "tournaments_played"]);
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(by_name("Teams").map(|d| d.relation), Some("teams"));
        assert!(by_name("leagues").is_none());
    }

    #[test]
    fn column_count_rules() {
        assert!(ColumnCount::Exact(4).accepts(4));
        assert!(!ColumnCount::Exact(4).accepts(5));
        assert!(ColumnCount::AtLeast(4).accepts(9));
        assert!(!ColumnCount::AtLeast(4).accepts(3));
    }
}
