use serde::{Deserialize, Serialize};

/// Discrete affection band derived from a subject's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectionLevel {
    Hostile,
    Cool,
    Neutral,
    Friendly,
    Devoted,
}

impl AffectionLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            AffectionLevel::Devoted
        } else if score >= 60.0 {
            AffectionLevel::Friendly
        } else if score >= 40.0 {
            AffectionLevel::Neutral
        } else if score >= 20.0 {
            AffectionLevel::Cool
        } else {
            AffectionLevel::Hostile
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AffectionLevel::Hostile => "hostile",
            AffectionLevel::Cool => "cool",
            AffectionLevel::Neutral => "neutral",
            AffectionLevel::Friendly => "friendly",
            AffectionLevel::Devoted => "devoted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hostile" => Some(AffectionLevel::Hostile),
            "cool" => Some(AffectionLevel::Cool),
            "neutral" => Some(AffectionLevel::Neutral),
            "friendly" => Some(AffectionLevel::Friendly),
            "devoted" => Some(AffectionLevel::Devoted),
            _ => None,
        }
    }
}

impl std::fmt::Display for AffectionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a turn is worth folding into long-term state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightLevel {
    High,
    Medium,
    Low,
}

impl WeightLevel {
    pub fn bucket(score: f64, high_threshold: f64, medium_threshold: f64) -> Self {
        if score >= high_threshold {
            WeightLevel::High
        } else if score >= medium_threshold {
            WeightLevel::Medium
        } else {
            WeightLevel::Low
        }
    }
}

impl std::fmt::Display for WeightLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightLevel::High => write!(f, "high"),
            WeightLevel::Medium => write!(f, "medium"),
            WeightLevel::Low => write!(f, "low"),
        }
    }
}

/// Conversational register of a single turn, as judged for the score path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Friendly,
    Neutral,
    Negative,
}

impl Register {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "friendly" => Some(Register::Friendly),
            "neutral" => Some(Register::Neutral),
            "negative" => Some(Register::Negative),
            _ => None,
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::Friendly => write!(f, "friendly"),
            Register::Neutral => write!(f, "neutral"),
            Register::Negative => write!(f, "negative"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affection_level_boundaries() {
        assert_eq!(AffectionLevel::from_score(0.0), AffectionLevel::Hostile);
        assert_eq!(AffectionLevel::from_score(19.99), AffectionLevel::Hostile);
        assert_eq!(AffectionLevel::from_score(20.0), AffectionLevel::Cool);
        assert_eq!(AffectionLevel::from_score(50.0), AffectionLevel::Neutral);
        assert_eq!(AffectionLevel::from_score(60.0), AffectionLevel::Friendly);
        assert_eq!(AffectionLevel::from_score(100.0), AffectionLevel::Devoted);
    }

    #[test]
    fn affection_level_round_trips_through_str() {
        for level in [
            AffectionLevel::Hostile,
            AffectionLevel::Cool,
            AffectionLevel::Neutral,
            AffectionLevel::Friendly,
            AffectionLevel::Devoted,
        ] {
            assert_eq!(AffectionLevel::parse(level.as_str()), Some(level));
        }
    }

    #[test]
    fn weight_level_buckets() {
        assert_eq!(WeightLevel::bucket(70.0, 70.0, 40.0), WeightLevel::High);
        assert_eq!(WeightLevel::bucket(69.0, 70.0, 40.0), WeightLevel::Medium);
        assert_eq!(WeightLevel::bucket(39.0, 70.0, 40.0), WeightLevel::Low);
    }

    #[test]
    fn register_parse_is_case_insensitive() {
        assert_eq!(Register::parse(" Friendly "), Some(Register::Friendly));
        assert_eq!(Register::parse("NEGATIVE"), Some(Register::Negative));
        assert_eq!(Register::parse("hostile"), None);
    }
}
