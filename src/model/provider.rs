//! Provider identity.

use serde::{Deserialize, Serialize};

/// Base provider tag. Free-form subscription types (codex, antigravity,
/// qwen, claude-code) are sub-tags carried on `Account::sub_tag` rather
/// than additional enum variants — they map onto one of these for
/// scoring and fallback-chain purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Gemini,
    Azure,
    Other,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Azure => "azure",
            Provider::Other => "other",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" | "claude-code" | "claude_code" => Ok(Self::Anthropic),
            "gemini" | "google" | "antigravity" => Ok(Self::Gemini),
            "azure" | "azure_openai" | "azureopenai" => Ok(Self::Azure),
            // codex, qwen and anything unrecognized route through `other`;
            // their sub-tag is what actually disambiguates them downstream.
            _ => Ok(Self::Other),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_tags_map_onto_base_provider() {
        assert_eq!("codex".parse::<Provider>().unwrap(), Provider::Other);
        assert_eq!("antigravity".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!("claude-code".parse::<Provider>().unwrap(), Provider::Anthropic);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for p in [
            Provider::OpenAI,
            Provider::Anthropic,
            Provider::Gemini,
            Provider::Azure,
            Provider::Other,
        ] {
            assert_eq!(p.to_string().parse::<Provider>().unwrap(), p);
        }
    }
}
