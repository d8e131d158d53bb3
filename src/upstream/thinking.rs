//! Reasoning-effort to Gemini thinking-budget mapping.

use relaykit_schema::gemini::GenerationConfig;
use serde_json::json;

/// Maps a client-facing reasoning effort onto Gemini's `thinkingConfig`.
///
/// `none` still sends a zero budget (thinking stays off, but the key must
/// be present); every other setting also requests thoughts back so they
/// can be surfaced as a `reasoning` delta.
pub fn apply_reasoning_effort(config: &mut GenerationConfig, effort: Option<&str>) {
    if matches!(effort, Some("none")) {
        config.thinking_config = Some(json!({"thinkingBudget": 0}));
        return;
    }

    let (budget, include_thoughts) = match effort {
        Some("low") => (1024, true),
        Some("medium") => (8192, true),
        Some("high") => (24576, true),
        _ => (-1, true),
    };

    config.thinking_config = Some(json!({
        "thinkingBudget": budget,
        "includeThoughts": include_thoughts,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GenerationConfig {
        serde_json::from_value(json!({})).unwrap()
    }

    #[test]
    fn none_sends_zero_budget_without_include_thoughts() {
        let mut config = config();
        apply_reasoning_effort(&mut config, Some("none"));
        let thinking = config.thinking_config.unwrap();
        assert_eq!(thinking["thinkingBudget"], 0);
        assert!(thinking.get("includeThoughts").is_none());
    }

    #[test]
    fn medium_maps_to_8192_with_thoughts_included() {
        let mut config = config();
        apply_reasoning_effort(&mut config, Some("medium"));
        let thinking = config.thinking_config.unwrap();
        assert_eq!(thinking["thinkingBudget"], 8192);
        assert_eq!(thinking["includeThoughts"], true);
    }

    #[test]
    fn unset_effort_maps_to_dynamic_budget() {
        let mut config = config();
        apply_reasoning_effort(&mut config, None);
        let thinking = config.thinking_config.unwrap();
        assert_eq!(thinking["thinkingBudget"], -1);
        assert_eq!(thinking["includeThoughts"], true);
    }
}
