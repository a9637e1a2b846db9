//! Rough per-model cost estimation.
//!
//! Rates are USD per 1000 tokens. Matching is a case-insensitive substring test on the model id
//! (and on the provider for the free tier), so `claude-3-5-sonnet` and `anthropic/claude-x`
//! both price as Claude.

const CLAUDE_INPUT_PER_1K: f64 = 0.003;
const CLAUDE_OUTPUT_PER_1K: f64 = 0.015;
const GPT4_INPUT_PER_1K: f64 = 0.03;
const GPT4_OUTPUT_PER_1K: f64 = 0.06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTier {
    Free,
    Claude,
    Gpt4,
    Unpriced,
}

pub fn price_tier(model_id: &str, provider: &str) -> PriceTier {
    let model = model_id.to_ascii_lowercase();
    let provider = provider.to_ascii_lowercase();
    if model.contains("kimi") || provider.contains("moonshot") {
        PriceTier::Free
    } else if model.contains("claude") {
        PriceTier::Claude
    } else if model.contains("gpt-4") {
        PriceTier::Gpt4
    } else {
        PriceTier::Unpriced
    }
}

/// Estimated cost in USD. Pure and linear in both token counts, so summing per-event costs
/// equals costing the summed tokens.
pub fn estimate_cost(model_id: &str, provider: &str, input: u64, output: u64) -> f64 {
    let (input_rate, output_rate) = match price_tier(model_id, provider) {
        PriceTier::Claude => (CLAUDE_INPUT_PER_1K, CLAUDE_OUTPUT_PER_1K),
        PriceTier::Gpt4 => (GPT4_INPUT_PER_1K, GPT4_OUTPUT_PER_1K),
        PriceTier::Free | PriceTier::Unpriced => return 0.0,
    };
    input as f64 * input_rate / 1000.0 + output as f64 * output_rate / 1000.0
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn claude_pricing_matches_documented_rates() {
        assert!(close(
            estimate_cost("claude-x", "anthropic", 1000, 500),
            0.0105
        ));
        assert!(close(
            estimate_cost("Claude-Sonnet", "anthropic", 2000, 0),
            0.006
        ));
    }

    #[test]
    fn gpt4_pricing_matches_documented_rates() {
        assert!(close(estimate_cost("gpt-4o", "openai", 1000, 1000), 0.09));
    }

    #[test]
    fn free_tier_wins_over_model_substring() {
        // The provider check comes first, so a Claude model served by moonshot is free.
        assert_eq!(estimate_cost("claude-proxy", "Moonshot", 10_000, 10_000), 0.0);
        assert_eq!(estimate_cost("kimi-k2.5", "whatever", 10_000, 10_000), 0.0);
        assert_eq!(price_tier("KIMI-latest", ""), PriceTier::Free);
    }

    #[test]
    fn unknown_models_cost_nothing() {
        assert_eq!(estimate_cost("pony-alpha", "unknown", 99, 99), 0.0);
        assert_eq!(price_tier("gpt-3.5-turbo", "openai"), PriceTier::Unpriced);
    }

    #[test]
    fn cost_is_deterministic_and_additive() {
        let once = estimate_cost("claude-x", "anthropic", 700, 300);
        let again = estimate_cost("claude-x", "anthropic", 700, 300);
        assert_eq!(once.to_bits(), again.to_bits());

        let split = estimate_cost("claude-x", "anthropic", 400, 100)
            + estimate_cost("claude-x", "anthropic", 300, 200);
        assert!(close(once, split));
    }

    #[test]
    fn rounding_helper() {
        assert_eq!(round_to(0.0123, 2), 0.01);
        assert_eq!(round_to(1.23456, 4), 1.2346);
    }
}
