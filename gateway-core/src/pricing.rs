//! Static per-(provider, model) pricing table (spec.md §4.7).
//!
//! A provider-level default covers models missing their own row; local
//! providers (`ollama`) price to zero. Whether this should be configurable
//! is left open by spec.md §9 — kept code-embedded here (see DESIGN.md).

/// `{prompt_price_per_1k, completion_price_per_1k}` in USD.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub prompt_price_per_1k: f64,
    pub completion_price_per_1k: f64,
}

const ZERO: ModelPricing = ModelPricing {
    prompt_price_per_1k: 0.0,
    completion_price_per_1k: 0.0,
};

/// `(provider, model, pricing)` rows, checked before the provider default.
const MODEL_TABLE: &[(&str, &str, ModelPricing)] = &[
    (
        "openai",
        "gpt-4",
        ModelPricing {
            prompt_price_per_1k: 0.03,
            completion_price_per_1k: 0.06,
        },
    ),
    (
        "openai",
        "gpt-4-turbo",
        ModelPricing {
            prompt_price_per_1k: 0.01,
            completion_price_per_1k: 0.03,
        },
    ),
    (
        "openai",
        "gpt-3.5-turbo",
        ModelPricing {
            prompt_price_per_1k: 0.0005,
            completion_price_per_1k: 0.0015,
        },
    ),
    (
        "anthropic",
        "claude-3-opus",
        ModelPricing {
            prompt_price_per_1k: 0.015,
            completion_price_per_1k: 0.075,
        },
    ),
    (
        "anthropic",
        "claude-3-sonnet",
        ModelPricing {
            prompt_price_per_1k: 0.003,
            completion_price_per_1k: 0.015,
        },
    ),
    (
        "anthropic",
        "claude-3-haiku",
        ModelPricing {
            prompt_price_per_1k: 0.00025,
            completion_price_per_1k: 0.00125,
        },
    ),
];

/// Provider-level fallback when a model has no row of its own.
const PROVIDER_DEFAULT: &[(&str, ModelPricing)] = &[
    (
        "openai",
        ModelPricing {
            prompt_price_per_1k: 0.01,
            completion_price_per_1k: 0.03,
        },
    ),
    (
        "anthropic",
        ModelPricing {
            prompt_price_per_1k: 0.003,
            completion_price_per_1k: 0.015,
        },
    ),
    ("ollama", ZERO),
];

/// Look up pricing for `(provider, model)`: exact model row, then provider
/// default, then zero (spec.md §4.7).
pub fn price_for(provider: &str, model: &str) -> ModelPricing {
    if let Some((_, _, pricing)) = MODEL_TABLE
        .iter()
        .find(|(p, m, _)| *p == provider && *m == model)
    {
        return *pricing;
    }
    if let Some((_, pricing)) = PROVIDER_DEFAULT.iter().find(|(p, _)| *p == provider) {
        return *pricing;
    }
    ZERO
}

/// Cost in USD for a completed request's token usage.
pub fn cost_for(provider: &str, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let pricing = price_for(provider, model);
    (prompt_tokens as f64 / 1000.0) * pricing.prompt_price_per_1k
        + (completion_tokens as f64 / 1000.0) * pricing.completion_price_per_1k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_cost_matches_spec() {
        // spec.md §8 scenario 1: prompt=1, completion=1 on openai/gpt-4.
        let cost = cost_for("openai", "gpt-4", 1, 1);
        assert!((cost - 0.00009).abs() < 1e-9);
    }

    #[test]
    fn unknown_openai_model_uses_provider_default() {
        let pricing = price_for("openai", "gpt-4-nonexistent");
        assert_eq!(pricing.prompt_price_per_1k, 0.01);
    }

    #[test]
    fn local_provider_is_zero_cost() {
        let cost = cost_for("ollama", "llama3", 10_000, 10_000);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn unknown_provider_is_zero_cost() {
        let pricing = price_for("unknown-local", "whatever");
        assert_eq!(pricing.prompt_price_per_1k, 0.0);
        assert_eq!(pricing.completion_price_per_1k, 0.0);
    }
}
