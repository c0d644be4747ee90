//! Weighted aggregation of rule scores into one 0-100 reading.

use std::collections::HashMap;

use tracing::warn;

use crate::config::{DetectionConfig, RuleConfig};
use crate::storage::SignalType;

use super::context::DetectionContext;
use super::rules::ScoringRule;

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub score: f64,
    pub breakdown: HashMap<&'static str, f64>,
}

/// Weighted average over the rules that evaluated cleanly. A failing rule
/// is excluded from numerator and denominator, so the remaining rules are
/// renormalized over their own weights rather than diluted. All rules
/// failing yields zero.
pub fn evaluate(
    ctx: &DetectionContext,
    rules: &[ScoringRule],
    config: &RuleConfig,
) -> Evaluation {
    let mut numerator = 0.0;
    let mut weight_total = 0.0;
    let mut breakdown = HashMap::new();

    for rule in rules {
        match (rule.eval)(ctx, config) {
            Ok(score) => {
                let score = score.clamp(0.0, 100.0);
                numerator += score * rule.weight;
                weight_total += rule.weight;
                breakdown.insert(rule.name, score);
            }
            Err(e) => {
                warn!(
                    "Rule {} failed for token {}, excluding from aggregate: {}",
                    rule.name, ctx.token.id, e
                );
            }
        }
    }

    let score = if weight_total > 0.0 {
        (numerator / weight_total).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Evaluation { score, breakdown }
}

/// Map an aggregate score to a signal type. Readings below the global
/// signal threshold, or between it and the concentrated-buys threshold,
/// are discarded and never persisted.
pub fn classify(score: f64, config: &DetectionConfig) -> Option<SignalType> {
    if score < config.signal_threshold {
        return None;
    }
    if score >= config.whale_inflow_threshold {
        Some(SignalType::WhaleInflow)
    } else if score >= config.concentrated_buys_threshold {
        Some(SignalType::ConcentratedBuys)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Token, Window};

    fn empty_ctx() -> DetectionContext {
        DetectionContext {
            token: Token {
                id: "0xtok".to_string(),
                chain: "ethereum".to_string(),
                address: "0xtok".to_string(),
                symbol: "TOK".to_string(),
                decimals: 18,
                is_active: true,
            },
            window: Window { start: 0, end: 3600 },
            transactions: Vec::new(),
            top_positions: Vec::new(),
            swaps: Vec::new(),
            liquidity_events: Vec::new(),
        }
    }

    fn score_40(_: &DetectionContext, _: &RuleConfig) -> anyhow::Result<f64> {
        Ok(40.0)
    }
    fn score_60(_: &DetectionContext, _: &RuleConfig) -> anyhow::Result<f64> {
        Ok(60.0)
    }
    fn score_80(_: &DetectionContext, _: &RuleConfig) -> anyhow::Result<f64> {
        Ok(80.0)
    }
    fn score_100(_: &DetectionContext, _: &RuleConfig) -> anyhow::Result<f64> {
        Ok(100.0)
    }
    fn failing(_: &DetectionContext, _: &RuleConfig) -> anyhow::Result<f64> {
        anyhow::bail!("backing table unavailable")
    }

    #[test]
    fn aggregate_is_weighted_average() {
        let rules = vec![
            ScoringRule { name: "a", weight: 0.5, eval: score_80 },
            ScoringRule { name: "b", weight: 0.5, eval: score_40 },
        ];
        let eval = evaluate(&empty_ctx(), &rules, &RuleConfig::default());
        assert_eq!(eval.score, 60.0);
        assert_eq!(eval.breakdown["a"], 80.0);
        assert_eq!(eval.breakdown["b"], 40.0);
    }

    #[test]
    fn evaluation_is_order_independent() {
        let forward = vec![
            ScoringRule { name: "a", weight: 0.25, eval: score_100 },
            ScoringRule { name: "b", weight: 0.5, eval: score_60 },
            ScoringRule { name: "c", weight: 0.25, eval: score_40 },
        ];
        let reversed = vec![
            ScoringRule { name: "c", weight: 0.25, eval: score_40 },
            ScoringRule { name: "b", weight: 0.5, eval: score_60 },
            ScoringRule { name: "a", weight: 0.25, eval: score_100 },
        ];
        let config = RuleConfig::default();
        let a = evaluate(&empty_ctx(), &forward, &config);
        let b = evaluate(&empty_ctx(), &reversed, &config);
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn failing_rule_is_renormalized_out() {
        let rules = vec![
            ScoringRule { name: "ok_high", weight: 0.25, eval: score_80 },
            ScoringRule { name: "ok_low", weight: 0.25, eval: score_40 },
            ScoringRule { name: "broken", weight: 0.5, eval: failing },
        ];
        let eval = evaluate(&empty_ctx(), &rules, &RuleConfig::default());
        // (80*0.25 + 40*0.25) / 0.5, not diluted by the failed half
        assert_eq!(eval.score, 60.0);
        assert!(!eval.breakdown.contains_key("broken"));
    }

    #[test]
    fn all_rules_failing_scores_zero() {
        let rules = vec![
            ScoringRule { name: "a", weight: 0.5, eval: failing },
            ScoringRule { name: "b", weight: 0.5, eval: failing },
        ];
        let eval = evaluate(&empty_ctx(), &rules, &RuleConfig::default());
        assert_eq!(eval.score, 0.0);
        assert!(eval.breakdown.is_empty());
    }

    #[test]
    fn classification_thresholds() {
        let config = DetectionConfig::default();
        assert_eq!(classify(82.0, &config), Some(SignalType::WhaleInflow));
        assert_eq!(classify(72.0, &config), Some(SignalType::ConcentratedBuys));
        assert_eq!(classify(55.0, &config), None);
        // At or above the signal threshold but under every type threshold
        assert_eq!(classify(65.0, &config), None);
        // Boundary values classify upward
        assert_eq!(classify(80.0, &config), Some(SignalType::WhaleInflow));
        assert_eq!(classify(70.0, &config), Some(SignalType::ConcentratedBuys));
    }
}
