//! The scoring rule table.
//!
//! Rules are data, not subclasses: each entry is a name, a weight, and a
//! pure function over the context. Every rule returns a bounded score in
//! [0, 100]; a failing rule is excluded from the aggregate by the scorer,
//! it never aborts the evaluation.

use anyhow::bail;

use crate::config::RuleConfig;

use super::context::DetectionContext;

pub type RuleFn = fn(&DetectionContext, &RuleConfig) -> anyhow::Result<f64>;

pub struct ScoringRule {
    pub name: &'static str,
    pub weight: f64,
    pub eval: RuleFn,
}

pub fn rule_table() -> Vec<ScoringRule> {
    vec![
        ScoringRule {
            name: "concentrated_buys",
            weight: 0.25,
            eval: concentrated_buys,
        },
        ScoringRule {
            name: "large_wallet_inflows",
            weight: 0.20,
            eval: large_wallet_inflows,
        },
        ScoringRule {
            name: "new_whale_addresses",
            weight: 0.15,
            eval: new_whale_addresses,
        },
        ScoringRule {
            name: "holding_pattern_increase",
            weight: 0.15,
            eval: holding_pattern_increase,
        },
        ScoringRule {
            name: "volume_spike",
            weight: 0.15,
            eval: volume_spike,
        },
        ScoringRule {
            name: "dex_liquidity_increase",
            weight: 0.05,
            eval: dex_liquidity_increase,
        },
        ScoringRule {
            name: "repeated_large_swaps",
            weight: 0.05,
            eval: repeated_large_swaps,
        },
    ]
}

/// Distinct non-exchange addresses whose inbound volume is at or above
/// `concentration_ratio` of the top buyer's, with their volumes.
pub fn concentrated_buyers(
    ctx: &DetectionContext,
    config: &RuleConfig,
) -> anyhow::Result<Vec<(String, f64)>> {
    let mut inbound: Vec<(String, f64)> = ctx
        .inbound_by_address()
        .into_iter()
        .filter(|(address, _)| !config.exchange_addresses.iter().any(|x| x == address))
        .map(|(address, volume)| (address.to_string(), volume))
        .collect();

    if inbound.iter().any(|(_, volume)| *volume < 0.0) {
        bail!("negative inbound volume in window");
    }

    let top = inbound
        .iter()
        .map(|(_, volume)| *volume)
        .fold(0.0_f64, f64::max);
    if top <= 0.0 {
        return Ok(Vec::new());
    }

    let floor = top * config.concentration_ratio;
    inbound.retain(|(_, volume)| *volume >= floor);
    inbound.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(inbound)
}

/// More large buyers in the window means more coordinated pressure.
/// Bands: >=3 buyers -> 40, >=5 -> +30, >=10 -> +30.
fn concentrated_buys(ctx: &DetectionContext, config: &RuleConfig) -> anyhow::Result<f64> {
    let buyers = concentrated_buyers(ctx, config)?;
    Ok(count_bands(buyers.len(), &[(3, 40.0), (5, 30.0), (10, 30.0)]))
}

/// Average transfer size into the top-K wallets by balance, scaled against
/// the configured reference magnitude.
fn large_wallet_inflows(ctx: &DetectionContext, config: &RuleConfig) -> anyhow::Result<f64> {
    let top_k: std::collections::HashSet<&str> = ctx
        .top_positions
        .iter()
        .take(config.inflow_top_k)
        .map(|p| p.address.as_str())
        .collect();
    if top_k.is_empty() {
        return Ok(0.0);
    }

    let into_top: Vec<f64> = ctx
        .transactions
        .iter()
        .filter(|tx| top_k.contains(tx.to_address.as_str()))
        .map(|tx| tx.amount)
        .collect();
    if into_top.is_empty() {
        return Ok(0.0);
    }

    let average = into_top.iter().sum::<f64>() / into_top.len() as f64;
    Ok((average / config.inflow_reference * 100.0).clamp(0.0, 100.0))
}

/// Addresses receiving whale-sized amounts that are not already among the
/// token's top holders. Bands: >=1 -> 30, >=3 -> +30, >=5 -> +40.
fn new_whale_addresses(ctx: &DetectionContext, config: &RuleConfig) -> anyhow::Result<f64> {
    Ok(count_bands(
        fresh_whales(ctx, config).len(),
        &[(1, 30.0), (3, 30.0), (5, 40.0)],
    ))
}

/// Receivers of at least `whale_amount` absent from the current top holders.
pub fn fresh_whales(ctx: &DetectionContext, config: &RuleConfig) -> Vec<String> {
    let holders: std::collections::HashSet<&str> = ctx
        .top_positions
        .iter()
        .map(|p| p.address.as_str())
        .collect();

    let mut whales: Vec<String> = ctx
        .inbound_by_address()
        .into_iter()
        .filter(|(address, volume)| *volume >= config.whale_amount && !holders.contains(address))
        .map(|(address, _)| address.to_string())
        .collect();
    whales.sort();
    whales
}

/// Wallets whose net balance delta over the window is materially positive.
/// Bands: >=3 wallets -> 35, >=5 -> +35, >=10 -> +30.
fn holding_pattern_increase(ctx: &DetectionContext, config: &RuleConfig) -> anyhow::Result<f64> {
    let accumulating = ctx
        .net_delta_by_address()
        .values()
        .filter(|delta| **delta >= config.material_delta)
        .count();
    Ok(count_bands(accumulating, &[(3, 35.0), (5, 35.0), (10, 30.0)]))
}

/// Raw activity level against fixed bands. A stronger implementation would
/// compare to the token's own historical baseline; the bands are tunable.
fn volume_spike(ctx: &DetectionContext, config: &RuleConfig) -> anyhow::Result<f64> {
    let count = ctx.transactions.len();
    let volume = ctx.total_volume();
    if volume < 0.0 {
        bail!("negative window volume");
    }

    let [low, mid, high] = config.spike_tx_bands;
    let mut score = count_bands(count, &[(low, 20.0), (mid, 20.0), (high, 20.0)]);
    if volume >= config.spike_volume_bands[0] {
        score += 20.0;
    }
    if volume >= config.spike_volume_bands[1] {
        score += 20.0;
    }
    Ok(score.min(100.0))
}

/// Net liquidity added over the window, scaled against the reference.
/// Scores zero when the liquidity feed has nothing for this window.
fn dex_liquidity_increase(ctx: &DetectionContext, config: &RuleConfig) -> anyhow::Result<f64> {
    if ctx.liquidity_events.is_empty() {
        return Ok(0.0);
    }
    let net: f64 = ctx.liquidity_events.iter().map(|e| e.delta_usd).sum();
    if net <= 0.0 {
        return Ok(0.0);
    }
    Ok((net / config.liquidity_reference * 100.0).clamp(0.0, 100.0))
}

/// Wallets repeatedly swapping in large size. Bands over repeat-wallet
/// count: >=1 -> 50, >=3 -> +50. Zero when the swap feed is absent.
fn repeated_large_swaps(ctx: &DetectionContext, config: &RuleConfig) -> anyhow::Result<f64> {
    if ctx.swaps.is_empty() {
        return Ok(0.0);
    }

    let mut per_wallet: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for swap in &ctx.swaps {
        if swap.side == "BUY" && swap.amount_usd >= config.large_swap_usd {
            *per_wallet.entry(swap.wallet.as_str()).or_insert(0) += 1;
        }
    }
    let repeaters = per_wallet.values().filter(|n| **n >= 3).count();
    Ok(count_bands(repeaters, &[(1, 50.0), (3, 50.0)]))
}

/// Wallet set a signal reports: concentrated buyers plus fresh whales.
pub fn involved_wallets(ctx: &DetectionContext, config: &RuleConfig) -> Vec<String> {
    let mut wallets: Vec<String> = concentrated_buyers(ctx, config)
        .unwrap_or_default()
        .into_iter()
        .map(|(address, _)| address)
        .collect();
    for whale in fresh_whales(ctx, config) {
        if !wallets.contains(&whale) {
            wallets.push(whale);
        }
    }
    wallets
}

/// Discrete band scoring: each `(threshold, increment)` whose threshold the
/// count reaches adds its increment.
fn count_bands(count: usize, bands: &[(usize, f64)]) -> f64 {
    let mut score = 0.0;
    for (threshold, increment) in bands {
        if count >= *threshold {
            score += increment;
        }
    }
    score.min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Token, Transaction, WalletPosition, Window};

    fn token() -> Token {
        Token {
            id: "0xtok".to_string(),
            chain: "ethereum".to_string(),
            address: "0xtok".to_string(),
            symbol: "TOK".to_string(),
            decimals: 18,
            is_active: true,
        }
    }

    fn tx(from: &str, to: &str, amount: f64, timestamp: i64) -> Transaction {
        Transaction {
            id: 0,
            token_id: "0xtok".to_string(),
            from_address: from.to_string(),
            to_address: to.to_string(),
            amount,
            timestamp,
        }
    }

    fn context(transactions: Vec<Transaction>, top_positions: Vec<WalletPosition>) -> DetectionContext {
        DetectionContext {
            token: token(),
            window: Window { start: 0, end: 3600 },
            transactions,
            top_positions,
            swaps: Vec::new(),
            liquidity_events: Vec::new(),
        }
    }

    #[test]
    fn twelve_comparable_buyers_max_out_concentrated_buys() {
        let mut transactions = Vec::new();
        for i in 0..12 {
            transactions.push(tx("0xseller", &format!("0xbuyer{}", i), 1_000.0, 10 + i));
        }
        let ctx = context(transactions, Vec::new());
        let score = concentrated_buys(&ctx, &RuleConfig::default()).unwrap();
        assert_eq!(score, 100.0);
    }

    #[test]
    fn small_buyers_below_ratio_are_not_counted() {
        let mut transactions = vec![tx("0xseller", "0xtop", 10_000.0, 1)];
        // 9 buyers at well under 10% of the top buyer
        for i in 0..9 {
            transactions.push(tx("0xseller", &format!("0xsmall{}", i), 500.0, 10 + i));
        }
        let ctx = context(transactions, Vec::new());
        // Only the top buyer qualifies; below the 3-buyer band
        assert_eq!(concentrated_buys(&ctx, &RuleConfig::default()).unwrap(), 0.0);
    }

    #[test]
    fn exchange_addresses_are_excluded_from_buyer_count() {
        let mut config = RuleConfig::default();
        config.exchange_addresses = vec!["0xexchange".to_string()];
        let transactions = vec![
            tx("0xa", "0xexchange", 5_000.0, 1),
            tx("0xa", "0xbuyer1", 5_000.0, 2),
            tx("0xa", "0xbuyer2", 5_000.0, 3),
            tx("0xa", "0xbuyer3", 5_000.0, 4),
        ];
        let ctx = context(transactions, Vec::new());
        let buyers = concentrated_buyers(&ctx, &config).unwrap();
        assert_eq!(buyers.len(), 3);
        assert!(buyers.iter().all(|(address, _)| address != "0xexchange"));
    }

    #[test]
    fn corrupt_amounts_make_the_rule_fail_not_panic() {
        let ctx = context(vec![tx("0xa", "0xb", -5.0, 1)], Vec::new());
        assert!(concentrated_buys(&ctx, &RuleConfig::default()).is_err());
    }

    #[test]
    fn new_whales_ignore_existing_top_holders() {
        let config = RuleConfig::default();
        let positions = vec![WalletPosition {
            token_id: "0xtok".to_string(),
            address: "0xoldwhale".to_string(),
            balance: 9_000_000.0,
            updated_at: 0,
        }];
        let transactions = vec![
            tx("0xa", "0xoldwhale", 200_000.0, 1),
            tx("0xa", "0xnewwhale", 150_000.0, 2),
        ];
        let ctx = context(transactions, positions);
        assert_eq!(fresh_whales(&ctx, &config), vec!["0xnewwhale".to_string()]);
        assert_eq!(new_whale_addresses(&ctx, &config).unwrap(), 30.0);
    }

    #[test]
    fn holding_pattern_counts_net_accumulators_only() {
        let config = RuleConfig::default();
        let transactions = vec![
            // three wallets accumulating past the material threshold
            tx("0xpool", "0xw1", 20_000.0, 1),
            tx("0xpool", "0xw2", 15_000.0, 2),
            tx("0xpool", "0xw3", 12_000.0, 3),
            // w4 buys and sells straight back out
            tx("0xpool", "0xw4", 30_000.0, 4),
            tx("0xw4", "0xpool", 29_000.0, 5),
        ];
        let ctx = context(transactions, Vec::new());
        assert_eq!(holding_pattern_increase(&ctx, &config).unwrap(), 35.0);
    }

    #[test]
    fn auxiliary_rules_score_zero_without_their_feeds() {
        let ctx = context(vec![tx("0xa", "0xb", 100.0, 1)], Vec::new());
        let config = RuleConfig::default();
        assert_eq!(dex_liquidity_increase(&ctx, &config).unwrap(), 0.0);
        assert_eq!(repeated_large_swaps(&ctx, &config).unwrap(), 0.0);
    }

    #[test]
    fn volume_spike_bands_are_cumulative() {
        let config = RuleConfig::default();
        let mut transactions = Vec::new();
        for i in 0..60 {
            transactions.push(tx("0xa", &format!("0xb{}", i), 10_000.0, i));
        }
        // 60 txs (two count bands) totalling 600k (one volume band)
        let ctx = context(transactions, Vec::new());
        assert_eq!(volume_spike(&ctx, &config).unwrap(), 60.0);
    }

    #[test]
    fn rule_weights_sum_to_one() {
        let total: f64 = rule_table().iter().map(|r| r.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
