//! Security reference table (C1, spec.md §4.1).
//!
//! Process-wide immutable mapping from symbol to `(volatility,
//! expected_return, beta)`, grounded in
//! `examples/original_source/prospector/config/securities.py`. Lookup is
//! total: unknown symbols fall back to a substring heuristic.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::model::SecurityCharacteristics;

macro_rules! chars {
    ($vol:expr, $ret:expr, $beta:expr) => {
        SecurityCharacteristics {
            volatility: $vol,
            expected_return: $ret,
            beta: $beta,
        }
    };
}

fn table() -> &'static HashMap<&'static str, SecurityCharacteristics> {
    static TABLE: OnceLock<HashMap<&'static str, SecurityCharacteristics>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            // Technology — higher volatility, higher expected returns.
            ("AAPL", chars!(0.22, 0.15, 1.2)),
            ("GOOGL", chars!(0.24, 0.14, 1.1)),
            ("MSFT", chars!(0.20, 0.13, 1.0)),
            ("META", chars!(0.32, 0.16, 1.4)),
            ("NVDA", chars!(0.40, 0.20, 1.8)),
            ("AMD", chars!(0.45, 0.18, 2.0)),
            ("INTC", chars!(0.28, 0.10, 1.1)),
            ("CRM", chars!(0.30, 0.15, 1.3)),
            ("ORCL", chars!(0.26, 0.11, 0.9)),
            ("ADBE", chars!(0.28, 0.14, 1.2)),
            // Financial — moderate volatility.
            ("JPM", chars!(0.20, 0.10, 1.1)),
            ("BAC", chars!(0.25, 0.09, 1.3)),
            ("WFC", chars!(0.23, 0.09, 1.2)),
            ("GS", chars!(0.26, 0.11, 1.4)),
            ("MS", chars!(0.28, 0.11, 1.5)),
            ("V", chars!(0.18, 0.12, 0.9)),
            ("MA", chars!(0.19, 0.12, 1.0)),
            ("PYPL", chars!(0.35, 0.08, 1.6)),
            ("BRK.B", chars!(0.16, 0.10, 0.8)),
            // Healthcare — lower volatility, stable returns.
            ("JNJ", chars!(0.14, 0.08, 0.7)),
            ("PFE", chars!(0.18, 0.07, 0.8)),
            ("UNH", chars!(0.16, 0.11, 0.8)),
            ("CVS", chars!(0.20, 0.08, 0.9)),
            ("MRK", chars!(0.17, 0.08, 0.7)),
            ("ABBV", chars!(0.19, 0.09, 0.8)),
            ("LLY", chars!(0.18, 0.10, 0.7)),
            ("TMO", chars!(0.19, 0.11, 0.9)),
            // Consumer — mixed characteristics.
            ("AMZN", chars!(0.28, 0.15, 1.3)),
            ("WMT", chars!(0.16, 0.08, 0.6)),
            ("HD", chars!(0.18, 0.10, 0.9)),
            ("NKE", chars!(0.22, 0.11, 1.0)),
            ("MCD", chars!(0.15, 0.08, 0.6)),
            ("SBUX", chars!(0.24, 0.10, 1.0)),
            ("KO", chars!(0.14, 0.07, 0.6)),
            ("PEP", chars!(0.13, 0.07, 0.5)),
            ("PG", chars!(0.15, 0.08, 0.6)),
            // Energy — high volatility, cyclical.
            ("XOM", chars!(0.28, 0.08, 1.1)),
            ("CVX", chars!(0.30, 0.08, 1.2)),
            ("COP", chars!(0.35, 0.09, 1.4)),
            // Entertainment/media — growth characteristics.
            ("DIS", chars!(0.22, 0.09, 1.1)),
            ("NFLX", chars!(0.38, 0.15, 1.5)),
            // Automotive — high volatility, transformation risk.
            ("TSLA", chars!(0.50, 0.20, 2.2)),
            ("F", chars!(0.35, 0.06, 1.5)),
            ("GM", chars!(0.32, 0.07, 1.4)),
            // Telecom — defensive characteristics.
            ("T", chars!(0.18, 0.06, 0.7)),
            ("VZ", chars!(0.16, 0.06, 0.6)),
            ("CMCSA", chars!(0.20, 0.08, 0.9)),
            // Other technology/industrial.
            ("CSCO", chars!(0.22, 0.08, 1.0)),
            ("IBM", chars!(0.20, 0.06, 0.9)),
            ("TXN", chars!(0.22, 0.10, 1.1)),
            ("AVGO", chars!(0.26, 0.12, 1.3)),
        ])
    })
}

const TECH_MARKERS: [&str; 5] = ["TECH", "SOFT", "CYBER", "CLOUD", "AI"];
const FINANCIAL_MARKERS: [&str; 4] = ["BANK", "CAPITAL", "FINANCIAL", "FUND"];
const HEALTH_MARKERS: [&str; 4] = ["HEALTH", "BIO", "PHARMA", "MED"];
const ENERGY_MARKERS: [&str; 4] = ["ENERGY", "OIL", "GAS", "SOLAR"];

/// Look up a security's characteristics. Total and deterministic: unknown
/// symbols resolve via sector-name substring heuristics, never an error.
pub fn lookup(symbol: &str) -> SecurityCharacteristics {
    let upper = symbol.to_uppercase();
    if let Some(known) = table().get(symbol) {
        return *known;
    }
    if TECH_MARKERS.iter().any(|m| upper.contains(m)) {
        return chars!(0.30, 0.12, 1.3);
    }
    if FINANCIAL_MARKERS.iter().any(|m| upper.contains(m)) {
        return chars!(0.22, 0.09, 1.1);
    }
    if HEALTH_MARKERS.iter().any(|m| upper.contains(m)) {
        return chars!(0.20, 0.09, 0.8);
    }
    if ENERGY_MARKERS.iter().any(|m| upper.contains(m)) {
        return chars!(0.32, 0.08, 1.3);
    }
    chars!(0.20, 0.08, 1.0)
}
