use rust_decimal::Decimal;
use serde::Serialize;

pub const COST_PERIOD: &str = "Last 30 days";
pub const SIMULATED_NOTE: &str =
    "Cost data is simulated. Enable Cost Management API for real data.";

/// Fixed per-service amounts in cents. Not read from any billing API.
const SIMULATED_BREAKDOWN: [(&str, i64); 5] = [
    ("Azure Kubernetes Service", 4520),
    ("App Service", 3210),
    ("Function App", 1580),
    ("Storage Account", 1235),
    ("Other", 2200),
];

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CostLine {
    pub service: String,
    pub cost: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostSummaryRecord {
    pub period: String,
    pub total_cost: String,
    pub breakdown: Vec<CostLine>,
    pub note: String,
}

pub fn simulated_summary() -> CostSummaryRecord {
    let amounts: Vec<(&str, Decimal)> = SIMULATED_BREAKDOWN
        .iter()
        .map(|(service, cents)| (*service, Decimal::new(*cents, 2)))
        .collect();
    let total: Decimal = amounts.iter().map(|(_, amount)| *amount).sum();

    CostSummaryRecord {
        period: COST_PERIOD.to_string(),
        total_cost: dollars(total),
        breakdown: amounts
            .into_iter()
            .map(|(service, amount)| CostLine {
                service: service.to_string(),
                cost: dollars(amount),
            })
            .collect(),
        note: SIMULATED_NOTE.to_string(),
    }
}

fn dollars(amount: Decimal) -> String {
    format!("${:.2}", amount)
}
