//! Monthly carrying-cost model (phase 0.5). Standard 30-year amortization
//! on the financed share, plus tax, insurance, HOA, and a utilities
//! baseline from config.

use crate::config::CostAssumptions;
use crate::model::{EnrichmentRecord, MonthlyCost};

const TERM_MONTHS: i32 = 360;

/// Computes the monthly cost breakdown, or `None` when no price is known.
pub fn monthly_cost(
    record: &EnrichmentRecord,
    assumptions: &CostAssumptions,
) -> Option<MonthlyCost> {
    let price = record.price?;
    let loan = price * (1.0 - assumptions.down_payment_pct);
    let monthly_rate = assumptions.annual_rate / 12.0;
    let principal_interest = if monthly_rate > 0.0 {
        loan * monthly_rate / (1.0 - (1.0 + monthly_rate).powi(-TERM_MONTHS))
    } else {
        loan / TERM_MONTHS as f64
    };
    let property_tax = price * assumptions.tax_rate / 12.0;
    let hoa = record.hoa_fee.unwrap_or(0.0);
    let total = principal_interest
        + property_tax
        + assumptions.insurance_monthly
        + hoa
        + assumptions.utilities_monthly;
    Some(MonthlyCost {
        total,
        principal_interest,
        property_tax,
        insurance: assumptions.insurance_monthly,
        hoa,
        utilities: assumptions.utilities_monthly,
    })
}
