//! Feature extraction from a fundamentals snapshot.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::domain::{EquityId, FundamentalsSnapshot};

pub const REVENUE_YOY: &str = "revenue_yoy";
pub const REVENUE_YOY_3M: &str = "revenue_yoy_3m";
pub const REVENUE_MOM: &str = "revenue_mom";
pub const REVENUE_VS_MA12: &str = "revenue_vs_ma12";
pub const REVENUE_VOLATILITY: &str = "revenue_volatility";
pub const EPS_GROWTH: &str = "eps_growth";
pub const NET_MARGIN: &str = "net_margin";
pub const GROSS_MARGIN: &str = "gross_margin";
pub const OPERATING_MARGIN: &str = "operating_margin";
pub const ROE: &str = "roe";
pub const DEBT_RATIO: &str = "debt_ratio";

/// Every named feature, in a fixed order.
pub const FEATURE_NAMES: [&str; 11] = [
    REVENUE_YOY,
    REVENUE_YOY_3M,
    REVENUE_MOM,
    REVENUE_VS_MA12,
    REVENUE_VOLATILITY,
    EPS_GROWTH,
    NET_MARGIN,
    GROSS_MARGIN,
    OPERATING_MARGIN,
    ROE,
    DEBT_RATIO,
];

/// Model inputs for one equity at one date.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub equity_id: EquityId,
    pub as_of: NaiveDate,
    values: BTreeMap<&'static str, f64>,
    /// Year-over-year revenue growth, oldest first.
    pub yoy_history: Vec<f64>,
    pub reporting_periods: usize,
}

impl FeatureVector {
    pub fn from_snapshot(snapshot: &FundamentalsSnapshot) -> Self {
        let mut values = BTreeMap::new();
        let revenue = &snapshot.revenue;

        let yoy_history: Vec<f64> = revenue.iter().filter_map(|r| r.yoy).collect();
        if let Some(latest) = revenue.last() {
            insert(&mut values, REVENUE_YOY, latest.yoy);
            insert(&mut values, REVENUE_MOM, latest.mom);
        }
        if !yoy_history.is_empty() {
            let recent = &yoy_history[yoy_history.len().saturating_sub(3)..];
            insert(&mut values, REVENUE_YOY_3M, Some(mean(recent)));
        }

        let last12: Vec<f64> = revenue
            .iter()
            .rev()
            .take(12)
            .map(|r| r.revenue)
            .collect();
        if last12.len() >= 3 {
            let ma = mean(&last12);
            if ma > 0.0 {
                insert(&mut values, REVENUE_VS_MA12, Some(last12[0] / ma - 1.0));
            }
        }
        let moms: Vec<f64> = revenue.iter().rev().take(12).filter_map(|r| r.mom).collect();
        if moms.len() >= 3 {
            insert(&mut values, REVENUE_VOLATILITY, Some(std_dev(&moms)));
        }

        let eps: Vec<f64> = snapshot.statements.iter().filter_map(|s| s.eps).collect();
        let eps_growth = match eps.len() {
            n if n >= 5 => relative_change(eps[n - 1], eps[n - 5]),
            n if n >= 2 => relative_change(eps[n - 1], eps[n - 2]),
            _ => None,
        };
        insert(&mut values, EPS_GROWTH, eps_growth);

        if let Some(latest) = snapshot.statements.last() {
            if let (Some(income), Some(rev)) = (latest.net_income, latest.revenue) {
                if rev > 0.0 {
                    insert(&mut values, NET_MARGIN, Some(income / rev));
                }
            }
        }

        if let Some(ratios) = &snapshot.ratios {
            insert(&mut values, GROSS_MARGIN, ratios.gross_margin);
            insert(&mut values, OPERATING_MARGIN, ratios.operating_margin);
            insert(&mut values, ROE, ratios.roe);
            insert(&mut values, DEBT_RATIO, ratios.debt_ratio);
        }

        Self {
            equity_id: snapshot.equity_id.clone(),
            as_of: snapshot.as_of,
            values,
            yoy_history,
            reporting_periods: snapshot.reporting_periods(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn is_known(name: &str) -> bool {
        FEATURE_NAMES.contains(&name)
    }

    /// Share of named features present, in `[0, 1]`.
    pub fn completeness(&self) -> f64 {
        self.values.len() as f64 / FEATURE_NAMES.len() as f64
    }

    /// Growth-type signals present, in a fixed order. Used as boosting targets.
    pub fn growth_signals(&self) -> Vec<f64> {
        [REVENUE_YOY, REVENUE_YOY_3M, REVENUE_VS_MA12, EPS_GROWTH]
            .iter()
            .filter_map(|n| self.get(n))
            .collect()
    }
}

fn insert(values: &mut BTreeMap<&'static str, f64>, name: &'static str, value: Option<f64>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        values.insert(name, v);
    }
}

fn relative_change(current: f64, base: f64) -> Option<f64> {
    (base.abs() > 1e-12).then(|| (current - base) / base.abs())
}

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation.
pub(crate) fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}
