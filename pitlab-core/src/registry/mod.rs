//! Tuned-parameter registry.
//!
//! One parameter set per (equity, model kind), loaded once from the registry
//! CSV written by the tuning runs and never mutated afterwards. Loading fails
//! fast on duplicate keys and malformed literals: a registry that silently
//! dropped rows would quietly change which equities get scored.

pub mod literal;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{EquityId, InvalidEquityId, ModelKind};
pub use literal::{parse_literal, parse_param_map, LiteralError, ParamValue};

// ─── Parameter sets ─────────────────────────────────────────────────

/// The tuned hyperparameters for one (equity, model kind).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TunedParameters {
    values: BTreeMap<String, ParamValue>,
    /// Validation score recorded by the tuning run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
}

/// A parameter is present but unusable by the model reading it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("parameter '{name}' must be {expected}, found {found}")]
    InvalidType { name: String, expected: &'static str, found: String },

    #[error("parameter '{name}' out of range: {detail}")]
    OutOfRange { name: String, detail: String },
}

impl TunedParameters {
    pub fn new(values: BTreeMap<String, ParamValue>) -> Self {
        Self { values, score: None }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Parse a literal such as `{'max_depth': 6}`.
    pub fn parse(literal: &str) -> Result<Self, LiteralError> {
        parse_param_map(literal).map(Self::new)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name).filter(|v| !v.is_none())
    }

    pub fn values(&self) -> &BTreeMap<String, ParamValue> {
        &self.values
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn f64_or(&self, name: &str, default: f64) -> Result<f64, ParamError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => {
                let x = v.as_f64().ok_or_else(|| invalid(name, "a number", v))?;
                if x.is_finite() {
                    Ok(x)
                } else {
                    Err(ParamError::OutOfRange {
                        name: name.to_string(),
                        detail: format!("{x} is not finite"),
                    })
                }
            }
        }
    }

    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize, ParamError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => {
                let i = v.as_i64().ok_or_else(|| invalid(name, "an integer", v))?;
                usize::try_from(i).map_err(|_| ParamError::OutOfRange {
                    name: name.to_string(),
                    detail: format!("{i} is negative"),
                })
            }
        }
    }

    pub fn u64_or(&self, name: &str, default: u64) -> Result<u64, ParamError> {
        self.usize_or(name, default as usize).map(|v| v as u64)
    }

    /// A nested mapping such as a per-feature weight table.
    pub fn map(&self, name: &str) -> Result<Option<&BTreeMap<String, ParamValue>>, ParamError> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v.as_map().map(Some).ok_or_else(|| invalid(name, "a dict", v)),
        }
    }

    /// Reject a value outside `[lo, hi]`.
    pub fn require_range(
        &self,
        name: &str,
        value: f64,
        lo: f64,
        hi: f64,
    ) -> Result<f64, ParamError> {
        if value.is_finite() && value >= lo && value <= hi {
            Ok(value)
        } else {
            Err(ParamError::OutOfRange {
                name: name.to_string(),
                detail: format!("{value} not in [{lo}, {hi}]"),
            })
        }
    }
}

fn invalid(name: &str, expected: &'static str, found: &ParamValue) -> ParamError {
    ParamError::InvalidType { name: name.to_string(), expected, found: found.to_string() }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Registry load failure. Always fatal for a run.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to open registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("registry is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("row {row}: {source}")]
    InvalidEquityId {
        row: usize,
        #[source]
        source: InvalidEquityId,
    },

    #[error("row {row}: malformed parameter literal for {equity_id}/{model_kind}: {source}")]
    MalformedParameterLiteral {
        row: usize,
        equity_id: EquityId,
        model_kind: ModelKind,
        #[source]
        source: LiteralError,
    },

    #[error("row {row}: duplicate registry entry for {equity_id}/{model_kind}")]
    DuplicateEntry { row: usize, equity_id: EquityId, model_kind: ModelKind },

    #[error("row {row}: invalid {column} value '{value}'")]
    InvalidField { row: usize, column: &'static str, value: String },
}

/// Lookup of an absent (equity, model kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no tuned parameters for {equity_id} with model kind {model_kind}")]
pub struct ParametersMissing {
    pub equity_id: EquityId,
    pub model_kind: ModelKind,
}

// ─── Registry ───────────────────────────────────────────────────────

/// Immutable (equity, model kind) → parameters table.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    entries: BTreeMap<(EquityId, ModelKind), TunedParameters>,
}

/// Accepted header names per column. The tuning tool writes the localized names.
const EQUITY_COLUMNS: &[&str] = &["equity_id", "stock_id", "股票代碼"];
const KIND_COLUMNS: &[&str] = &["model_kind", "model_type", "模型類型"];
const PARAMS_COLUMNS: &[&str] = &["params", "best_params", "最佳參數"];
const SCORE_COLUMNS: &[&str] = &["score", "best_score", "最佳分數"];
const SUCCESS_COLUMNS: &[&str] = &["succeeded", "success", "是否成功"];

impl ParameterRegistry {
    /// Build from in-memory entries, rejecting duplicate keys.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (EquityId, ModelKind, TunedParameters)>,
    ) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for (row, (equity_id, model_kind, params)) in entries.into_iter().enumerate() {
            let key = (equity_id, model_kind);
            if map.contains_key(&key) {
                let (equity_id, model_kind) = key;
                return Err(RegistryError::DuplicateEntry { row: row + 1, equity_id, model_kind });
            }
            map.insert(key, params);
        }
        Ok(Self { entries: map })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, RegistryError> {
        let file = File::open(path)
            .map_err(|source| RegistryError::Io { path: path.to_path_buf(), source })?;
        let registry = Self::from_csv_reader(file)?;
        info!(path = %path.display(), entries = registry.len(), "loaded parameter registry");
        Ok(registry)
    }

    /// Load registry rows. Required columns: equity id, model kind, params.
    /// Optional: score, success flag. Rows flagged as failed are skipped.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, RegistryError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));
        let equity_col = find(EQUITY_COLUMNS).ok_or(RegistryError::MissingColumn("equity_id"))?;
        let kind_col = find(KIND_COLUMNS).ok_or(RegistryError::MissingColumn("model_kind"))?;
        let params_col = find(PARAMS_COLUMNS).ok_or(RegistryError::MissingColumn("params"))?;
        let score_col = find(SCORE_COLUMNS);
        let success_col = find(SUCCESS_COLUMNS);

        let mut entries = BTreeMap::new();
        for (index, record) in rdr.records().enumerate() {
            let record = record?;
            // header is line 1
            let row = index + 2;
            let field = |col: usize| record.get(col).unwrap_or("").trim();

            if let Some(col) = success_col {
                let raw = field(col);
                let succeeded = parse_success_flag(raw).ok_or_else(|| RegistryError::InvalidField {
                    row,
                    column: "succeeded",
                    value: raw.to_string(),
                })?;
                if !succeeded {
                    debug!(row, "skipping failed tuning record");
                    continue;
                }
            }

            let equity_id = EquityId::new(field(equity_col))
                .map_err(|source| RegistryError::InvalidEquityId { row, source })?;
            let model_kind = ModelKind::new(field(kind_col));
            if model_kind.as_str().is_empty() {
                return Err(RegistryError::InvalidField {
                    row,
                    column: "model_kind",
                    value: String::new(),
                });
            }

            let mut params = TunedParameters::parse(field(params_col)).map_err(|source| {
                RegistryError::MalformedParameterLiteral {
                    row,
                    equity_id: equity_id.clone(),
                    model_kind: model_kind.clone(),
                    source,
                }
            })?;
            if let Some(col) = score_col {
                let raw = field(col);
                if !raw.is_empty() {
                    let score: f64 = raw.parse().map_err(|_| RegistryError::InvalidField {
                        row,
                        column: "score",
                        value: raw.to_string(),
                    })?;
                    params = params.with_score(score);
                }
            }

            let key = (equity_id, model_kind);
            if entries.contains_key(&key) {
                let (equity_id, model_kind) = key;
                return Err(RegistryError::DuplicateEntry { row, equity_id, model_kind });
            }
            entries.insert(key, params);
        }
        Ok(Self { entries })
    }

    pub fn lookup(
        &self,
        equity_id: &EquityId,
        model_kind: &ModelKind,
    ) -> Result<&TunedParameters, ParametersMissing> {
        self.entries
            .get(&(equity_id.clone(), model_kind.clone()))
            .ok_or_else(|| ParametersMissing {
                equity_id: equity_id.clone(),
                model_kind: model_kind.clone(),
            })
    }

    /// The model kind with the highest recorded tuning score for an equity.
    /// Unscored and NaN-scored entries rank below scored ones; ties go to
    /// the smaller tag.
    pub fn best_kind_for(&self, equity_id: &EquityId) -> Option<&ModelKind> {
        self.entries
            .iter()
            .filter(|((id, _), _)| id == equity_id)
            .max_by(|((_, ka), pa), ((_, kb), pb)| {
                let rank = |p: &TunedParameters| {
                    p.score.filter(|s| !s.is_nan()).unwrap_or(f64::NEG_INFINITY)
                };
                let (sa, sb) = (rank(pa), rank(pb));
                sa.total_cmp(&sb).then_with(|| kb.cmp(ka))
            })
            .map(|((_, kind), _)| kind)
    }

    /// Entry count per model kind.
    pub fn kinds(&self) -> BTreeMap<ModelKind, usize> {
        let mut counts = BTreeMap::new();
        for (_, kind) in self.entries.keys() {
            *counts.entry(kind.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_success_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "1" | "成功" => Some(true),
        "false" | "no" | "0" | "失敗" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EquityId {
        EquityId::new(s).unwrap()
    }

    fn load(csv: &str) -> Result<ParameterRegistry, RegistryError> {
        ParameterRegistry::from_csv_reader(csv.as_bytes())
    }

    #[test]
    fn loads_basic_rows() {
        let reg = load(
            "equity_id,model_kind,params\n\
             2330,random_forest,\"{'n_estimators': 50, 'max_depth': 4}\"\n\
             2317,xgboost,\"{'learning_rate': 0.05}\"\n",
        )
        .unwrap();
        assert_eq!(reg.len(), 2);
        let p = reg.lookup(&id("2330"), &ModelKind::new("random_forest")).unwrap();
        assert_eq!(p.usize_or("n_estimators", 100).unwrap(), 50);
        assert_eq!(p.f64_or("subsample", 0.8).unwrap(), 0.8);
    }

    #[test]
    fn missing_pair_is_explicit() {
        let reg = load("equity_id,model_kind,params\n2330,xgboost,{}\n").unwrap();
        let err = reg.lookup(&id("2330"), &ModelKind::new("random_forest")).unwrap_err();
        assert_eq!(err.model_kind.as_str(), "random_forest");
        assert!(reg.lookup(&id("9999"), &ModelKind::new("xgboost")).is_err());
    }

    #[test]
    fn duplicate_key_is_fatal() {
        let err = load(
            "equity_id,model_kind,params\n\
             2330,xgboost,{}\n\
             2330,XGBoost,{}\n",
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateEntry { row: 3, .. }), "{err}");
    }

    #[test]
    fn malformed_literal_is_fatal() {
        let err = load("equity_id,model_kind,params\n2330,xgboost,\"{'max_depth': \"\n")
            .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedParameterLiteral { row: 2, .. }), "{err}");
    }

    #[test]
    fn missing_column_is_fatal() {
        let err = load("equity_id,params\n2330,{}\n").unwrap_err();
        assert!(matches!(err, RegistryError::MissingColumn("model_kind")));
    }

    #[test]
    fn localized_headers_and_failed_rows() {
        let csv = "\u{feff}股票代碼,模型類型,最佳分數,是否成功,最佳參數\n\
                   2330,xgboost,0.61,成功,\"{'max_depth': 3}\"\n\
                   2330,random_forest,0,失敗,{}\n\
                   2330,linear,0.40,成功,{}\n";
        let reg = load(csv).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.lookup(&id("2330"), &ModelKind::new("random_forest")).is_err());
        assert_eq!(reg.best_kind_for(&id("2330")).unwrap().as_str(), "xgboost");
    }

    #[test]
    fn non_finite_values_load_but_do_not_win() {
        let csv = "equity_id,model_kind,best_score,params\n\
                   2330,xgboost,nan,\"{'learning_rate': nan, 'max_depth': 3}\"\n\
                   2330,linear,0.2,\"{'l2': inf}\"\n";
        let reg = load(csv).unwrap();
        assert_eq!(reg.best_kind_for(&id("2330")).unwrap().as_str(), "linear");
        let p = reg.lookup(&id("2330"), &ModelKind::new("xgboost")).unwrap();
        assert_eq!(p.usize_or("max_depth", 6).unwrap(), 3);
        let err = p.f64_or("learning_rate", 0.1).unwrap_err();
        assert!(matches!(err, ParamError::OutOfRange { .. }), "{err}");
    }

    #[test]
    fn best_kind_absent_for_unknown_equity() {
        let reg = load("equity_id,model_kind,params\n2330,xgboost,{}\n").unwrap();
        assert!(reg.best_kind_for(&id("1101")).is_none());
    }

    #[test]
    fn kind_counts() {
        let reg = load(
            "equity_id,model_kind,params\n\
             2330,xgboost,{}\n\
             2317,xgboost,{}\n\
             2317,linear,{}\n",
        )
        .unwrap();
        let kinds = reg.kinds();
        assert_eq!(kinds[&ModelKind::new("xgboost")], 2);
        assert_eq!(kinds[&ModelKind::new("linear")], 1);
    }

    #[test]
    fn wrong_typed_parameter_reported() {
        let p = TunedParameters::parse("{'max_depth': 'deep', 'n': -1}").unwrap();
        assert!(matches!(p.usize_or("max_depth", 6), Err(ParamError::InvalidType { .. })));
        assert!(matches!(p.usize_or("n", 6), Err(ParamError::OutOfRange { .. })));
    }

    #[test]
    fn none_values_fall_back_to_defaults() {
        let p = TunedParameters::parse("{'max_depth': None}").unwrap();
        assert_eq!(p.usize_or("max_depth", 6).unwrap(), 6);
    }

    #[test]
    fn from_entries_rejects_duplicates() {
        let kind = ModelKind::new("linear");
        let err = ParameterRegistry::from_entries(vec![
            (id("1101"), kind.clone(), TunedParameters::default()),
            (id("1101"), kind, TunedParameters::default()),
        ])
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateEntry { .. }));
    }
}
