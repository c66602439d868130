//! Herramientas auxiliares de análisis numérico para datos de VM.
//!
//! No forman parte del flujo RAG; se exponen por la API para cálculos rápidos
//! sobre series de medidas.

use serde::Serialize;
use serde_json::Value;

use crate::error::{RagError, Result};

/// Umbral por defecto de `analyze_vm_data`.
pub const DEFAULT_RULE_THRESHOLD: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub mean: f64,
    /// Desviación típica poblacional.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmAnalysis {
    pub stats: Stats,
    pub rules: Vec<bool>,
}

pub fn compute_stats(values: &[f64]) -> Result<Stats> {
    if values.is_empty() {
        return Err(RagError::InvalidArgument(
            "se necesita al menos un valor".to_string(),
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(RagError::InvalidArgument(
            "todos los valores deben ser finitos".to_string(),
        ));
    }

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(Stats {
        mean,
        std: variance.sqrt(),
        min,
        max,
        count,
    })
}

/// `true` si la desviación del valor (respecto a cero) supera el umbral.
pub fn simple_rule_check(value: f64, threshold: f64) -> bool {
    value.abs() > threshold
}

pub fn analyze_vm_data(values: &[f64], threshold: f64) -> Result<VmAnalysis> {
    Ok(VmAnalysis {
        stats: compute_stats(values)?,
        rules: values
            .iter()
            .map(|v| simple_rule_check(*v, threshold))
            .collect(),
    })
}

/// Acepta un array JSON de números o una cadena que contenga uno (`"[1,2,3]"`).
pub fn parse_values(input: &Value) -> Result<Vec<f64>> {
    match input {
        Value::String(raw) => {
            let parsed: Value = serde_json::from_str(raw.trim()).map_err(|e| {
                RagError::InvalidArgument(format!("no es un array JSON válido: {e}"))
            })?;
            parse_values(&parsed)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_f64().ok_or_else(|| {
                    RagError::InvalidArgument(format!("valor no numérico: {item}"))
                })
            })
            .collect(),
        other => Err(RagError::InvalidArgument(format!(
            "se esperaba un array de números, llegó {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stats_of_one_to_five() {
        let stats = compute_stats(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.count, 5);
        assert!((stats.std - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn stats_reject_empty_and_non_finite() {
        assert!(matches!(compute_stats(&[]), Err(RagError::InvalidArgument(_))));
        assert!(compute_stats(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn rule_check_uses_absolute_deviation() {
        assert!(simple_rule_check(0.006, DEFAULT_RULE_THRESHOLD));
        assert!(simple_rule_check(-0.01, DEFAULT_RULE_THRESHOLD));
        assert!(!simple_rule_check(0.005, DEFAULT_RULE_THRESHOLD));
        assert!(!simple_rule_check(0.0, DEFAULT_RULE_THRESHOLD));
    }

    #[test]
    fn analysis_flags_each_value() {
        let analysis = analyze_vm_data(&[0.001, 0.02, -0.004], DEFAULT_RULE_THRESHOLD).unwrap();
        assert_eq!(analysis.rules, vec![false, true, false]);
        assert_eq!(analysis.stats.count, 3);
    }

    #[test]
    fn parse_values_accepts_arrays_and_json_strings() {
        assert_eq!(parse_values(&json!([1, 2.5, 3])).unwrap(), vec![1.0, 2.5, 3.0]);
        assert_eq!(parse_values(&json!(" [4, 5] ")).unwrap(), vec![4.0, 5.0]);
        assert!(parse_values(&json!("[1, \"dos\"]")).is_err());
        assert!(parse_values(&json!({"values": [1]})).is_err());
        assert!(parse_values(&json!("no json")).is_err());
    }
}
