//! Race outcome scoring
//!
//! The model itself is opaque: a [`Scorer`] turns aligned feature rows into
//! per-driver win/podium/points probabilities. [`predict_race`] merges the
//! race context into the rows, calls the scorer, and calibrates and ranks
//! the result.

use crate::error::ScoringError;
use crate::types::AlignedFeatureRow;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Exponent applied to raw win probabilities before normalization
pub const WIN_SHARPEN_EXPONENT: i32 = 3;
pub const WIN_WEIGHT: f64 = 0.5;
pub const PODIUM_WEIGHT: f64 = 0.3;
pub const POINTS_WEIGHT: f64 = 0.2;

/// Raw scorer output for one driver, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProbabilities {
    pub win: f64,
    pub podium: f64,
    pub points: f64,
}

/// Forecast or simulated conditions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherContext {
    /// °C
    pub air_temperature: f64,
    /// °C
    pub track_temperature: f64,
    /// Percent, 0-100
    pub rain_probability: f64,
}

impl Default for WeatherContext {
    fn default() -> Self {
        Self {
            air_temperature: 20.0,
            track_temperature: 30.0,
            rain_probability: 20.0,
        }
    }
}

/// Live or simulated telemetry for one driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryOverride {
    pub pace_ratio: Option<f64>,
    pub pit_stops: Option<i32>,
}

/// Everything known about a race beyond the stored features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceContext {
    /// Keyed by driver id
    pub telemetry: HashMap<String, TelemetryOverride>,
    pub weather: WeatherContext,
}

impl RaceContext {
    /// Apply telemetry overrides to copies of `rows`
    pub fn apply(&self, rows: &[AlignedFeatureRow]) -> Vec<AlignedFeatureRow> {
        rows.iter()
            .map(|row| {
                let mut row = row.clone();
                if let Some(live) = self.telemetry.get(&row.driver_id) {
                    if let Some(pace_ratio) = live.pace_ratio {
                        row.pace_ratio = pace_ratio;
                        row.has_lap_times = true;
                    }
                    if let Some(pit_stops) = live.pit_stops {
                        row.pit_stop_count = pit_stops;
                        row.has_pit_stops = true;
                    }
                }
                row
            })
            .collect()
    }
}

/// Opaque model boundary
pub trait Scorer: Send + Sync {
    /// One result per row, in row order
    fn score(
        &self,
        rows: &[AlignedFeatureRow],
        weather: &WeatherContext,
    ) -> Result<Vec<OutcomeProbabilities>, ScoringError>;
}

/// Feature names a [`LinearScorer`] may weight
pub const FEATURE_NAMES: [&str; 13] = [
    "grid",
    "qualifying_position",
    "pit_stop_count",
    "mean_pit_duration_secs",
    "pace_ratio",
    "pace_std_ratio",
    "grid_penalty",
    "circuit_experience",
    "driver_form",
    "constructor_form",
    "air_temperature",
    "track_temperature",
    "rain_probability",
];

fn feature_value(row: &AlignedFeatureRow, weather: &WeatherContext, name: &str) -> Option<f64> {
    let value = match name {
        "grid" => row.grid as f64,
        "qualifying_position" => row.qualifying_position as f64,
        "pit_stop_count" => row.pit_stop_count as f64,
        "mean_pit_duration_secs" => row.mean_pit_duration_millis / 1000.0,
        "pace_ratio" => row.pace_ratio,
        "pace_std_ratio" => row.pace_std_ratio,
        "grid_penalty" => row.grid_penalty as f64,
        "circuit_experience" => row.circuit_experience as f64,
        "driver_form" => row.driver_form,
        "constructor_form" => row.constructor_form,
        "air_temperature" => weather.air_temperature,
        "track_temperature" => weather.track_temperature,
        "rain_probability" => weather.rain_probability,
        _ => return None,
    };
    Some(value)
}

/// Logistic model for one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticCoefficients {
    pub intercept: f64,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl LogisticCoefficients {
    fn probability(&self, row: &AlignedFeatureRow, weather: &WeatherContext) -> f64 {
        let z = self.intercept
            + self
                .weights
                .iter()
                .map(|(name, weight)| weight * feature_value(row, weather, name).unwrap_or(0.0))
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }

    fn unknown_features(&self) -> Vec<String> {
        self.weights
            .keys()
            .filter(|name| !FEATURE_NAMES.contains(&name.as_str()))
            .cloned()
            .collect()
    }
}

/// Coefficient-file scorer
///
/// ```json
/// { "win":    { "intercept": -1.0, "weights": { "qualifying_position": -0.45 } },
///   "podium": { "intercept":  0.8, "weights": { "qualifying_position": -0.35 } },
///   "points": { "intercept":  2.5, "weights": { "qualifying_position": -0.25 } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearScorer {
    pub win: LogisticCoefficients,
    pub podium: LogisticCoefficients,
    pub points: LogisticCoefficients,
}

impl Default for LinearScorer {
    /// Grid-and-pace baseline used when no model file is configured
    fn default() -> Self {
        let weights = |position: f64, pace: f64, form: f64| {
            BTreeMap::from([
                ("qualifying_position".to_string(), position),
                ("pace_ratio".to_string(), pace),
                ("driver_form".to_string(), form),
                ("constructor_form".to_string(), form / 2.0),
            ])
        };
        Self {
            win: LogisticCoefficients {
                intercept: 9.0,
                weights: weights(-0.45, -9.0, 0.04),
            },
            podium: LogisticCoefficients {
                intercept: 10.5,
                weights: weights(-0.35, -9.0, 0.04),
            },
            points: LogisticCoefficients {
                intercept: 12.0,
                weights: weights(-0.25, -9.0, 0.03),
            },
        }
    }
}

impl LinearScorer {
    pub fn from_json_str(text: &str) -> Result<Self, ScoringError> {
        let scorer: LinearScorer = serde_json::from_str(text)
            .map_err(|e| ScoringError::Model(format!("Invalid coefficients: {}", e)))?;

        let unknown: Vec<String> = [&scorer.win, &scorer.podium, &scorer.points]
            .iter()
            .flat_map(|c| c.unknown_features())
            .collect();
        if !unknown.is_empty() {
            return Err(ScoringError::Model(format!("Unknown features: {}", unknown.join(", "))));
        }
        Ok(scorer)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScoringError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScoringError::Model(format!("{}: {}", path.display(), e)))?;
        let scorer = Self::from_json_str(&text)?;
        info!("Loaded scoring coefficients from {}", path.display());
        Ok(scorer)
    }
}

impl Scorer for LinearScorer {
    fn score(
        &self,
        rows: &[AlignedFeatureRow],
        weather: &WeatherContext,
    ) -> Result<Vec<OutcomeProbabilities>, ScoringError> {
        Ok(rows
            .iter()
            .map(|row| OutcomeProbabilities {
                win: self.win.probability(row, weather),
                podium: self.podium.probability(row, weather),
                points: self.points.probability(row, weather),
            })
            .collect())
    }
}

/// Calibrated prediction for one driver; probabilities in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverPrediction {
    pub driver_id: String,
    pub constructor_id: Option<String>,
    pub grid: i32,
    pub win_probability: f64,
    pub podium_probability: f64,
    pub points_probability: f64,
    /// Ranking score: 0.5·win + 0.3·podium + 0.2·points
    pub score: f64,
    pub predicted_position: usize,
}

/// Score one race and rank its drivers
///
/// Win probabilities are sharpened and normalized to sum to 100%; podium
/// and points probabilities stay independent.
pub fn predict_race(
    scorer: &dyn Scorer,
    rows: &[AlignedFeatureRow],
    context: &RaceContext,
) -> Result<Vec<DriverPrediction>, ScoringError> {
    if rows.is_empty() {
        return Err(ScoringError::NoDrivers);
    }

    let rows = context.apply(rows);
    let raw = scorer.score(&rows, &context.weather)?;
    if raw.len() != rows.len() {
        return Err(ScoringError::CardinalityMismatch {
            expected: rows.len(),
            got: raw.len(),
        });
    }

    for (row, probabilities) in rows.iter().zip(&raw) {
        for value in [probabilities.win, probabilities.podium, probabilities.points] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ScoringError::InvalidProbability {
                    driver_id: row.driver_id.clone(),
                    value,
                });
            }
        }
    }

    let sharpened: Vec<f64> = raw.iter().map(|p| p.win.powi(WIN_SHARPEN_EXPONENT)).collect();
    let total: f64 = sharpened.iter().sum();
    let uniform = 100.0 / rows.len() as f64;

    let mut predictions: Vec<DriverPrediction> = rows
        .iter()
        .zip(&raw)
        .zip(&sharpened)
        .map(|((row, probabilities), sharp)| {
            let win = if total > 0.0 { sharp / total * 100.0 } else { uniform };
            let podium = probabilities.podium * 100.0;
            let points = probabilities.points * 100.0;
            DriverPrediction {
                driver_id: row.driver_id.clone(),
                constructor_id: row.constructor_id.clone(),
                grid: row.grid,
                win_probability: win,
                podium_probability: podium,
                points_probability: points,
                score: WIN_WEIGHT * win + PODIUM_WEIGHT * podium + POINTS_WEIGHT * points,
                predicted_position: 0,
            }
        })
        .collect();

    predictions.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.grid.cmp(&b.grid))
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    });
    for (index, prediction) in predictions.iter_mut().enumerate() {
        prediction.predicted_position = index + 1;
    }

    debug!(drivers = predictions.len(), "Race scored");
    Ok(predictions)
}
