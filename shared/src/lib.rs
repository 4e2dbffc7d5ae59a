pub mod clahe;
pub mod model;
pub mod preprocess;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single inference result tied to the patient it was produced for.
/// Records are created by `POST /predict`, never mutated afterwards, and
/// live only for the lifetime of the backend process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: usize,
    pub patient_name: String,
    pub age: String,
    pub doctor: String,
    pub date: String,
    pub prediction: String,
    pub confidence: f32,
    pub image_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f32,
    pub image_path: String,
}

/// Aggregate over the in-memory history. `condition_distribution` maps each
/// predicted class to its share of all scans, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_scans: usize,
    pub condition_distribution: HashMap<String, f64>,
    pub average_confidence: f64,
}
