//! In-memory patient history. Everything here resets when the process
//! restarts; there is deliberately no persistence behind it.

use std::collections::HashMap;
use std::sync::Mutex;

use shared::{PatientRecord, Statistics};

#[derive(Default)]
pub struct HistoryService {
    records: Mutex<Vec<PatientRecord>>,
}

impl HistoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record with the next sequential id and today's date.
    pub fn add(
        &self,
        patient_name: String,
        age: String,
        doctor: String,
        prediction: String,
        confidence: f32,
        image_path: String,
    ) -> PatientRecord {
        let mut records = self.records.lock().unwrap();
        let record = PatientRecord {
            id: records.len() + 1,
            patient_name,
            age,
            doctor,
            date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            prediction,
            confidence,
            image_path,
        };
        records.push(record.clone());
        record
    }

    pub fn all(&self) -> Vec<PatientRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn find(&self, id: usize) -> Option<PatientRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Per-class percentage distribution and mean confidence over all
    /// records; zeros and an empty map when there is no history yet.
    pub fn statistics(&self) -> Statistics {
        let records = self.records.lock().unwrap();
        if records.is_empty() {
            return Statistics {
                total_scans: 0,
                condition_distribution: HashMap::new(),
                average_confidence: 0.0,
            };
        }

        let total = records.len();
        let mut distribution: HashMap<String, f64> = HashMap::new();
        for record in records.iter() {
            *distribution.entry(record.prediction.clone()).or_default() += 1.0;
        }
        for share in distribution.values_mut() {
            *share = *share / total as f64 * 100.0;
        }

        let average_confidence =
            records.iter().map(|r| r.confidence as f64).sum::<f64>() / total as f64;

        Statistics {
            total_scans: total,
            condition_distribution: distribution,
            average_confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_record(history: &HistoryService, prediction: &str, confidence: f32) -> PatientRecord {
        history.add(
            "Jane Doe".into(),
            "54".into(),
            "Dr. Patel".into(),
            prediction.into(),
            confidence,
            "static/uploads/scan.png".into(),
        )
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let history = HistoryService::new();
        assert_eq!(add_record(&history, "normal", 90.0).id, 1);
        assert_eq!(add_record(&history, "normal", 91.0).id, 2);
        assert_eq!(add_record(&history, "cataract", 88.0).id, 3);
    }

    #[test]
    fn find_returns_the_exact_record_created() {
        let history = HistoryService::new();
        let created = add_record(&history, "glaucoma", 77.5);
        let found = history.find(created.id).unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.prediction, "glaucoma");
        assert_eq!(found.patient_name, "Jane Doe");
        assert!(history.find(99).is_none());
    }

    #[test]
    fn empty_history_yields_zeroed_statistics() {
        let history = HistoryService::new();
        let stats = history.statistics();
        assert_eq!(stats.total_scans, 0);
        assert!(stats.condition_distribution.is_empty());
        assert_eq!(stats.average_confidence, 0.0);
    }

    #[test]
    fn distribution_reflects_exact_counts() {
        let history = HistoryService::new();
        add_record(&history, "A", 80.0);
        add_record(&history, "A", 85.0);
        add_record(&history, "A", 90.0);
        add_record(&history, "B", 60.0);

        let stats = history.statistics();
        assert_eq!(stats.total_scans, 4);
        assert_eq!(stats.condition_distribution["A"], 75.0);
        assert_eq!(stats.condition_distribution["B"], 25.0);
        assert!((stats.average_confidence - 78.75).abs() < 1e-9);
    }

    #[test]
    fn percentages_sum_to_one_hundred() {
        let history = HistoryService::new();
        for (class, confidence) in [("A", 50.0), ("B", 60.0), ("C", 70.0), ("A", 80.0), ("C", 90.0)] {
            add_record(&history, class, confidence);
        }
        let sum: f64 = history.statistics().condition_distribution.values().sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }
}
