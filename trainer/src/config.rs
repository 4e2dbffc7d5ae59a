use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Training hyperparameters and paths, read from the environment with
/// sensible defaults so `cargo run -p trainer` works against a `data/`
/// directory out of the box.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub plots_dir: PathBuf,
    pub epochs: usize,
    pub batch_size: i64,
    pub learning_rate: f64,
    pub seed: u64,
    pub test_fraction: f64,
    pub validation_fraction: f64,
}

impl TrainConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()).into(),
            model_dir: env::var("MODEL_DIR").unwrap_or_else(|_| "model".to_string()).into(),
            plots_dir: env::var("PLOTS_DIR").unwrap_or_else(|_| "plots".to_string()).into(),
            epochs: parse_or("EPOCHS", 10),
            batch_size: parse_or("BATCH_SIZE", 32),
            learning_rate: parse_or("LEARNING_RATE", 1e-3),
            seed: parse_or("SEED", 42),
            test_fraction: parse_or("TEST_FRACTION", 0.2),
            validation_fraction: parse_or("VALIDATION_FRACTION", 0.2),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_training_script() {
        let config = TrainConfig::from_env();
        assert_eq!(config.epochs, 10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.test_fraction, 0.2);
    }
}
