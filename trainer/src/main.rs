mod charts;
mod config;
mod dataset;
mod metrics;

use std::fs;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::{Device, Tensor};

use charts::Series;
use config::TrainConfig;
use dataset::{Dataset, DatasetError};
use metrics::ConfusionMatrix;
use shared::model::{self, ModelMetadata};

#[derive(Debug, thiserror::Error)]
enum TrainError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = TrainConfig::from_env();
    log::info!("training configuration: {config:?}");

    if let Err(e) = run(&config) {
        log::error!("training failed: {e}");
        std::process::exit(1);
    }
}

fn run(config: &TrainConfig) -> Result<(), TrainError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    tch::manual_seed(config.seed as i64);

    let mut dataset = Dataset::load(&config.data_dir)?;
    let classes = dataset.classes.clone();
    log_distribution("class distribution", &classes, &dataset.class_counts());

    dataset.shuffle(&mut rng);
    dataset.oversample(&mut rng);
    log_distribution(
        "balanced class distribution",
        &classes,
        &dataset.class_counts(),
    );

    let (rest, test_set) = dataset.split(config.test_fraction, &mut rng);
    let (train_set, val_set) = rest.split(config.validation_fraction, &mut rng);
    log::info!(
        "split sizes: train {} / validation {} / test {}",
        train_set.len(),
        val_set.len(),
        test_set.len()
    );

    let device = Device::cuda_if_available();
    let vs = nn::VarStore::new(device);
    let net = model::retina_cnn(&vs.root(), classes.len() as i64);
    let mut opt = nn::Adam::default().build(&vs, config.learning_rate)?;

    let (train_x, train_y) = train_set.tensors(device);
    let (val_x, val_y) = val_set.tensors(device);
    let (test_x, test_y) = test_set.tensors(device);
    let has_val = !val_set.is_empty();

    let mut train_acc_history = Vec::with_capacity(config.epochs);
    let mut val_acc_history = Vec::with_capacity(config.epochs);
    let mut train_loss_history = Vec::with_capacity(config.epochs);
    let mut val_loss_history = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        let mut loss_sum = 0.0;
        let mut batches: f64 = 0.0;
        let mut batch_iter = tch::data::Iter2::new(&train_x, &train_y, config.batch_size);
        for (bx, by) in batch_iter.shuffle() {
            let logits = net.forward_t(&bx, true);
            let loss = logits.cross_entropy_for_logits(&by);
            opt.backward_step(&loss);
            loss_sum += loss.double_value(&[]);
            batches += 1.0;
        }
        let train_loss = loss_sum / batches.max(1.0);
        let train_acc = net.batch_accuracy_for_logits(&train_x, &train_y, device, 256);
        train_loss_history.push(train_loss);
        train_acc_history.push(train_acc * 100.0);

        if has_val {
            let val_loss = tch::no_grad(|| {
                net.forward_t(&val_x, false)
                    .cross_entropy_for_logits(&val_y)
                    .double_value(&[])
            });
            let val_acc = net.batch_accuracy_for_logits(&val_x, &val_y, device, 256);
            val_loss_history.push(val_loss);
            val_acc_history.push(val_acc * 100.0);
            log::info!(
                "epoch {epoch}/{}: loss {train_loss:.4} acc {:.2}% | val loss {val_loss:.4} val acc {:.2}%",
                config.epochs,
                train_acc * 100.0,
                val_acc * 100.0
            );
        } else {
            log::info!(
                "epoch {epoch}/{}: loss {train_loss:.4} acc {:.2}%",
                config.epochs,
                train_acc * 100.0
            );
        }
    }

    let test_acc = net.batch_accuracy_for_logits(&test_x, &test_y, device, 256);
    log::info!("test accuracy: {:.2}%", test_acc * 100.0);

    let confusion = evaluate(&net, &test_x, &test_y, &classes, config.batch_size)?;
    log::info!("{confusion}");

    write_charts(
        config,
        &train_acc_history,
        &val_acc_history,
        &train_loss_history,
        &val_loss_history,
    )?;

    fs::create_dir_all(&config.model_dir)?;
    let weights_path = config.model_dir.join(model::WEIGHTS_FILE);
    vs.save(&weights_path)?;
    ModelMetadata::new(classes).save(&config.model_dir.join(model::METADATA_FILE))?;
    log::info!("saved model to {}", weights_path.display());

    Ok(())
}

fn evaluate(
    net: &nn::SequentialT,
    test_x: &Tensor,
    test_y: &Tensor,
    classes: &[String],
    batch_size: i64,
) -> Result<ConfusionMatrix, TrainError> {
    let mut confusion = ConfusionMatrix::new(classes.to_vec());
    tch::no_grad(|| -> Result<(), TrainError> {
        let mut batch_iter = tch::data::Iter2::new(test_x, test_y, batch_size);
        for (bx, by) in &mut batch_iter {
            let predicted = net.forward_t(&bx, false).argmax(-1, false).to_device(Device::Cpu);
            let actual = by.to_device(Device::Cpu);
            let predicted = Vec::<i64>::try_from(&predicted)?;
            let actual = Vec::<i64>::try_from(&actual)?;
            for (a, p) in actual.iter().zip(&predicted) {
                confusion.record(*a as usize, *p as usize);
            }
        }
        Ok(())
    })?;
    Ok(confusion)
}

fn write_charts(
    config: &TrainConfig,
    train_acc: &[f64],
    val_acc: &[f64],
    train_loss: &[f64],
    val_loss: &[f64],
) -> std::io::Result<()> {
    fs::create_dir_all(&config.plots_dir)?;

    let mut accuracy_series = vec![Series {
        name: "Train Accuracy".into(),
        values: train_acc.to_vec(),
    }];
    let mut loss_series = vec![Series {
        name: "Train Loss".into(),
        values: train_loss.to_vec(),
    }];
    if !val_acc.is_empty() {
        accuracy_series.push(Series {
            name: "Val Accuracy".into(),
            values: val_acc.to_vec(),
        });
        loss_series.push(Series {
            name: "Val Loss".into(),
            values: val_loss.to_vec(),
        });
    }

    charts::line_chart(
        "Accuracy",
        "Epoch",
        "Accuracy (%)",
        &accuracy_series,
        &config.plots_dir.join("accuracy.svg"),
    )?;
    charts::line_chart(
        "Loss",
        "Epoch",
        "Loss",
        &loss_series,
        &config.plots_dir.join("loss.svg"),
    )
}

fn log_distribution(label: &str, classes: &[String], counts: &[usize]) {
    let formatted: Vec<String> = classes
        .iter()
        .zip(counts)
        .map(|(class, count)| format!("{class}: {count}"))
        .collect();
    log::info!("{label}: {{{}}}", formatted.join(", "));
}
