use gbdt::config::Config as GbdtConfig;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::hours::OperatingHours;
use crate::ml::artifact::{ModelArtifact, TrainingReport};
use crate::ml::features::{FEATURE_COUNT, FeatureEncoder, FeatureVector};
use crate::ml::metrics::{mean, roc_auc};
use crate::records::TrainingRow;

/// Below this many eligible rows the model is still trained, with a warning.
const LOW_SAMPLE_WARNING: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrainError {
    #[error(
        "insufficient data: {loaded} rows loaded, none inside operating hours; the previous model is left untouched"
    )]
    InsufficientData { loaded: usize },
    #[error(
        "single-class history: {positives} rows with bikes, {negatives} without; both outcomes are needed to fit, the previous model is left untouched"
    )]
    SingleClass { positives: usize, negatives: usize },
}

/// Fixed boosting hyperparameters. Trees need no feature scaling, which suits
/// a mix of a categorical id, cyclical pairs and a raw capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub iterations: usize,
    pub max_depth: u32,
    pub learning_rate: f32,
    pub min_leaf_size: usize,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            iterations: 300,
            max_depth: 4,
            learning_rate: 0.05,
            min_leaf_size: 1,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

/// Rows that fall inside operating hours. Closed-hour rows would teach the
/// model that closure means "no bikes".
pub fn eligible_rows<'a>(rows: &'a [TrainingRow], hours: &OperatingHours) -> Vec<&'a TrainingRow> {
    rows.iter().filter(|r| hours.is_open(r.collected_at)).collect()
}

/// Positive iff at least one bike is available.
pub fn label(row: &TrainingRow) -> bool {
    row.bikes_available >= 1
}

/// Stratified split of sample indices into `(train, test)`, deterministic
/// for a given seed.
fn stratified_split(labels: &[bool], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [false, true] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        let n_test = (idx.len() as f64 * test_fraction).floor() as usize;
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn to_training_data(samples: &[(FeatureVector, bool)], idx: &[usize]) -> DataVec {
    idx.iter()
        .map(|&i| {
            let (vector, positive) = &samples[i];
            // LogLikelyhood loss expects labels in {-1, 1}
            let target = if *positive { 1.0 } else { -1.0 };
            Data::new_training_data(vector.to_row(), 1.0, target, None)
        })
        .collect()
}

/// Fits a classifier on historical snapshots.
///
/// Rows inside the closed window are dropped first; if nothing is left the
/// run fails with [`TrainError::InsufficientData`]. A history where every row
/// has the same label fails with [`TrainError::SingleClass`] before fitting.
#[tracing::instrument(skip_all, fields(rows = rows.len()))]
pub fn train(
    rows: &[TrainingRow],
    hours: &OperatingHours,
    params: &TrainingParams,
) -> Result<ModelArtifact, TrainError> {
    let eligible = eligible_rows(rows, hours);
    info!(loaded = rows.len(), eligible = eligible.len(), "Rows inside operating hours");

    if eligible.is_empty() {
        return Err(TrainError::InsufficientData { loaded: rows.len() });
    }
    if eligible.len() < LOW_SAMPLE_WARNING {
        warn!(eligible = eligible.len(), "Few training rows, the model may be unreliable");
    }

    let encoder = FeatureEncoder::fit(
        hours.timezone,
        eligible.iter().map(|r| r.station_id.as_str()),
        eligible.iter().filter_map(|r| r.capacity),
    );

    let samples: Vec<(FeatureVector, bool)> = eligible
        .iter()
        .map(|r| (encoder.encode(&r.station_id, r.collected_at, r.capacity), label(r)))
        .collect();
    let labels: Vec<bool> = samples.iter().map(|(_, l)| *l).collect();
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(TrainError::SingleClass { positives, negatives });
    }
    let positive_rate = mean(&labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect::<Vec<_>>());
    info!(positive_rate, stations = encoder.stations().len(), "Features built");

    let (train_idx, test_idx) = stratified_split(&labels, params.test_fraction, params.seed);

    let mut cfg = GbdtConfig::new();
    cfg.set_feature_size(FEATURE_COUNT);
    cfg.set_max_depth(params.max_depth);
    cfg.set_iterations(params.iterations);
    cfg.set_shrinkage(params.learning_rate);
    cfg.set_min_leaf_size(params.min_leaf_size);
    cfg.set_loss("LogLikelyhood");
    cfg.set_debug(false);

    let mut model = GBDT::new(&cfg);
    let mut train_data = to_training_data(&samples, &train_idx);
    info!(train = train_idx.len(), test = test_idx.len(), "Fitting gradient boosted trees");
    model.fit(&mut train_data);

    let report = TrainingReport {
        rows_loaded: rows.len(),
        rows_eligible: eligible.len(),
        train_size: train_idx.len(),
        test_size: test_idx.len(),
        positive_rate,
        auc: None,
        stations: encoder.stations().len(),
    };
    let mut artifact = ModelArtifact::new(encoder, params.clone(), report, model);

    let test_vectors: Vec<FeatureVector> = test_idx.iter().map(|&i| samples[i].0).collect();
    let test_labels: Vec<bool> = test_idx.iter().map(|&i| labels[i]).collect();
    let scores = artifact.predict_proba(&test_vectors);
    artifact.report.auc = roc_auc(&test_labels, &scores);

    match artifact.report.auc {
        Some(auc) => info!(auc = %format!("{auc:.4}"), "Hold-out ROC AUC"),
        None => warn!("Hold-out set has a single class, ROC AUC not computed"),
    }

    Ok(artifact)
}
