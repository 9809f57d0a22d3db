use std::time::Duration;

use serde::Serialize;

use crate::model::GeneratedImage;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Seconds per image of the most recent batch.
    pub last: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub stdev: f64,
    pub samples: usize,
}

/// Interactive state of the single studio user.
#[derive(Debug, Default)]
pub struct StudioSession {
    selected_model: Option<String>,
    batch: Vec<GeneratedImage>,
    latency_history: Vec<f64>,
}

impl StudioSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    /// Switches the active model. Returns `true` and drops the current batch
    /// when the model actually changes.
    pub fn select_model(&mut self, model_id: &str) -> bool {
        if self.selected_model.as_deref() == Some(model_id) {
            return false;
        }
        self.selected_model = Some(model_id.to_string());
        self.batch.clear();
        true
    }

    /// Selects `model_id` only when nothing is selected yet.
    pub fn select_if_unset(&mut self, model_id: &str) -> bool {
        self.selected_model.is_none() && self.select_model(model_id)
    }

    /// Replaces the current batch and records seconds per requested image.
    pub fn record_batch(
        &mut self,
        model_id: &str,
        images: Vec<GeneratedImage>,
        elapsed: Duration,
        requested: usize,
    ) -> Option<f64> {
        self.select_model(model_id);
        self.batch = images;
        if requested == 0 {
            return None;
        }
        let per_image = round4(elapsed.as_secs_f64() / requested as f64);
        self.latency_history.push(per_image);
        Some(per_image)
    }

    pub fn batch(&self) -> &[GeneratedImage] {
        &self.batch
    }

    /// Image at 1-based `index` of the current batch.
    pub fn image(&self, index: usize) -> Option<&GeneratedImage> {
        index.checked_sub(1).and_then(|i| self.batch.get(i))
    }

    pub fn latency_history(&self) -> &[f64] {
        &self.latency_history
    }

    pub fn latency_summary(&self) -> Option<LatencySummary> {
        let history = &self.latency_history;
        let last = *history.last()?;
        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let variance = history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Some(LatencySummary {
            last,
            mean,
            stdev: variance.sqrt(),
            samples: history.len(),
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
