//! Held-out evaluation: confusion matrix and per-class report.

use std::fmt;

pub struct ConfusionMatrix {
    classes: Vec<String>,
    // counts[actual][predicted]
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(classes: Vec<String>) -> Self {
        let n = classes.len();
        Self {
            classes,
            counts: vec![vec![0; n]; n],
        }
    }

    pub fn record(&mut self, actual: usize, predicted: usize) {
        self.counts[actual][predicted] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.classes.len()).map(|i| self.counts[i][i]).sum();
        correct as f64 / total as f64
    }

    /// Fraction of predictions for `class` that were correct.
    pub fn precision(&self, class: usize) -> f64 {
        let predicted: usize = self.counts.iter().map(|row| row[class]).sum();
        if predicted == 0 {
            return 0.0;
        }
        self.counts[class][class] as f64 / predicted as f64
    }

    /// Fraction of actual `class` samples that were found.
    pub fn recall(&self, class: usize) -> f64 {
        let actual: usize = self.counts[class].iter().sum();
        if actual == 0 {
            return 0.0;
        }
        self.counts[class][class] as f64 / actual as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.len())
            .max()
            .unwrap_or(0)
            .max(7);

        writeln!(f, "confusion matrix (rows = actual, columns = predicted):")?;
        write!(f, "{:width$}", "")?;
        for class in &self.classes {
            write!(f, " {class:>width$}")?;
        }
        writeln!(f)?;
        for (i, class) in self.classes.iter().enumerate() {
            write!(f, "{class:width$}")?;
            for count in &self.counts[i] {
                write!(f, " {count:>width$}")?;
            }
            writeln!(f)?;
        }

        writeln!(f, "per-class report:")?;
        for (i, class) in self.classes.iter().enumerate() {
            writeln!(
                f,
                "  {class:width$} precision {:.3} recall {:.3}",
                self.precision(i),
                self.recall(i),
            )?;
        }
        write!(f, "overall accuracy: {:.2}%", self.accuracy() * 100.0)
    }
}
