//! Column-normalized confusion matrices (predicted rows × truth columns).

use std::fmt;

use crate::category::Category;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    categories: Vec<Category>,
    /// `counts[predicted][truth]`
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    /// Cross-tabulate (predicted, truth) pairs over a fixed ordering.
    ///
    /// Pairs with a missing side, or a category outside the ordering, are left
    /// out. Categories that never occur still get an all-zero row and column.
    pub fn build(
        pairs: impl IntoIterator<Item = (Option<Category>, Option<Category>)>,
        categories: &[Category],
    ) -> Self {
        let n = categories.len();
        let mut counts = vec![vec![0u64; n]; n];
        let index = |c: Category| categories.iter().position(|&k| k == c);

        for pair in pairs {
            if let (Some(p), Some(t)) = pair {
                if let (Some(row), Some(col)) = (index(p), index(t)) {
                    counts[row][col] += 1;
                }
            }
        }

        Self {
            categories: categories.to_vec(),
            counts,
        }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn count(&self, predicted: usize, truth: usize) -> u64 {
        self.counts[predicted][truth]
    }

    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    pub fn column_totals(&self) -> Vec<u64> {
        (0..self.categories.len())
            .map(|col| self.counts.iter().map(|row| row[col]).sum())
            .collect()
    }

    /// Percent of each truth column, rounded to one decimal.
    /// An empty column stays at 0% rather than dividing by zero.
    pub fn percentages(&self) -> Vec<Vec<f64>> {
        let totals = self.column_totals();
        self.counts
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&totals)
                    .map(|(&n, &total)| {
                        let denom = if total > 0 { total } else { 1 };
                        round1(n as f64 / denom as f64 * 100.0)
                    })
                    .collect()
            })
            .collect()
    }

    /// Cell labels for the heatmap: percentage over `count/column_total`.
    pub fn annotations(&self) -> Vec<Vec<String>> {
        let totals = self.column_totals();
        self.percentages()
            .iter()
            .zip(&self.counts)
            .map(|(pct_row, count_row)| {
                pct_row
                    .iter()
                    .zip(count_row)
                    .zip(&totals)
                    .map(|((pct, n), total)| format!("{pct:.1}%\n{n}/{total}"))
                    .collect()
            })
            .collect()
    }

    /// Delimited-table layout handed to the plot renderer: one row per
    /// predicted category, percentage columns then annotation columns.
    pub fn table(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let mut header = vec!["predicted".to_string()];
        header.extend(self.categories.iter().map(|c| c.as_str().to_string()));
        header.extend(self.categories.iter().map(|c| format!("{}_annotation", c.as_str())));

        let rows = self
            .categories
            .iter()
            .zip(self.percentages())
            .zip(self.annotations())
            .map(|((c, pct), annot)| {
                let mut row = vec![c.as_str().to_string()];
                row.extend(pct.iter().map(|p| format!("{p:.1}")));
                row.extend(annot);
                row
            })
            .collect();

        (header, rows)
    }
}

/// Raw counts, predicted down the side and truth across the top.
impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .categories
            .iter()
            .map(|c| c.as_str().len())
            .max()
            .unwrap_or(0)
            .max(6);

        write!(f, "{:<width$}", "")?;
        for c in &self.categories {
            write!(f, " {:>width$}", c.as_str())?;
        }
        writeln!(f)?;
        for (c, row) in self.categories.iter().zip(&self.counts) {
            write!(f, "{:<width$}", c.as_str())?;
            for n in row {
                write!(f, " {n:>width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
