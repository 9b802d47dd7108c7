//! Rendering of a finished power surface.
//!
//! [`TextChart`] draws a ratatui line chart with one dataset per sparsity level,
//! power against the sample ratio, legend keyed by each level's nonzero count.
//! The chart is rendered into an off-screen buffer whose rows are written out as text.
//! [`CsvExport`] writes the same surface in long format for external plotting.

use itertools::iproduct;
use ratatui::prelude::*;
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

use crate::experiment::PowerResults;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to write the power chart: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write power results as CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// A consumer of a finished power surface.
pub trait PowerRenderer {
    fn render(&mut self, results: &PowerResults) -> Result<(), RenderError>;
}

const MARKERS: [symbols::Marker; 5] = [
    symbols::Marker::Braille,
    symbols::Marker::Dot,
    symbols::Marker::Block,
    symbols::Marker::Bar,
    symbols::Marker::HalfBlock,
];

const COLORS: [Color; 5] = [
    Color::Cyan,
    Color::LightBlue,
    Color::Green,
    Color::Yellow,
    Color::Magenta,
];

/// Line chart of power (y) against `n_samples / n_features` (x), one dataset per
/// sparsity level, drawn off-screen and dumped as plain text.
pub struct TextChart<W: Write> {
    out: W,
    width: u16,
    height: u16,
}

impl<W: Write> TextChart<W> {
    pub fn new(out: W) -> Self {
        Self::with_size(out, 80, 24)
    }

    pub fn with_size(out: W, width: u16, height: u16) -> Self {
        Self {
            out,
            width: width.max(20),
            height: height.max(10),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PowerRenderer for TextChart<W> {
    fn render(&mut self, results: &PowerResults) -> Result<(), RenderError> {
        let ratios = &results.ratios;
        if ratios.is_empty() {
            return Ok(());
        }
        let (mut x_min, mut x_max) = (ratios[0], ratios[ratios.len() - 1]);
        if x_max <= x_min {
            x_min -= 0.5;
            x_max += 0.5;
        }

        let curves: Vec<Vec<(f64, f64)>> = results
            .power
            .outer_iter()
            .map(|row| ratios.iter().copied().zip(row.iter().copied()).collect())
            .collect();
        let datasets = curves
            .iter()
            .zip(&results.nonzero_counts)
            .enumerate()
            .map(|(level, (curve, nonzero))| {
                Dataset::default()
                    .name(format!("sparsity={nonzero}"))
                    .marker(MARKERS[level % MARKERS.len()])
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(COLORS[level % COLORS.len()]))
                    .data(curve)
            })
            .collect();

        let chart = Chart::new(datasets)
            .block(Block::default().title("Exact support recovery").borders(Borders::ALL))
            .hidden_legend_constraints((Constraint::Ratio(1, 2), Constraint::Ratio(1, 1)))
            .x_axis(
                Axis::default()
                    .title("n/p (n_samples / n_features)")
                    .bounds([x_min, x_max])
                    .labels(vec![
                        Line::from(format!("{x_min:.2}")),
                        Line::from(format!("{x_max:.2}")),
                    ]),
            )
            .y_axis(
                Axis::default()
                    .title("P(exact recovery)")
                    .bounds([0.0, 1.0])
                    .labels(vec![Line::from("0.0"), Line::from("0.5"), Line::from("1.0")]),
            );

        let area = Rect::new(0, 0, self.width, self.height);
        let mut buffer = Buffer::empty(area);
        chart.render(area, &mut buffer);

        for y in 0..area.height {
            let line: String = (0..area.width)
                .map(|x| buffer.cell((x, y)).map_or(" ", |cell| cell.symbol()))
                .collect();
            writeln!(self.out, "{}", line.trim_end())?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Long-format CSV: one record per (sparsity level, ratio) cell.
pub struct CsvExport<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvExport<File> {
    pub fn create(path: &Path) -> Result<Self, RenderError> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
        })
    }
}

impl<W: Write> CsvExport<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
        }
    }

    pub fn into_inner(self) -> Result<W, RenderError> {
        self.writer
            .into_inner()
            .map_err(|e| RenderError::Io(e.into_error()))
    }
}

impl<W: Write> PowerRenderer for CsvExport<W> {
    fn render(&mut self, results: &PowerResults) -> Result<(), RenderError> {
        self.writer
            .write_record(["alpha", "nonzero", "ratio", "n_samples", "penalty", "power"])?;
        let (n_rows, n_cols) = results.power.dim();
        for (row, column) in iproduct!(0..n_rows, 0..n_cols) {
            self.writer.write_record([
                results.alphas[row].to_string(),
                results.nonzero_counts[row].to_string(),
                results.ratios[column].to_string(),
                results.sample_counts[column].to_string(),
                results.penalties[[row, column]].to_string(),
                results.power[[row, column]].to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
