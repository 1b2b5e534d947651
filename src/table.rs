//! Plain-text table rendering for terminal output.

use std::borrow::Cow;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    aligns: Vec<Align>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = (S, Align)>,
        S: Into<String>,
    {
        let (headers, aligns) = headers
            .into_iter()
            .map(|(header, align)| (header.into(), align))
            .unzip();
        Self {
            headers,
            aligns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut widths = self
            .headers
            .iter()
            .map(|h| h.chars().count().max(3))
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (idx, cell) in row.iter().enumerate().take(widths.len()) {
                widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", self.format_row(&self.headers, &widths));
        let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", separator.join("  "));
        for row in &self.rows {
            let _ = writeln!(output, "{}", self.format_row(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    fn format_row(&self, values: &[String], widths: &[usize]) -> String {
        let cells = widths
            .iter()
            .enumerate()
            .map(|(idx, width)| {
                let value = values.get(idx).map(String::as_str).unwrap_or("");
                let value = sanitize_cell(value);
                match self.aligns.get(idx).copied().unwrap_or(Align::Left) {
                    Align::Left => format!("{value:<width$}"),
                    Align::Right => format!("{value:>width$}"),
                }
            })
            .collect::<Vec<_>>();
        cells.join("  ").trim_end().to_string()
    }
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn format_amount(value: f64) -> String {
    format!("{value:.2}")
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.2}%")
}

pub fn format_delta(value: f64) -> String {
    if value > 0.0 {
        format!("+{value:.2}%")
    } else {
        format!("{value:.2}%")
    }
}
