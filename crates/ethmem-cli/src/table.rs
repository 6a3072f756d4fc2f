//! Box-drawn tables for memory listings.
//!
//! Widths are measured in characters, so entities with accents or CJK text
//! line up as long as the terminal renders them one cell wide.

use colored::Colorize;

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row. Extra cells are dropped; missing cells render empty.
    pub fn add_row(&mut self, cells: &[String]) {
        let row = (0..self.headers.len())
            .map(|i| cells.get(i).cloned().unwrap_or_default())
            .collect();
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                self.rows
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(h.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    fn rule(widths: &[usize], left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn line(cells: &[String], widths: &[usize], bold: bool) -> String {
        let cells: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| {
                let pad = " ".repeat(w - cell.chars().count());
                if bold {
                    format!(" {}{pad} ", cell.bold())
                } else {
                    format!(" {cell}{pad} ")
                }
            })
            .collect();
        format!("\u{2502}{}\u{2502}", cells.join("\u{2502}"))
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let mut lines = vec![
            Self::rule(&widths, '\u{250c}', '\u{252c}', '\u{2510}'),
            Self::line(&self.headers, &widths, true),
            Self::rule(&widths, '\u{251c}', '\u{253c}', '\u{2524}'),
        ];
        lines.extend(self.rows.iter().map(|r| Self::line(r, &widths, false)));
        lines.push(Self::rule(&widths, '\u{2514}', '\u{2534}', '\u{2518}'));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}
