//! Box-drawing table renderer for CLI listings.

use colored::Colorize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

pub struct Table {
    headers: Vec<String>,
    alignments: Vec<Align>,
    rows: Vec<Vec<String>>,
}

/// Width in terminal columns. Cells may hold `…` and other multi-byte text.
fn width(text: &str) -> usize {
    text.chars().count()
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            alignments: vec![Align::Left; headers.len()],
            rows: Vec::new(),
        }
    }

    /// Out-of-range columns are ignored.
    pub fn align(mut self, col: usize, alignment: Align) -> Self {
        if let Some(a) = self.alignments.get_mut(col) {
            *a = alignment;
        }
        self
    }

    /// Extra cells are dropped; missing cells render empty.
    pub fn add_row(&mut self, cells: Vec<String>) {
        let mut row = cells;
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| width(h)).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(width(cell));
            }
        }
        widths
    }

    fn pad(text: &str, target: usize, alignment: Align) -> String {
        let fill = " ".repeat(target.saturating_sub(width(text)));
        match alignment {
            Align::Left => format!("{text}{fill}"),
            Align::Right => format!("{fill}{text}"),
        }
    }

    fn border(widths: &[usize], left: &str, mid: &str, right: &str) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(mid))
    }

    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut lines = vec![Self::border(&widths, "\u{250c}", "\u{252c}", "\u{2510}")];

        let header: Vec<String> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| format!(" {} ", Self::pad(h, widths[i], self.alignments[i]).bold()))
            .collect();
        lines.push(format!("\u{2502}{}\u{2502}", header.join("\u{2502}")));
        lines.push(Self::border(&widths, "\u{251c}", "\u{253c}", "\u{2524}"));

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| format!(" {} ", Self::pad(cell, widths[i], self.alignments[i])))
                .collect();
            lines.push(format!("\u{2502}{}\u{2502}", cells.join("\u{2502}")));
        }

        lines.push(Self::border(&widths, "\u{2514}", "\u{2534}", "\u{2518}"));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}
