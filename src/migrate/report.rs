//! Human-readable plan and summary output.
//!
//! Advisory only: nothing parses this output.

use console::style;

/// Number of identifiers shown in a sample column.
pub const SAMPLE_LIMIT: usize = 10;

/// One row of a stage summary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub status: String,
    pub table: String,
    pub count: usize,
    pub sample: String,
}

impl SummaryRow {
    pub fn new<S: AsRef<str>>(status: &str, table: &str, items: &[S], limit: usize) -> Self {
        Self {
            status: status.to_string(),
            table: table.to_string(),
            count: items.len(),
            sample: sample(items, limit),
        }
    }
}

/// Join the first `limit` items with `", "`, adding `...` when truncated.
pub fn sample<S: AsRef<str>>(items: &[S], limit: usize) -> String {
    let mut out = items
        .iter()
        .take(limit)
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > limit {
        out.push_str("...");
    }
    out
}

/// Outcome of one stage for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Stage name ("Merge", "Copy", "Link", "Stage").
    pub stage: &'static str,
    pub table: String,
    pub dry_run: bool,
    pub rows: Vec<SummaryRow>,
    /// Records sent to the store.
    pub written: usize,
}

impl StageReport {
    /// Count of the row with the given status, or zero.
    pub fn count(&self, status: &str) -> usize {
        self.rows
            .iter()
            .find(|r| r.status == status)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// Status line for this stage.
    pub fn status_line(&self) -> String {
        let noun = match self.stage {
            "Merge" | "Link" => "updated",
            _ => "created",
        };
        if self.dry_run {
            format!("Dry Run Mode: no records were {}.", noun)
        } else {
            format!("{} Complete: records have been {}.", self.stage, noun)
        }
    }

    /// Print the status line and summary table to stdout.
    pub fn print(&self) {
        let line = self.status_line();
        if self.dry_run {
            println!("\n{} {}", style("!").yellow(), style(line).bold());
        } else {
            println!("\n{} {}", style("✓").green(), style(line).bold());
        }
        print_table(&self.rows);
    }
}

/// Render summary rows as an aligned table.
pub fn render_table(rows: &[SummaryRow]) -> String {
    let headers = ["Status", "Table", "Count", "Sample"];
    let status_w = rows
        .iter()
        .map(|r| r.status.len())
        .chain([headers[0].len()])
        .max()
        .unwrap_or(0);
    let table_w = rows
        .iter()
        .map(|r| r.table.len())
        .chain([headers[1].len()])
        .max()
        .unwrap_or(0);
    let count_w = rows
        .iter()
        .map(|r| r.count.to_string().len())
        .chain([headers[2].len()])
        .max()
        .unwrap_or(0);

    let mut out = format!(
        "  {:<sw$}  {:<tw$}  {:>cw$}  {}\n",
        headers[0],
        headers[1],
        headers[2],
        headers[3],
        sw = status_w,
        tw = table_w,
        cw = count_w
    );
    for row in rows {
        out.push_str(&format!(
            "  {:<sw$}  {:<tw$}  {:>cw$}  {}\n",
            row.status,
            row.table,
            row.count,
            row.sample,
            sw = status_w,
            tw = table_w,
            cw = count_w
        ));
    }
    out
}

pub fn print_table(rows: &[SummaryRow]) {
    let rendered = render_table(rows);
    let mut lines = rendered.lines();
    if let Some(header) = lines.next() {
        println!("{}", style(header).dim());
    }
    for line in lines {
        println!("{}", line);
    }
}
