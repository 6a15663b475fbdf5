use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th, td").unwrap());

const MAX_COLSPAN: usize = 64;

/// Untyped rows from the first table on a page. `header` is kept for
/// logging only; columns are always addressed by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Widest of the header and every data row.
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0)
    }

    /// Appends another page. The first non-empty header wins.
    pub fn extend(&mut self, other: RawTable) {
        if self.header.is_empty() {
            self.header = other.header;
        }
        self.rows.extend(other.rows);
    }
}

/// Extract the first `<table>` in document order. Returns `None` when the
/// page has no table, or the table has no rows at all.
pub fn first_table(html: &str) -> Option<RawTable> {
    let doc = Html::parse_document(html);
    let table = doc.select(&TABLE).next()?;

    let mut out = RawTable::default();
    for (i, tr) in table.select(&ROW).enumerate() {
        // nested tables belong to their own <table>, not this one
        if !owned_by(tr, table) {
            continue;
        }
        let cells: Vec<ElementRef> = tr.select(&CELL).filter(|c| owned_by_row(*c, tr)).collect();
        if cells.is_empty() {
            continue;
        }
        let header_row = in_thead(tr)
            || (i == 0 && cells.iter().all(|c| c.value().name() == "th"));
        let values = expand_cells(&cells);
        if header_row && out.header.is_empty() && out.rows.is_empty() {
            out.header = values;
        } else if !header_row {
            out.rows.push(values);
        }
    }

    if out.header.is_empty() && out.rows.is_empty() {
        return None;
    }
    let width = out.width();
    for row in &mut out.rows {
        row.resize(width, String::new());
    }
    Some(out)
}

fn expand_cells(cells: &[ElementRef]) -> Vec<String> {
    let mut values = Vec::with_capacity(cells.len());
    for cell in cells {
        let text = cell_text(*cell);
        let span = cell
            .value()
            .attr("colspan")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, MAX_COLSPAN);
        values.extend(std::iter::repeat(text).take(span));
    }
    values
}

/// Descendant text with whitespace runs collapsed.
fn cell_text(cell: ElementRef) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn owned_by(tr: ElementRef, table: ElementRef) -> bool {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "table")
        .is_some_and(|t| t.id() == table.id())
}

fn owned_by_row(cell: ElementRef, tr: ElementRef) -> bool {
    cell.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "tr")
        .is_some_and(|r| r.id() == tr.id())
}

fn in_thead(tr: ElementRef) -> bool {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|e| e.value().name() != "table")
        .any(|e| e.value().name() == "thead")
}
