//! Tabular input parsing into labeled sentence records.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Literal separating sentence fragments inside a path description.
pub const SENTENCE_DELIMITER: &str = "->";
/// Column holding the category label unless overridden.
pub const DEFAULT_LABEL_COLUMN: &str = "Szenario";
/// Column holding the free-text path description unless overridden.
pub const DEFAULT_TEXT_COLUMN: &str = "Path Description";
/// Labels retained unless overridden.
pub const DEFAULT_ALLOWED_LABELS: [&str; 2] = ["Web(Patrick)", "VR(Patrick)"];

const MISSING_TEXT: &str = "<missing>";

/// Failures raised while turning raw input into a [`Dataset`].
#[derive(Debug, Error)]
pub enum MalformedInputError {
    /// A required column is not present in the header.
    #[error("required column {0:?} is missing from the input header")]
    MissingColumn(String),
    /// The delimited input could not be parsed.
    #[error("failed to parse delimited input: {0}")]
    Csv(#[from] csv::Error),
    /// The input could not be read.
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
}

/// Orientation of the input table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TableLayout {
    /// First line is the header, every following line is one row.
    #[default]
    Rows,
    /// Transposed table: the first column names the fields and every further
    /// column is one row. The first line only carries row identifiers and is
    /// ignored.
    Columns,
}

/// One labeled sentence fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Category label copied from the source row.
    pub label: String,
    /// Sentence fragment, untrimmed.
    pub sentence: String,
}

impl Record {
    /// Builds a record from its parts.
    pub fn new(label: impl Into<String>, sentence: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sentence: sentence.into(),
        }
    }
}

/// Ordered records; the position of each record aligns it with its embedding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    /// Wraps an ordered list of records.
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Labels in record order.
    pub fn labels(&self) -> Vec<String> {
        self.records.iter().map(|r| r.label.clone()).collect()
    }

    /// Sentences in record order.
    pub fn sentences(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.sentence.as_str()).collect()
    }

    fn push(&mut self, record: Record) {
        self.records.push(record);
    }
}

/// A source row that passed the label filter, kept for the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedRow {
    /// Row label.
    pub label: String,
    /// Raw path description, `None` when the cell was absent or empty.
    pub text: Option<String>,
    /// Number of records emitted from this row.
    pub records: usize,
}

/// Result of reading one input table.
#[derive(Debug, Clone, Default)]
pub struct ReadOutcome {
    /// Records extracted from retained rows.
    pub dataset: Dataset,
    /// Every row that passed the label filter, in input order.
    pub rows: Vec<RetainedRow>,
}

/// Knobs controlling how input tables are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Table orientation.
    pub layout: TableLayout,
    /// Name of the label column.
    pub label_column: String,
    /// Name of the free-text column.
    pub text_column: String,
    /// Labels whose rows are retained.
    pub allowed_labels: Vec<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            layout: TableLayout::Rows,
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            text_column: DEFAULT_TEXT_COLUMN.to_string(),
            allowed_labels: DEFAULT_ALLOWED_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ReaderOptions {
    fn is_label_allowed(&self, label: &str) -> bool {
        self.allowed_labels.iter().any(|allowed| allowed == label)
    }
}

/// Reads delimited tables into datasets.
#[derive(Debug, Clone, Default)]
pub struct DatasetReader {
    options: ReaderOptions,
}

impl DatasetReader {
    /// Creates a reader with the provided options.
    pub fn new(options: ReaderOptions) -> Self {
        Self { options }
    }

    /// Reads and parses the table stored at `path`.
    pub fn read_path(&self, path: &Path) -> Result<ReadOutcome, MalformedInputError> {
        let file = File::open(path)?;
        self.read(file)
    }

    /// Parses a table from any byte source.
    pub fn read<R: Read>(&self, source: R) -> Result<ReadOutcome, MalformedInputError> {
        let grid = self.load_grid(source)?;
        let (header, rows) = match self.options.layout {
            TableLayout::Rows => split_row_major(grid),
            TableLayout::Columns => split_column_major(grid),
        };
        let label_idx = find_column(&header, &self.options.label_column)?;
        let text_idx = find_column(&header, &self.options.text_column)?;

        let mut outcome = ReadOutcome::default();
        for row in rows {
            let Some(label) = row.get(label_idx) else {
                continue;
            };
            if !self.options.is_label_allowed(label) {
                continue;
            }
            let text = row
                .get(text_idx)
                .filter(|text| !text.is_empty())
                .cloned();
            let mut emitted = 0usize;
            if let Some(text) = &text {
                for fragment in text.split(SENTENCE_DELIMITER) {
                    if fragment.is_empty() {
                        continue;
                    }
                    outcome.dataset.push(Record::new(label.clone(), fragment));
                    emitted += 1;
                }
            } else {
                debug!(label = %label, "skipping row without path description");
            }
            outcome.rows.push(RetainedRow {
                label: label.clone(),
                text,
                records: emitted,
            });
        }

        info!(
            rows = outcome.rows.len(),
            records = outcome.dataset.len(),
            "read input table"
        );
        Ok(outcome)
    }

    fn load_grid<R: Read>(&self, source: R) -> Result<Vec<Vec<String>>, MalformedInputError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.options.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(source);
        let mut grid = Vec::new();
        for record in reader.records() {
            let record = record?;
            grid.push(record.iter().map(str::to_string).collect());
        }
        Ok(grid)
    }
}

fn split_row_major(mut grid: Vec<Vec<String>>) -> (Vec<String>, Vec<Vec<String>>) {
    if grid.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let header = grid.remove(0);
    (header, grid)
}

fn split_column_major(grid: Vec<Vec<String>>) -> (Vec<String>, Vec<Vec<String>>) {
    let fields: Vec<&Vec<String>> = grid.iter().skip(1).collect();
    let header = fields
        .iter()
        .map(|line| line.first().cloned().unwrap_or_default())
        .collect();
    let width = fields.iter().map(|line| line.len()).max().unwrap_or(0);
    let rows = (1..width)
        .map(|col| {
            fields
                .iter()
                .map(|line| line.get(col).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    (header, rows)
}

fn find_column(header: &[String], name: &str) -> Result<usize, MalformedInputError> {
    header
        .iter()
        .position(|column| column.trim() == name)
        .ok_or_else(|| MalformedInputError::MissingColumn(name.to_string()))
}

/// Writes a plain-text listing of every retained row for manual inspection.
pub fn write_transcript(path: &Path, rows: &[RetainedRow]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "# label\trecords\tpath description")?;
    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}",
            row.label,
            row.records,
            row.text.as_deref().unwrap_or(MISSING_TEXT)
        )?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn read(input: &str) -> ReadOutcome {
        DatasetReader::default()
            .read(input.as_bytes())
            .expect("read table")
    }

    #[test]
    fn splits_descriptions_into_records() {
        let outcome =
            read("Szenario;Path Description\nWeb(Patrick);open menu-> click login-> submit\n");

        assert_eq!(
            outcome.dataset.records(),
            &[
                Record::new("Web(Patrick)", "open menu"),
                Record::new("Web(Patrick)", " click login"),
                Record::new("Web(Patrick)", " submit"),
            ]
        );
    }

    #[test]
    fn drops_rows_outside_allow_list() {
        let outcome = read("Szenario;Path Description\nOther;a->b\n");
        assert!(outcome.dataset.is_empty());
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn skips_empty_fragments_and_missing_text() {
        let outcome = read(
            "Szenario;Path Description\n\
             VR(Patrick);->grab->->release->\n\
             Web(Patrick);\n\
             Web(Patrick)\n",
        );

        assert_eq!(outcome.dataset.sentences(), vec!["grab", "release"]);
        assert_eq!(outcome.rows.len(), 3);
        assert_eq!(outcome.rows[1].text, None);
        assert_eq!(outcome.rows[2].records, 0);
    }

    #[test]
    fn record_count_matches_non_empty_fragments() {
        let input = "Szenario;Path Description\n\
                     Web(Patrick);a->b->c\n\
                     Other;x->y\n\
                     VR(Patrick);d->->e\n";
        let outcome = read(input);
        assert_eq!(outcome.dataset.len(), 5);
    }

    #[test]
    fn missing_label_column_is_malformed() {
        let err = DatasetReader::default()
            .read("Scenario;Path Description\nWeb(Patrick);a\n".as_bytes())
            .expect_err("label column absent");
        match err {
            MalformedInputError::MissingColumn(name) => assert_eq!(name, "Szenario"),
            other => panic!("expected missing column, got {other:?}"),
        }
    }

    #[test]
    fn reads_transposed_tables() {
        let input = "id;p1;p2;p3\n\
                     Szenario;Web(Patrick);Other;VR(Patrick)\n\
                     Path Description;look->buy;skip;walk->turn\n";
        let reader = DatasetReader::new(ReaderOptions {
            layout: TableLayout::Columns,
            ..ReaderOptions::default()
        });
        let outcome = reader.read(input.as_bytes()).expect("read transposed");

        assert_eq!(
            outcome.dataset.labels(),
            vec!["Web(Patrick)", "Web(Patrick)", "VR(Patrick)", "VR(Patrick)"]
        );
        assert_eq!(outcome.dataset.sentences(), vec!["look", "buy", "walk", "turn"]);
    }

    #[test]
    fn transcript_lists_retained_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/transcript.txt");
        let outcome = read("Szenario;Path Description\nWeb(Patrick);a->b\nVR(Patrick);\n");

        write_transcript(&path, &outcome.rows).expect("write transcript");
        let text = fs::read_to_string(&path).expect("read transcript");
        assert!(text.contains("Web(Patrick)\t2\ta->b"));
        assert!(text.contains("VR(Patrick)\t0\t<missing>"));
    }
}
