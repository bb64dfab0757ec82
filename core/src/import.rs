//! Bulk import of rule rows into a rate table.
//!
//! Two operations share one schema table (`ResourceKind::required_columns`):
//!   - `preview`: dry run. Header check, per-row validity counts, samples.
//!     Never writes.
//!   - `import`: same validity check, then an idempotent upsert of every
//!     valid row on its natural key, in chunked write transactions.
//!
//! Rows become typed `ImportRow` records before anything touches the
//! store. A row whose numbers or enum values don't parse is skipped on
//! its own; it never fails the whole import.

use crate::{
    config::RatingConfig,
    error::{RatingError, RatingResult},
    model::{
        ApplyMode, FeeType, PaymentMode, RateFactor, RateFee, RateModalFactor, RateRider,
        RateTableEntry,
    },
    store::RateStore,
    types::TableId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    io::Read,
    path::Path,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

// ── Resource schema ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Entries,
    Factors,
    Riders,
    Fees,
    ModalFactors,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Entries      => "entries",
            ResourceKind::Factors      => "factors",
            ResourceKind::Riders       => "riders",
            ResourceKind::Fees         => "fees",
            ResourceKind::ModalFactors => "modal_factors",
        }
    }

    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Entries      => &["rate_key", "rate_value"],
            ResourceKind::Factors      => &["factor_code", "option_value", "factor_value"],
            ResourceKind::Riders       => &["rider_code", "rider_value"],
            ResourceKind::Fees         => &["fee_code", "fee_value"],
            ResourceKind::ModalFactors => &["mode", "factor"],
        }
    }
}

impl FromStr for ResourceKind {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "entries"       => Ok(ResourceKind::Entries),
            "factors"       => Ok(ResourceKind::Factors),
            "riders"        => Ok(ResourceKind::Riders),
            "fees"          => Ok(ResourceKind::Fees),
            "modal_factors" => Ok(ResourceKind::ModalFactors),
            _ => Err(RatingError::UnknownResource { name: s.to_string() }),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Raw rows ───────────────────────────────────────────────────────

/// Header plus data rows, as read from a spreadsheet export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    pub headers: Vec<String>,
    pub rows:    Vec<Vec<String>>,
}

impl RawRows {
    pub fn new<H, R>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = Vec<String>>,
    {
        Self {
            headers: headers.into_iter().map(|h| h.into().trim().to_string()).collect(),
            rows:    rows.into_iter().collect(),
        }
    }

    /// Read a delimited file. Ragged rows are kept as-is so the validator
    /// can count them instead of the parser rejecting the whole file.
    pub fn from_csv_reader<R: Read>(reader: R, delimiter: u8) -> RatingResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self::new(headers, rows))
    }

    pub fn from_path<P: AsRef<Path>>(path: P, delimiter: u8) -> RatingResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file, delimiter)
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Required columns absent from the header, in schema order.
    pub fn missing_columns(&self, kind: ResourceKind) -> Vec<String> {
        kind.required_columns()
            .iter()
            .filter(|c| self.column(c).is_none())
            .map(|c| c.to_string())
            .collect()
    }

    /// Same width as the header and every required field non-blank.
    fn row_is_complete(&self, row: &[String], required: &[usize]) -> bool {
        row.len() == self.headers.len()
            && required
                .iter()
                .all(|&i| row.get(i).is_some_and(|v| !v.trim().is_empty()))
    }
}

// ── Typed rows ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ImportRow {
    Entry(RateTableEntry),
    Factor(RateFactor),
    Rider(RateRider),
    Fee(RateFee),
    Modal(RateModalFactor),
}

/// Field lookup over one row, by header name.
struct RowView<'a> {
    rows: &'a RawRows,
    row:  &'a [String],
}

impl<'a> RowView<'a> {
    fn get(&self, name: &str) -> Option<&'a str> {
        self.rows
            .column(name)
            .and_then(|i| self.row.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn text(&self, name: &'static str) -> RatingResult<String> {
        self.get(name)
            .map(str::to_string)
            .ok_or(RatingError::InvalidValue { field: name, value: String::new() })
    }

    fn decimal(&self, name: &'static str) -> RatingResult<Decimal> {
        let raw = self.text(name)?;
        raw.parse::<Decimal>()
            .map_err(|_| RatingError::InvalidValue { field: name, value: raw })
    }

    fn opt_decimal(&self, name: &'static str, default: Decimal) -> RatingResult<Decimal> {
        match self.get(name) {
            Some(raw) => raw
                .parse::<Decimal>()
                .map_err(|_| RatingError::InvalidValue { field: name, value: raw.to_string() }),
            None => Ok(default),
        }
    }

    fn sort_order(&self) -> RatingResult<i64> {
        match self.get("sort_order") {
            Some(raw) => raw.parse::<i64>().map_err(|_| RatingError::InvalidValue {
                field: "sort_order",
                value: raw.to_string(),
            }),
            None => Ok(0),
        }
    }

    fn flag(&self, name: &'static str) -> RatingResult<bool> {
        match self.get(name) {
            None => Ok(false),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Ok(true),
                "false" | "0" | "no" | "n" => Ok(false),
                _ => Err(RatingError::InvalidValue { field: name, value: raw.to_string() }),
            },
        }
    }

    fn apply_mode(&self, allowed: &[ApplyMode], default: ApplyMode) -> RatingResult<ApplyMode> {
        match self.get("apply_mode") {
            Some(raw) => ApplyMode::parse_for(raw, allowed, "apply_mode"),
            None => Ok(default),
        }
    }
}

impl ImportRow {
    /// Convert one structurally valid row into its typed record.
    pub fn parse(kind: ResourceKind, rows: &RawRows, row: &[String]) -> RatingResult<Self> {
        let v = RowView { rows, row };
        let label = v.get("label").map(str::to_string);

        Ok(match kind {
            ResourceKind::Entries => {
                let dimensions = match v.get("dimensions") {
                    Some(raw) => serde_json::from_str::<BTreeMap<String, serde_json::Value>>(raw)
                        .map_err(|_| RatingError::InvalidValue {
                            field: "dimensions",
                            value: raw.to_string(),
                        })?,
                    None => BTreeMap::new(),
                };
                ImportRow::Entry(RateTableEntry {
                    rate_key:   v.text("rate_key")?,
                    rate_value: v.decimal("rate_value")?,
                    dimensions,
                })
            }
            ResourceKind::Factors => ImportRow::Factor(RateFactor {
                factor_code:  v.text("factor_code")?,
                option_value: v.text("option_value")?,
                label,
                apply_mode:   v.apply_mode(ApplyMode::FACTOR_MODES, ApplyMode::Multiply)?,
                factor_value: v.decimal("factor_value")?,
                sort_order:   v.sort_order()?,
            }),
            ResourceKind::Riders => ImportRow::Rider(RateRider {
                rider_code:       v.text("rider_code")?,
                label,
                apply_mode:       v.apply_mode(ApplyMode::RIDER_MODES, ApplyMode::Add)?,
                rider_value:      v.decimal("rider_value")?,
                is_default:       v.flag("is_default")?,
                rate_key_pattern: v.get("rate_key_pattern").map(str::to_string),
                sort_order:       v.sort_order()?,
            }),
            ResourceKind::Fees => ImportRow::Fee(RateFee {
                fee_code:   v.text("fee_code")?,
                label,
                fee_type:   v.get("fee_type").map(FeeType::from_str).transpose()?.unwrap_or(FeeType::Fee),
                apply_mode: v.apply_mode(ApplyMode::FEE_MODES, ApplyMode::Add)?,
                fee_value:  v.decimal("fee_value")?,
                sort_order: v.sort_order()?,
            }),
            ResourceKind::ModalFactors => ImportRow::Modal(RateModalFactor {
                mode:     v.text("mode")?.parse::<PaymentMode>()?,
                factor:   v.decimal("factor")?,
                flat_fee: v.opt_decimal("flat_fee", Decimal::ZERO)?,
            }),
        })
    }
}

// ── Results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportPreview {
    /// False when required header columns are missing.
    pub valid:           bool,
    pub missing_columns: Vec<String>,
    pub rows_scanned:    usize,
    pub valid_rows:      usize,
    pub invalid_rows:    usize,
    /// Structurally valid rows whose values won't parse; import skips these.
    pub malformed_rows:  usize,
    pub sample_rows:     Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported:          usize,
    pub skipped_invalid:   usize,
    pub skipped_malformed: usize,
    pub cancelled:         bool,
}

// ── Importer ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TableImporter {
    chunk_size:  usize,
    sample_rows: usize,
}

impl TableImporter {
    pub fn new(config: &RatingConfig) -> Self {
        Self {
            chunk_size:  config.import_chunk_size.max(1),
            sample_rows: config.preview_sample_rows,
        }
    }

    pub fn preview(
        &self,
        store: &RateStore,
        table_id: TableId,
        rows: &RawRows,
        kind: ResourceKind,
    ) -> RatingResult<ImportPreview> {
        store.get_table(table_id)?;

        let missing = rows.missing_columns(kind);
        if !missing.is_empty() {
            log::info!("import: preview {kind} for table {table_id} missing columns {missing:?}");
            return Ok(ImportPreview {
                valid: false,
                missing_columns: missing,
                ..ImportPreview::default()
            });
        }

        let required = required_indices(rows, kind);
        let mut preview = ImportPreview {
            valid: true,
            ..ImportPreview::default()
        };
        for row in &rows.rows {
            preview.rows_scanned += 1;
            if !rows.row_is_complete(row, &required) {
                preview.invalid_rows += 1;
                continue;
            }
            preview.valid_rows += 1;
            if ImportRow::parse(kind, rows, row).is_err() {
                preview.malformed_rows += 1;
            }
            if preview.sample_rows.len() < self.sample_rows {
                preview.sample_rows.push(
                    rows.headers.iter().cloned().zip(row.iter().cloned()).collect(),
                );
            }
        }
        Ok(preview)
    }

    /// Upsert every valid row. Invalid and malformed rows are skipped and
    /// counted. `cancel` is checked between rows; rows already written in
    /// the current chunk are kept.
    pub fn import(
        &self,
        store: &mut RateStore,
        table_id: TableId,
        rows: &RawRows,
        kind: ResourceKind,
        cancel: Option<&AtomicBool>,
    ) -> RatingResult<ImportSummary> {
        let missing = rows.missing_columns(kind);
        if !missing.is_empty() {
            return Err(RatingError::SchemaMismatch { missing });
        }
        if store.is_frozen(table_id)? {
            return Err(RatingError::TableFrozen { table_id });
        }

        let required = required_indices(rows, kind);
        let mut summary = ImportSummary::default();
        let mut pending: Vec<ImportRow> = Vec::with_capacity(self.chunk_size);

        for (n, row) in rows.rows.iter().enumerate() {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                summary.cancelled = true;
                break;
            }
            if !rows.row_is_complete(row, &required) {
                summary.skipped_invalid += 1;
                log::warn!("import: {kind} row {} skipped: incomplete", n + 1);
                continue;
            }
            match ImportRow::parse(kind, rows, row) {
                Ok(parsed) => pending.push(parsed),
                Err(e) => {
                    summary.skipped_malformed += 1;
                    log::warn!("import: {kind} row {} skipped: {e}", n + 1);
                    continue;
                }
            }
            if pending.len() == self.chunk_size {
                let (written, cancelled) = store.upsert_import_chunk(table_id, &pending, cancel)?;
                summary.imported += written;
                pending.clear();
                if cancelled {
                    summary.cancelled = true;
                    break;
                }
            }
        }

        if !summary.cancelled && !pending.is_empty() {
            let (written, cancelled) = store.upsert_import_chunk(table_id, &pending, cancel)?;
            summary.imported += written;
            summary.cancelled = cancelled;
        }

        log::info!(
            "import: {kind} into table {table_id}: imported={} invalid={} malformed={} cancelled={}",
            summary.imported, summary.skipped_invalid, summary.skipped_malformed, summary.cancelled
        );
        Ok(summary)
    }
}

fn required_indices(rows: &RawRows, kind: ResourceKind) -> Vec<usize> {
    kind.required_columns()
        .iter()
        .filter_map(|c| rows.column(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawRows {
        RawRows::new(
            headers.iter().copied(),
            rows.iter().map(|r| r.iter().map(|s| s.to_string()).collect()),
        )
    }

    #[test]
    fn csv_reader_keeps_ragged_rows() {
        let data = "rate_key,rate_value\nstandard,100\nbroken\n";
        let rows = RawRows::from_csv_reader(data.as_bytes(), b',').unwrap();
        assert_eq!(rows.headers, vec!["rate_key", "rate_value"]);
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.rows[1].len(), 1);
    }

    #[test]
    fn missing_columns_follow_schema_order() {
        let rows = raw(&["option_value", "label"], &[]);
        assert_eq!(
            rows.missing_columns(ResourceKind::Factors),
            vec!["factor_code".to_string(), "factor_value".to_string()]
        );
    }

    #[test]
    fn optional_columns_fall_back_to_defaults() {
        let rows = raw(&["fee_code", "fee_value"], &[&["policy_fee", "25"]]);
        let parsed = ImportRow::parse(ResourceKind::Fees, &rows, &rows.rows[0]).unwrap();
        let ImportRow::Fee(fee) = parsed else { panic!("expected fee row") };
        assert_eq!(fee.fee_type, FeeType::Fee);
        assert_eq!(fee.apply_mode, ApplyMode::Add);
        assert_eq!(fee.sort_order, 0);
    }

    #[test]
    fn disallowed_apply_mode_is_malformed() {
        let rows = raw(
            &["rider_code", "rider_value", "apply_mode"],
            &[&["cola", "0.1", "percent"]],
        );
        assert!(ImportRow::parse(ResourceKind::Riders, &rows, &rows.rows[0]).is_err());
    }

    #[test]
    fn resource_kind_round_trips_through_its_name() {
        for kind in [
            ResourceKind::Entries,
            ResourceKind::Factors,
            ResourceKind::Riders,
            ResourceKind::Fees,
            ResourceKind::ModalFactors,
        ] {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("premiums".parse::<ResourceKind>().is_err());
    }
}
