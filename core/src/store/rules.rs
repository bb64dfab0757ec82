use super::{
    decimal_column, enum_column, json_column,
    tables::{get_table_on, insert_table_on, version_exists},
    RateStore,
};
use crate::{
    error::{RatingError, RatingResult},
    import::ImportRow,
    model::{
        NewRateTable, RateFactor, RateFee, RateModalFactor, RateRider, RateTable, RateTableEntry,
        RuleSet,
    },
    types::TableId,
};
use rusqlite::{params, Connection};
use std::sync::atomic::{AtomicBool, Ordering};

// ── Snapshot reads ─────────────────────────────────────────────────

pub(crate) fn entries_on(conn: &Connection, table_id: TableId) -> RatingResult<Vec<RateTableEntry>> {
    let mut stmt = conn.prepare(
        "SELECT rate_key, rate_value, dimensions
         FROM rate_table_entry WHERE rate_table_id = ?1
         ORDER BY rate_key ASC",
    )?;
    let rows = stmt
        .query_map(params![table_id], |row| {
            Ok(RateTableEntry {
                rate_key:   row.get(0)?,
                rate_value: decimal_column(row, 1)?,
                dimensions: json_column(row, 2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn factors_on(conn: &Connection, table_id: TableId) -> RatingResult<Vec<RateFactor>> {
    let mut stmt = conn.prepare(
        "SELECT factor_code, option_value, label, apply_mode, factor_value, sort_order
         FROM rate_factor WHERE rate_table_id = ?1
         ORDER BY sort_order ASC, factor_code ASC, option_value ASC",
    )?;
    let rows = stmt
        .query_map(params![table_id], |row| {
            Ok(RateFactor {
                factor_code:  row.get(0)?,
                option_value: row.get(1)?,
                label:        row.get(2)?,
                apply_mode:   enum_column(row, 3)?,
                factor_value: decimal_column(row, 4)?,
                sort_order:   row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn riders_on(conn: &Connection, table_id: TableId) -> RatingResult<Vec<RateRider>> {
    let mut stmt = conn.prepare(
        "SELECT rider_code, label, apply_mode, rider_value, is_default, rate_key_pattern, sort_order
         FROM rate_rider WHERE rate_table_id = ?1
         ORDER BY sort_order ASC, rider_code ASC",
    )?;
    let rows = stmt
        .query_map(params![table_id], |row| {
            Ok(RateRider {
                rider_code:       row.get(0)?,
                label:            row.get(1)?,
                apply_mode:       enum_column(row, 2)?,
                rider_value:      decimal_column(row, 3)?,
                is_default:       row.get::<_, i64>(4)? != 0,
                rate_key_pattern: row.get(5)?,
                sort_order:       row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn fees_on(conn: &Connection, table_id: TableId) -> RatingResult<Vec<RateFee>> {
    let mut stmt = conn.prepare(
        "SELECT fee_code, label, fee_type, apply_mode, fee_value, sort_order
         FROM rate_fee WHERE rate_table_id = ?1
         ORDER BY sort_order ASC, fee_code ASC",
    )?;
    let rows = stmt
        .query_map(params![table_id], |row| {
            Ok(RateFee {
                fee_code:   row.get(0)?,
                label:      row.get(1)?,
                fee_type:   enum_column(row, 2)?,
                apply_mode: enum_column(row, 3)?,
                fee_value:  decimal_column(row, 4)?,
                sort_order: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn modal_factors_on(
    conn: &Connection,
    table_id: TableId,
) -> RatingResult<Vec<RateModalFactor>> {
    let mut stmt = conn.prepare(
        "SELECT mode, factor, flat_fee
         FROM rate_modal_factor WHERE rate_table_id = ?1",
    )?;
    let mut rows = stmt
        .query_map(params![table_id], |row| {
            Ok(RateModalFactor {
                mode:     enum_column(row, 0)?,
                factor:   decimal_column(row, 1)?,
                flat_fee: decimal_column(row, 2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by_key(|m| m.mode);
    Ok(rows)
}

pub(crate) fn rule_set_on(conn: &Connection, table_id: TableId) -> RatingResult<RuleSet> {
    Ok(RuleSet {
        table:         get_table_on(conn, table_id)?,
        entries:       entries_on(conn, table_id)?,
        factors:       factors_on(conn, table_id)?,
        riders:        riders_on(conn, table_id)?,
        fees:          fees_on(conn, table_id)?,
        modal_factors: modal_factors_on(conn, table_id)?,
    })
}

// ── Upserts (natural-key keyed) ────────────────────────────────────

pub(crate) fn upsert_entry_on(
    conn: &Connection,
    table_id: TableId,
    e: &RateTableEntry,
) -> RatingResult<()> {
    conn.execute(
        "INSERT INTO rate_table_entry (rate_table_id, rate_key, rate_value, dimensions)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(rate_table_id, rate_key) DO UPDATE SET
             rate_value = excluded.rate_value,
             dimensions = excluded.dimensions",
        params![
            table_id,
            e.rate_key,
            e.rate_value.to_string(),
            serde_json::to_string(&e.dimensions)?,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_factor_on(
    conn: &Connection,
    table_id: TableId,
    f: &RateFactor,
) -> RatingResult<()> {
    conn.execute(
        "INSERT INTO rate_factor (
            rate_table_id, factor_code, option_value, label, apply_mode, factor_value, sort_order
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(rate_table_id, factor_code, option_value) DO UPDATE SET
             label        = excluded.label,
             apply_mode   = excluded.apply_mode,
             factor_value = excluded.factor_value,
             sort_order   = excluded.sort_order",
        params![
            table_id,
            f.factor_code,
            f.option_value,
            f.label,
            f.apply_mode.as_str(),
            f.factor_value.to_string(),
            f.sort_order,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_rider_on(
    conn: &Connection,
    table_id: TableId,
    r: &RateRider,
) -> RatingResult<()> {
    conn.execute(
        "INSERT INTO rate_rider (
            rate_table_id, rider_code, label, apply_mode, rider_value,
            is_default, rate_key_pattern, sort_order
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(rate_table_id, rider_code) DO UPDATE SET
             label            = excluded.label,
             apply_mode       = excluded.apply_mode,
             rider_value      = excluded.rider_value,
             is_default       = excluded.is_default,
             rate_key_pattern = excluded.rate_key_pattern,
             sort_order       = excluded.sort_order",
        params![
            table_id,
            r.rider_code,
            r.label,
            r.apply_mode.as_str(),
            r.rider_value.to_string(),
            if r.is_default { 1i64 } else { 0i64 },
            r.rate_key_pattern,
            r.sort_order,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_fee_on(conn: &Connection, table_id: TableId, f: &RateFee) -> RatingResult<()> {
    conn.execute(
        "INSERT INTO rate_fee (
            rate_table_id, fee_code, label, fee_type, apply_mode, fee_value, sort_order
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(rate_table_id, fee_code) DO UPDATE SET
             label      = excluded.label,
             fee_type   = excluded.fee_type,
             apply_mode = excluded.apply_mode,
             fee_value  = excluded.fee_value,
             sort_order = excluded.sort_order",
        params![
            table_id,
            f.fee_code,
            f.label,
            f.fee_type.as_str(),
            f.apply_mode.as_str(),
            f.fee_value.to_string(),
            f.sort_order,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_modal_factor_on(
    conn: &Connection,
    table_id: TableId,
    m: &RateModalFactor,
) -> RatingResult<()> {
    conn.execute(
        "INSERT INTO rate_modal_factor (rate_table_id, mode, factor, flat_fee)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(rate_table_id, mode) DO UPDATE SET
             factor   = excluded.factor,
             flat_fee = excluded.flat_fee",
        params![
            table_id,
            m.mode.as_str(),
            m.factor.to_string(),
            m.flat_fee.to_string(),
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_row_on(conn: &Connection, table_id: TableId, row: &ImportRow) -> RatingResult<()> {
    match row {
        ImportRow::Entry(e)  => upsert_entry_on(conn, table_id, e),
        ImportRow::Factor(f) => upsert_factor_on(conn, table_id, f),
        ImportRow::Rider(r)  => upsert_rider_on(conn, table_id, r),
        ImportRow::Fee(f)    => upsert_fee_on(conn, table_id, f),
        ImportRow::Modal(m)  => upsert_modal_factor_on(conn, table_id, m),
    }
}

impl RateStore {
    /// Upsert one import chunk in a single write transaction.
    ///
    /// `cancel` is checked before each row; on cancellation the rows
    /// already written are committed. Returns (rows written, cancelled).
    pub fn upsert_import_chunk(
        &mut self,
        table_id: TableId,
        rows: &[ImportRow],
        cancel: Option<&AtomicBool>,
    ) -> RatingResult<(usize, bool)> {
        self.with_table_write(table_id, |tx| {
            let mut written = 0;
            for row in rows {
                if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                    return Ok((written, true));
                }
                upsert_row_on(tx, table_id, row)?;
                written += 1;
            }
            Ok((written, false))
        })
    }

    /// Load a consistent snapshot of a table and its five collections.
    pub fn load_rules(&self, table_id: TableId) -> RatingResult<RuleSet> {
        // One read transaction so a concurrent import can't be observed half-applied.
        let tx = self.conn.unchecked_transaction()?;
        let rules = rule_set_on(&tx, table_id)?;
        tx.finish()?;
        Ok(rules)
    }

    pub fn entries(&self, table_id: TableId) -> RatingResult<Vec<RateTableEntry>> {
        entries_on(&self.conn, table_id)
    }

    pub fn factors(&self, table_id: TableId) -> RatingResult<Vec<RateFactor>> {
        factors_on(&self.conn, table_id)
    }

    pub fn riders(&self, table_id: TableId) -> RatingResult<Vec<RateRider>> {
        riders_on(&self.conn, table_id)
    }

    pub fn fees(&self, table_id: TableId) -> RatingResult<Vec<RateFee>> {
        fees_on(&self.conn, table_id)
    }

    pub fn modal_factors(&self, table_id: TableId) -> RatingResult<Vec<RateModalFactor>> {
        modal_factors_on(&self.conn, table_id)
    }

    pub fn upsert_entry(&mut self, table_id: TableId, entry: &RateTableEntry) -> RatingResult<()> {
        self.with_table_write(table_id, |tx| upsert_entry_on(tx, table_id, entry))
    }

    pub fn upsert_factor(&mut self, table_id: TableId, factor: &RateFactor) -> RatingResult<()> {
        self.with_table_write(table_id, |tx| upsert_factor_on(tx, table_id, factor))
    }

    pub fn upsert_rider(&mut self, table_id: TableId, rider: &RateRider) -> RatingResult<()> {
        self.with_table_write(table_id, |tx| upsert_rider_on(tx, table_id, rider))
    }

    pub fn upsert_fee(&mut self, table_id: TableId, fee: &RateFee) -> RatingResult<()> {
        self.with_table_write(table_id, |tx| upsert_fee_on(tx, table_id, fee))
    }

    pub fn upsert_modal_factor(
        &mut self,
        table_id: TableId,
        modal: &RateModalFactor,
    ) -> RatingResult<()> {
        self.with_table_write(table_id, |tx| upsert_modal_factor_on(tx, table_id, modal))
    }

    /// Copy a table and all five collections under the first free version
    /// produced by `candidates`. The copy is always inactive. Snapshot
    /// and write happen in one write transaction.
    pub fn copy_table<I>(
        &mut self,
        source_id: TableId,
        candidates: impl Fn(&str) -> I,
    ) -> RatingResult<RateTable>
    where
        I: Iterator<Item = String>,
    {
        let tx = self.write_txn()?;
        let source = rule_set_on(&tx, source_id)?;
        let product_type = source.table.product_type.clone();

        let mut version = None;
        for candidate in candidates(&source.table.version) {
            if !version_exists(&tx, &product_type, &candidate)? {
                version = Some(candidate);
                break;
            }
        }
        let version = version.ok_or_else(|| RatingError::DuplicateVersion {
            product_type: product_type.clone(),
            version:      source.table.version.clone(),
        })?;

        // Rows written before metadata was validated may hold a non-object;
        // the clone starts from an empty object so provenance is kept.
        let mut metadata = match &source.table.metadata {
            serde_json::Value::Object(obj) => obj.clone(),
            _ => serde_json::Map::new(),
        };
        metadata.insert(
            "cloned_from".to_string(),
            serde_json::json!({ "table_id": source_id, "version": source.table.version }),
        );

        let new_id = insert_table_on(
            &tx,
            &NewRateTable {
                product_type,
                version,
                name:            source.table.name.clone(),
                carrier_id:      source.table.carrier_id.clone(),
                effective_date:  source.table.effective_date,
                expiration_date: source.table.expiration_date,
                is_active:       false,
                metadata:        serde_json::Value::Object(metadata),
            },
        )?;
        for e in &source.entries {
            upsert_entry_on(&tx, new_id, e)?;
        }
        for f in &source.factors {
            upsert_factor_on(&tx, new_id, f)?;
        }
        for r in &source.riders {
            upsert_rider_on(&tx, new_id, r)?;
        }
        for f in &source.fees {
            upsert_fee_on(&tx, new_id, f)?;
        }
        for m in &source.modal_factors {
            upsert_modal_factor_on(&tx, new_id, m)?;
        }

        let table = get_table_on(&tx, new_id)?;
        tx.commit()?;
        Ok(table)
    }
}
