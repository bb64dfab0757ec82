use super::{bump_revision, current_revision, is_referenced, json_column, RateStore};
use crate::{
    error::{RatingError, RatingResult},
    model::{NewRateTable, RateTable, TableUpdate},
    types::TableId,
};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const TABLE_COLUMNS: &str = "id, product_type, version, name, carrier_id, effective_date,
     expiration_date, is_active, metadata, revision, created_at";

/// Lookup parameters for `RateStore::resolve_active_table`.
#[derive(Debug, Clone)]
pub struct TableQuery<'a> {
    pub product_type: &'a str,
    pub carrier_id:   Option<&'a str>,
    /// Exact version pin; bypasses the active flag and date window.
    pub version:      Option<&'a str>,
    pub as_of:        NaiveDate,
}

impl<'a> TableQuery<'a> {
    pub fn new(product_type: &'a str) -> Self {
        Self {
            product_type,
            carrier_id: None,
            version: None,
            as_of: Utc::now().date_naive(),
        }
    }
}

pub(crate) fn table_from_row(row: &Row<'_>) -> rusqlite::Result<RateTable> {
    Ok(RateTable {
        id:              row.get(0)?,
        product_type:    row.get(1)?,
        version:         row.get(2)?,
        name:            row.get(3)?,
        carrier_id:      row.get(4)?,
        effective_date:  row.get(5)?,
        expiration_date: row.get(6)?,
        is_active:       row.get::<_, i64>(7)? != 0,
        metadata:        json_column(row, 8)?,
        revision:        row.get(9)?,
        created_at:      row.get(10)?,
    })
}

pub(crate) fn get_table_on(conn: &Connection, table_id: TableId) -> RatingResult<RateTable> {
    conn.query_row(
        &format!("SELECT {TABLE_COLUMNS} FROM rate_table WHERE id = ?1"),
        params![table_id],
        table_from_row,
    )
    .optional()?
    .ok_or(RatingError::TableNotFound { table_id })
}

pub(crate) fn version_exists(
    conn: &Connection,
    product_type: &str,
    version: &str,
) -> RatingResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM rate_table WHERE product_type = ?1 AND version = ?2",
        params![product_type, version],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Table metadata is always a JSON object; clone provenance and the
/// rating profile are keys inside it.
pub(crate) fn check_metadata(metadata: &serde_json::Value) -> RatingResult<()> {
    if metadata.is_object() {
        return Ok(());
    }
    Err(RatingError::InvalidValue {
        field: "metadata",
        value: metadata.to_string(),
    })
}

pub(crate) fn insert_table_on(conn: &Connection, new: &NewRateTable) -> RatingResult<TableId> {
    check_metadata(&new.metadata)?;
    if version_exists(conn, &new.product_type, &new.version)? {
        return Err(RatingError::DuplicateVersion {
            product_type: new.product_type.clone(),
            version:      new.version.clone(),
        });
    }
    conn.execute(
        "INSERT INTO rate_table (
            product_type, version, name, carrier_id, effective_date,
            expiration_date, is_active, metadata, revision, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
        params![
            new.product_type,
            new.version,
            new.name,
            new.carrier_id,
            new.effective_date,
            new.expiration_date,
            if new.is_active { 1i64 } else { 0i64 },
            serde_json::to_string(&new.metadata)?,
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl RateStore {
    // ── Read path ──────────────────────────────────────────────

    pub fn get_table(&self, table_id: TableId) -> RatingResult<RateTable> {
        get_table_on(&self.conn, table_id)
    }

    pub fn find_table(&self, product_type: &str, version: &str) -> RatingResult<Option<RateTable>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {TABLE_COLUMNS} FROM rate_table
                     WHERE product_type = ?1 AND version = ?2"
                ),
                params![product_type, version],
                table_from_row,
            )
            .optional()?)
    }

    /// All versions of a product, newest first.
    pub fn list_tables(&self, product_type: &str) -> RatingResult<Vec<RateTable>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TABLE_COLUMNS} FROM rate_table
             WHERE product_type = ?1
             ORDER BY id DESC"
        ))?;
        let tables = stmt
            .query_map(params![product_type], table_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    /// Resolve the table a rating request should run against.
    ///
    /// An explicit version returns that exact (product type, version)
    /// pair whatever its active flag, so historical quotes can be re-run.
    /// Otherwise: the most recently effective active table in force on
    /// `as_of`, filtered by carrier when one is given.
    pub fn resolve_active_table(&self, query: &TableQuery<'_>) -> RatingResult<RateTable> {
        let not_found = || RatingError::NoActiveTable {
            product_type: query.product_type.to_string(),
            carrier_id:   query.carrier_id.map(str::to_string),
        };

        if let Some(version) = query.version {
            return self.find_table(query.product_type, version)?.ok_or_else(not_found);
        }

        let table = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TABLE_COLUMNS} FROM rate_table
                     WHERE product_type = ?1
                       AND is_active = 1
                       AND (?2 IS NULL OR carrier_id = ?2)
                       AND (effective_date IS NULL OR effective_date <= ?3)
                       AND (expiration_date IS NULL OR expiration_date > ?3)
                     ORDER BY effective_date IS NULL, effective_date DESC, id DESC
                     LIMIT 1"
                ),
                params![query.product_type, query.carrier_id, query.as_of],
                table_from_row,
            )
            .optional()?;
        table.ok_or_else(not_found)
    }

    /// Whether any rating run references this table.
    pub fn is_frozen(&self, table_id: TableId) -> RatingResult<bool> {
        is_referenced(&self.conn, table_id)
    }

    // ── Administrative write path ──────────────────────────────

    pub fn create_table(&mut self, new: &NewRateTable) -> RatingResult<RateTable> {
        let tx = self.write_txn()?;
        let table_id = insert_table_on(&tx, new)?;
        let table = get_table_on(&tx, table_id)?;
        tx.commit()?;
        log::info!(
            "store: created rate table {} ({} {}, active={})",
            table.id, table.product_type, table.version, table.is_active
        );
        Ok(table)
    }

    pub fn update_table(&mut self, table_id: TableId, update: &TableUpdate) -> RatingResult<RateTable> {
        self.with_table_write(table_id, |tx| {
            let current = get_table_on(tx, table_id)?;
            let metadata = match &update.metadata {
                Some(m) => {
                    check_metadata(m)?;
                    serde_json::to_string(m)?
                }
                None => serde_json::to_string(&current.metadata)?,
            };
            tx.execute(
                "UPDATE rate_table
                 SET name = ?1, effective_date = ?2, expiration_date = ?3, metadata = ?4
                 WHERE id = ?5",
                params![
                    update.name.as_ref().unwrap_or(&current.name),
                    update.effective_date.or(current.effective_date),
                    update.expiration_date.or(current.expiration_date),
                    metadata,
                    table_id,
                ],
            )?;
            Ok(())
        })?;
        self.get_table(table_id)
    }

    /// Flip the active flag. Allowed on frozen tables: deactivation is
    /// how a referenced version is retired.
    pub fn set_active(&mut self, table_id: TableId, active: bool) -> RatingResult<RateTable> {
        let tx = self.write_txn()?;
        let revision = current_revision(&tx, table_id)?;
        tx.execute(
            "UPDATE rate_table SET is_active = ?1 WHERE id = ?2",
            params![if active { 1i64 } else { 0i64 }, table_id],
        )?;
        bump_revision(&tx, table_id, revision)?;
        let table = get_table_on(&tx, table_id)?;
        tx.commit()?;
        log::info!(
            "store: rate table {table_id} ({} {}) active={active}",
            table.product_type, table.version
        );
        Ok(table)
    }

    /// Delete a table and, by cascade, all five of its rule collections.
    pub fn delete_table(&mut self, table_id: TableId) -> RatingResult<()> {
        let tx = self.write_txn()?;
        current_revision(&tx, table_id)?;
        if is_referenced(&tx, table_id)? {
            return Err(RatingError::TableInUse { table_id });
        }
        tx.execute("DELETE FROM rate_table WHERE id = ?1", params![table_id])?;
        tx.commit()?;
        log::info!("store: deleted rate table {table_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::clone_table;
    use serde_json::json;

    fn store_with(metadata: serde_json::Value) -> (RateStore, RatingResult<RateTable>) {
        let mut store = RateStore::in_memory().unwrap();
        store.migrate().unwrap();
        let created = store.create_table(&NewRateTable {
            product_type:    "disability_ltd".into(),
            version:         "v1".into(),
            name:            "LTD".into(),
            carrier_id:      None,
            effective_date:  None,
            expiration_date: None,
            is_active:       true,
            metadata,
        });
        (store, created)
    }

    #[test]
    fn non_object_metadata_is_rejected() {
        for bad in [json!(null), json!(["a"]), json!("text"), json!(3)] {
            let (_, created) = store_with(bad.clone());
            assert!(
                matches!(created, Err(RatingError::InvalidValue { field: "metadata", .. })),
                "{bad} accepted"
            );
        }

        let (mut store, created) = store_with(json!({}));
        let table = created.unwrap();
        let update = TableUpdate { metadata: Some(json!([1, 2])), ..TableUpdate::default() };
        let err = store.update_table(table.id, &update).unwrap_err();
        assert!(matches!(err, RatingError::InvalidValue { field: "metadata", .. }), "{err}");
        assert_eq!(store.get_table(table.id).unwrap().metadata, json!({}));
    }

    #[test]
    fn clone_of_legacy_scalar_metadata_keeps_provenance() {
        let (mut store, created) = store_with(json!({ "rate_key_dimensions": [] }));
        let table = created.unwrap();
        store
            .conn
            .execute("UPDATE rate_table SET metadata = 'null' WHERE id = ?1", params![table.id])
            .unwrap();

        let copy = clone_table(&mut store, table.id).unwrap();
        assert_eq!(copy.metadata["cloned_from"]["table_id"], table.id);
        assert_eq!(copy.metadata["cloned_from"]["version"], "v1");
    }
}
