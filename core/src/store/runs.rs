use super::{enum_column, json_column, opt_decimal_column, RateStore};
use crate::{audit::RatingRun, error::RatingResult};
use rusqlite::{params, OptionalExtension, Row};

const RUN_COLUMNS: &str = "run_id, scenario_id, product_type, rate_table_id, rate_table_version,
     engine_version, input_hash, input_snapshot, output_snapshot, annual_premium,
     monthly_premium, status, error_message, duration_ms, acting_user_id, created_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RatingRun> {
    Ok(RatingRun {
        run_id:             row.get(0)?,
        scenario_id:        row.get(1)?,
        product_type:       row.get(2)?,
        rate_table_id:      row.get(3)?,
        rate_table_version: row.get(4)?,
        engine_version:     row.get(5)?,
        input_hash:         row.get(6)?,
        input_snapshot:     json_column(row, 7)?,
        output_snapshot:    json_column(row, 8)?,
        annual_premium:     opt_decimal_column(row, 9)?,
        monthly_premium:    opt_decimal_column(row, 10)?,
        status:             enum_column(row, 11)?,
        error_message:      row.get(12)?,
        duration_ms:        row.get(13)?,
        acting_user_id:     row.get(14)?,
        created_at:         row.get(15)?,
    })
}

impl RateStore {
    // ── Rating runs (append-only) ──────────────────────────────

    pub fn insert_rating_run(&self, run: &RatingRun) -> RatingResult<()> {
        self.conn.execute(
            "INSERT INTO rating_run (
                run_id, scenario_id, product_type, rate_table_id, rate_table_version,
                engine_version, input_hash, input_snapshot, output_snapshot, annual_premium,
                monthly_premium, status, error_message, duration_ms, acting_user_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                run.run_id,
                run.scenario_id,
                run.product_type,
                run.rate_table_id,
                run.rate_table_version,
                run.engine_version,
                run.input_hash,
                serde_json::to_string(&run.input_snapshot)?,
                serde_json::to_string(&run.output_snapshot)?,
                run.annual_premium.map(|d| d.to_string()),
                run.monthly_premium.map(|d| d.to_string()),
                run.status.as_str(),
                run.error_message,
                run.duration_ms,
                run.acting_user_id,
                run.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_rating_run(&self, run_id: &str) -> RatingResult<Option<RatingRun>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM rating_run WHERE run_id = ?1"),
                params![run_id],
                run_from_row,
            )
            .optional()?)
    }

    /// Runs for a scenario, oldest first.
    pub fn rating_runs_for_scenario(&self, scenario_id: &str) -> RatingResult<Vec<RatingRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM rating_run
             WHERE scenario_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let runs = stmt
            .query_map(params![scenario_id], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    pub fn rating_runs_for_input_hash(&self, input_hash: &str) -> RatingResult<Vec<RatingRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM rating_run
             WHERE input_hash = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let runs = stmt
            .query_map(params![input_hash], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
