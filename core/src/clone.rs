//! Table cloning: a new, independently versioned copy of a rate table.
//!
//! Version naming: `{version}-copy`, then `{version}-copy-1`,
//! `{version}-copy-2`, ... until the name is free within the product
//! type. The clone is always inactive, so it cannot take traffic until
//! someone activates it on purpose.

use crate::{error::RatingResult, model::RateTable, store::RateStore, types::TableId};
use std::iter;

/// Candidate clone versions for `base`, in the order they are tried.
pub fn version_candidates(base: &str) -> impl Iterator<Item = String> {
    let base = base.to_string();
    iter::once(format!("{base}-copy")).chain((1..).map(move |n| format!("{base}-copy-{n}")))
}

pub fn clone_table(store: &mut RateStore, table_id: TableId) -> RatingResult<RateTable> {
    let copy = store.copy_table(table_id, version_candidates)?;
    log::info!(
        "clone: table {table_id} copied to {} ({} {}, inactive)",
        copy.id, copy.product_type, copy.version
    );
    Ok(copy)
}
