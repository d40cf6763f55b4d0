use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, Query, QueryItem, Row};

use super::config::MssqlClient;
use crate::error::MssqlMiddlewareError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Run a query and collect every result set it produces, in order.
///
/// Statements that return no rowset (DECLARE, INSERT without OUTPUT, ...)
/// contribute nothing, so a plain DML statement yields an empty vector.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::QueryError` for driver failures, including
/// SQL errors raised by the server while rows are streaming.
pub async fn build_result_sets(
    client: &mut MssqlClient,
    query: Query<'_>,
) -> Result<Vec<ResultSet>, MssqlMiddlewareError> {
    let mut stream = query.query(client).await?;
    let mut result_sets: Vec<ResultSet> = Vec::new();

    // Drain the whole stream so the connection goes back to the pool clean.
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let column_names: Vec<String> = meta
                    .columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect();
                let mut result_set = ResultSet::with_capacity(10);
                result_set.set_column_names(Arc::new(column_names));
                result_sets.push(result_set);
            }
            QueryItem::Row(row) => {
                let result_set = result_sets.last_mut().ok_or_else(|| {
                    MssqlMiddlewareError::ExecutionError(
                        "row received before column metadata".to_string(),
                    )
                })?;
                result_set.add_row_values(extract_row(&row)?);
            }
        }
    }

    Ok(result_sets)
}

/// Run a query and keep only its first result set (empty if there is none).
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::QueryError` for driver failures.
pub async fn build_result_set(
    client: &mut MssqlClient,
    query: Query<'_>,
) -> Result<ResultSet, MssqlMiddlewareError> {
    let result_sets = build_result_sets(client, query).await?;
    Ok(result_sets.into_iter().next().unwrap_or_default())
}

fn extract_row(row: &Row) -> Result<Vec<RowValues>, MssqlMiddlewareError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, (_column, data)) in row.cells().enumerate() {
        values.push(extract_value(row, idx, data)?);
    }
    Ok(values)
}

/// Convert one cell. Date/time cells go through tiberius' chrono conversions;
/// everything else is read straight from the column data.
fn extract_value(
    row: &Row,
    idx: usize,
    data: &ColumnData<'_>,
) -> Result<RowValues, MssqlMiddlewareError> {
    let value = match data {
        ColumnData::Bit(Some(b)) => RowValues::Bool(*b),
        ColumnData::U8(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I16(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I32(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I64(Some(v)) => RowValues::Int(*v),
        ColumnData::F32(Some(v)) => RowValues::Float(f64::from(*v)),
        ColumnData::F64(Some(v)) => RowValues::Float(*v),
        ColumnData::Numeric(Some(n)) => numeric_value(*n),
        ColumnData::String(Some(s)) => RowValues::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => RowValues::Text(g.to_string()),
        ColumnData::Binary(Some(b)) => RowValues::Blob(b.to_vec()),
        ColumnData::Xml(Some(xml)) => RowValues::Text(xml.to_string()),
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => row
            .try_get::<NaiveDateTime, _>(idx)?
            .map_or(RowValues::Null, RowValues::Timestamp),
        ColumnData::Date(Some(_)) => row
            .try_get::<NaiveDate, _>(idx)?
            .map_or(RowValues::Null, |d| RowValues::Text(d.format("%Y-%m-%d").to_string())),
        ColumnData::Time(Some(_)) => row
            .try_get::<NaiveTime, _>(idx)?
            .map_or(RowValues::Null, |t| {
                RowValues::Text(t.format("%H:%M:%S%.f").to_string())
            }),
        ColumnData::DateTimeOffset(Some(_)) => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map_or(RowValues::Null, |dt| RowValues::Text(dt.to_rfc3339())),
        // NULL of any type
        _ => RowValues::Null,
    };
    Ok(value)
}

/// Whole numbers stay integers when they fit; anything with a scale becomes a float.
#[allow(clippy::cast_precision_loss)]
fn numeric_value(n: Numeric) -> RowValues {
    if n.scale() == 0 {
        if let Ok(int) = i64::try_from(n.value()) {
            return RowValues::Int(int);
        }
    }
    RowValues::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
}
