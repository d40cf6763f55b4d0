use std::collections::HashSet;

use tiberius::Query;

use crate::error::MssqlMiddlewareError;
use crate::types::{NamedParams, RowValues};

// SQL Server caps variable names at 128 characters including the `@`.
const MAX_PARAM_NAME_LEN: usize = 127;

/// Build a driver query that exposes every named parameter to `sql` as `@name`.
///
/// Tiberius only binds positional parameters (`@P1`, `@P2`, ...), so each name
/// is declared up front and assigned from its positional slot:
///
/// ```text
/// DECLARE @value bigint = @P1;
/// SELECT @value AS value
/// ```
///
/// The caller's SQL text follows verbatim on the next line. Without parameters
/// the SQL is sent untouched.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::ParameterError` if a name is not a plain T-SQL
/// identifier.
pub fn bind_named_params<'a>(
    sql: &'a str,
    params: Option<&NamedParams>,
) -> Result<Query<'a>, MssqlMiddlewareError> {
    let Some(params) = params.filter(|p| !p.is_empty()) else {
        return Ok(Query::new(sql));
    };

    let mut text = declare_prelude(params)?;
    text.push('\n');
    text.push_str(sql);

    let mut query = Query::new(text);
    for (_, value) in params.iter() {
        bind_value(&mut query, value);
    }
    Ok(query)
}

/// The `DECLARE` statement that maps names onto positional parameters.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::ParameterError` for an invalid name, or for
/// two names that differ only by case (T-SQL variables are case-insensitive).
pub fn declare_prelude(params: &NamedParams) -> Result<String, MssqlMiddlewareError> {
    let mut declarations = Vec::with_capacity(params.len());
    let mut seen = HashSet::with_capacity(params.len());
    for (position, (name, value)) in params.iter().enumerate() {
        validate_param_name(name)?;
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(MssqlMiddlewareError::ParameterError(format!(
                "parameter name {name:?} differs from another parameter only by case"
            )));
        }
        declarations.push(format!(
            "@{name} {} = @P{}",
            declared_type(value),
            position + 1
        ));
    }
    Ok(format!("DECLARE {};", declarations.join(", ")))
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*` up to 127 characters, excluding the
/// driver's own positional names (`P1`, `p2`, ...).
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::ParameterError` describing the rejected name.
pub fn validate_param_name(name: &str) -> Result<(), MssqlMiddlewareError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MssqlMiddlewareError::ParameterError(format!(
            "invalid parameter name {name:?}; expected letters, digits or '_' and not starting with a digit"
        )));
    }
    if name.len() > MAX_PARAM_NAME_LEN {
        return Err(MssqlMiddlewareError::ParameterError(format!(
            "parameter name {name:?} exceeds {MAX_PARAM_NAME_LEN} characters"
        )));
    }
    let reserved = name.len() > 1
        && name.starts_with(['P', 'p'])
        && name[1..].chars().all(|c| c.is_ascii_digit());
    if reserved {
        return Err(MssqlMiddlewareError::ParameterError(format!(
            "parameter name {name:?} collides with the driver's positional parameters"
        )));
    }
    Ok(())
}

/// SQL type used to declare a parameter; matches the type tiberius sends for the value.
fn declared_type(value: &RowValues) -> &'static str {
    match value {
        RowValues::Int(_) => "bigint",
        RowValues::Float(_) => "float",
        RowValues::Bool(_) => "bit",
        RowValues::Timestamp(_) => "datetime2",
        RowValues::Blob(_) => "varbinary(max)",
        RowValues::Text(_) | RowValues::JSON(_) | RowValues::Null => "nvarchar(max)",
    }
}

fn bind_value(query: &mut Query<'_>, value: &RowValues) {
    match value {
        RowValues::Int(i) => query.bind(*i),
        RowValues::Float(f) => query.bind(*f),
        RowValues::Text(s) => query.bind(s.clone()),
        RowValues::Bool(b) => query.bind(*b),
        RowValues::Timestamp(dt) => query.bind(*dt),
        RowValues::Null => query.bind(Option::<String>::None),
        RowValues::JSON(jsval) => query.bind(jsval.to_string()),
        RowValues::Blob(bytes) => query.bind(bytes.clone()),
    }
}
