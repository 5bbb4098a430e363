use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::{MAX_BATCH_ROWS, MAX_IDS_PER_QUERY};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVendor {
        id: Ulid,
        name: Option<String>,
    },
    InsertWorkingHours {
        vendor_id: Ulid,
        weekday: usize,
        hours: Option<DayHours>,
    },
    InsertService {
        vendor_id: Ulid,
        service: Service,
    },
    InsertPackage {
        vendor_id: Ulid,
        package: Package,
    },
    InsertStaff {
        vendor_id: Ulid,
        id: Ulid,
        name: Option<String>,
    },
    DeleteStaff {
        id: Ulid,
    },
    /// All rows must name the same staff member and weekday; together they
    /// replace that day's ranges.
    InsertStaffHours {
        staff_id: Ulid,
        weekday: usize,
        ranges: Vec<TimeRange>,
    },
    InsertBlockedTime {
        id: Ulid,
        staff_id: Ulid,
        date: NaiveDate,
        span: Span,
    },
    DeleteBlockedTime {
        id: Ulid,
    },
    InsertAppointment {
        vendor_id: Ulid,
        appointment: Appointment,
    },
    /// `DELETE FROM appointments` is a soft cancel.
    CancelAppointment {
        id: Ulid,
    },
    InsertLock {
        request: LockRequest,
    },
    InsertPackageLock {
        request: PackageLockRequest,
    },
    DeleteLock {
        id: Ulid,
    },
    InsertBooking {
        lock_id: Ulid,
    },
    SelectSlots {
        query: SlotQuery,
    },
    SelectAppointments {
        vendor_id: Ulid,
        date: NaiveDate,
        staff_id: Option<Ulid>,
    },
    SelectLock {
        id: Ulid,
    },
    SelectStaff {
        vendor_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;
    if rows.len() > MAX_BATCH_ROWS {
        return Err(SqlError::Parse(format!("too many rows: {}", rows.len())));
    }
    if table == "staff_hours" {
        return parse_staff_hours(&rows);
    }
    if rows.len() > 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let values = &rows[0];

    match table.as_str() {
        "vendors" => {
            arity("vendors", values, 1)?;
            Ok(Command::InsertVendor {
                id: parse_ulid(&values[0])?,
                name: optional(values, 1, parse_string_or_null)?.flatten(),
            })
        }
        "working_hours" => {
            arity("working_hours", values, 3)?;
            let vendor_id = parse_ulid(&values[0])?;
            let weekday = parse_weekday_expr(&values[1])?;
            let is_available = parse_bool(&values[2])?;
            let start = optional(values, 3, parse_time_or_null)?.flatten();
            let end = optional(values, 4, parse_time_or_null)?.flatten();
            let hours = match (start, end) {
                (Some(start), Some(end)) => Some(DayHours {
                    is_available,
                    range: TimeRange::new(start, end),
                }),
                (None, None) if !is_available => None,
                _ => return Err(SqlError::Parse("working_hours needs start and end".into())),
            };
            Ok(Command::InsertWorkingHours { vendor_id, weekday, hours })
        }
        "services" => {
            arity("services", values, 4)?;
            Ok(Command::InsertService {
                vendor_id: parse_ulid(&values[1])?,
                service: Service {
                    id: parse_ulid(&values[0])?,
                    duration: parse_u32(&values[2])?,
                    price_cents: parse_i64(&values[3])?,
                    home_eligible: optional(values, 4, parse_bool)?.unwrap_or(false),
                    wedding_eligible: optional(values, 5, parse_bool)?.unwrap_or(false),
                    is_addon: optional(values, 6, parse_bool)?.unwrap_or(false),
                    parent_service_id: optional(values, 7, parse_ulid_or_null)?.flatten(),
                },
            })
        }
        "packages" => {
            arity("packages", values, 4)?;
            Ok(Command::InsertPackage {
                vendor_id: parse_ulid(&values[1])?,
                package: Package {
                    id: parse_ulid(&values[0])?,
                    duration: parse_u32(&values[2])?,
                    price_cents: parse_i64(&values[3])?,
                },
            })
        }
        "staff" => {
            arity("staff", values, 2)?;
            Ok(Command::InsertStaff {
                id: parse_ulid(&values[0])?,
                vendor_id: parse_ulid(&values[1])?,
                name: optional(values, 2, parse_string_or_null)?.flatten(),
            })
        }
        "blocked_times" => {
            arity("blocked_times", values, 5)?;
            Ok(Command::InsertBlockedTime {
                id: parse_ulid(&values[0])?,
                staff_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                span: parse_span(&values[3], &values[4])?,
            })
        }
        "appointments" => {
            arity("appointments", values, 6)?;
            let status = match optional(values, 6, parse_string_or_null)?.flatten() {
                Some(s) => AppointmentStatus::parse(&s)
                    .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                None => AppointmentStatus::Scheduled,
            };
            Ok(Command::InsertAppointment {
                vendor_id: parse_ulid(&values[1])?,
                appointment: Appointment {
                    id: parse_ulid(&values[0])?,
                    staff_id: parse_ulid_or_null(&values[2])?,
                    date: parse_date(&values[3])?,
                    span: parse_span(&values[4], &values[5])?,
                    status,
                    client_id: optional(values, 7, parse_string_or_null)?.flatten(),
                },
            })
        }
        "locks" => {
            arity("locks", values, 8)?;
            Ok(Command::InsertLock {
                request: LockRequest {
                    lock_id: parse_ulid(&values[0])?,
                    vendor_id: parse_ulid(&values[1])?,
                    staff: parse_staff_selector(&values[2])?,
                    service_id: parse_ulid(&values[3])?,
                    date: parse_date(&values[4])?,
                    span: parse_span(&values[5], &values[6])?,
                    client_id: parse_string(&values[7])?,
                    amount_cents: optional(values, 8, parse_i64_or_null)?.flatten(),
                    add_on_ids: optional(values, 9, parse_id_list)?.unwrap_or_default(),
                },
            })
        }
        "package_locks" => {
            arity("package_locks", values, 5)?;
            Ok(Command::InsertPackageLock {
                request: PackageLockRequest {
                    lock_id: parse_ulid(&values[0])?,
                    package_id: parse_ulid(&values[1])?,
                    date: parse_date(&values[2])?,
                    start: parse_time(&values[3])?,
                    client_id: parse_string(&values[4])?,
                },
            })
        }
        "bookings" => {
            arity("bookings", values, 1)?;
            Ok(Command::InsertBooking {
                lock_id: parse_ulid(&values[0])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_staff_hours(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut target: Option<(Ulid, usize)> = None;
    let mut ranges = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        arity("staff_hours", row, 2)?;
        let staff_id = parse_ulid(&row[0])?;
        let weekday = parse_weekday_expr(&row[1])?;
        match target {
            None => target = Some((staff_id, weekday)),
            Some(t) if t != (staff_id, weekday) => {
                return Err(SqlError::Parse(format!(
                    "row {i}: staff_hours rows must share staff_id and weekday"
                )));
            }
            Some(_) => {}
        }
        // A row without times clears the day.
        let start = optional(row, 2, parse_time_or_null)?.flatten();
        let end = optional(row, 3, parse_time_or_null)?.flatten();
        match (start, end) {
            (Some(start), Some(end)) => ranges.push(TimeRange::new(start, end)),
            (None, None) => {}
            _ => return Err(SqlError::Parse(format!("row {i}: need both start and end"))),
        }
    }
    let (staff_id, weekday) = target.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
    Ok(Command::InsertStaffHours { staff_id, weekday, ranges })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "staff" => Ok(Command::DeleteStaff { id }),
        "blocked_times" => Ok(Command::DeleteBlockedTime { id }),
        "appointments" => Ok(Command::CancelAppointment { id }),
        "locks" => Ok(Command::DeleteLock { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters.0)?;
    }

    match table.as_str() {
        "slots" => {
            let vendor_id = parse_ulid(filters.required("vendor_id")?)?;
            let date = parse_date(filters.required("date")?)?;
            let staff = match filters.get("staff_id") {
                Some(e) => parse_staff_selector(e)?,
                None => StaffSelector::Any,
            };
            let mut query = SlotQuery::new(vendor_id, date, staff);
            if let Some(e) = filters.get("service_ids") {
                query.service_ids = parse_id_list(e)?;
            }
            if let Some(e) = filters.get("addon_ids") {
                query.add_on_ids = parse_id_list(e)?;
            }
            if let Some(e) = filters.get("home_service") {
                query.home_service = parse_bool(e)?;
            }
            if let Some(e) = filters.get("wedding_service") {
                query.wedding_service = parse_bool(e)?;
            }
            if let Some(e) = filters.get("package_id") {
                query.package_id = parse_ulid_or_null(e)?;
            }
            query.location = match (filters.get("lat"), filters.get("lng")) {
                (Some(lat), Some(lng)) => Some((parse_f64(lat)?, parse_f64(lng)?)),
                (None, None) => None,
                _ => return Err(SqlError::Parse("lat and lng go together".into())),
            };
            Ok(Command::SelectSlots { query })
        }
        "appointments" => Ok(Command::SelectAppointments {
            vendor_id: parse_ulid(filters.required("vendor_id")?)?,
            date: parse_date(filters.required("date")?)?,
            staff_id: filters.get("staff_id").map(parse_ulid_or_null).transpose()?.flatten(),
        }),
        "locks" => Ok(Command::SelectLock {
            id: parse_ulid(filters.required("id")?)?,
        }),
        "staff" => Ok(Command::SelectStaff {
            vendor_id: parse_ulid(filters.required("vendor_id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column = value` pairs from a WHERE clause joined by AND.
#[derive(Default)]
struct Filters(Vec<(String, Expr)>);

impl Filters {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                out.push((col, right.as_ref().clone()));
            }
            _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out)?,
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Parse column `idx` if the row has it.
fn optional<T>(
    values: &[Expr],
    idx: usize,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    values.get(idx).map(parse).transpose()
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

/// `'any'` (or NULL) for any professional, otherwise a staff ULID.
fn parse_staff_selector(expr: &Expr) -> Result<StaffSelector, SqlError> {
    if is_null(expr) {
        return Ok(StaffSelector::Any);
    }
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.eq_ignore_ascii_case("any")
    {
        return Ok(StaffSelector::Any);
    }
    parse_ulid(expr).map(StaffSelector::Staff)
}

/// Comma-separated ULIDs in one string: `'01H…,01H…'`. Empty string is an empty list.
fn parse_id_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(Vec::new());
    }
    let s = parse_string(expr)?;
    let ids = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Ulid::from_string(p).map_err(|e| SqlError::Parse(format!("bad ULID {p}: {e}"))))
        .collect::<Result<Vec<_>, _>>()?;
    if ids.len() > MAX_IDS_PER_QUERY {
        return Err(SqlError::Parse(format!("too many ids: {}", ids.len())));
    }
    Ok(ids)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `'HH:MM'` or a plain minute count.
fn parse_time(expr: &Expr) -> Result<Minute, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            parse_hhmm(s).ok_or_else(|| SqlError::Parse(format!("bad time: {s}")))
        }
        Some(Value::Number(..)) => {
            let minute = parse_u32(expr)?;
            if minute > MINUTES_PER_DAY {
                return Err(SqlError::Parse(format!("time {minute} is past midnight")));
            }
            Ok(minute)
        }
        Some(other) => Err(SqlError::Parse(format!("expected time, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<Minute>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_time(expr).map(Some)
}

fn parse_span(start: &Expr, end: &Expr) -> Result<Span, SqlError> {
    let (start, end) = (parse_time(start)?, parse_time(end)?);
    Span::try_new(start, end).ok_or_else(|| {
        SqlError::Parse(format!(
            "end {} must be after start {}",
            format_hhmm(end),
            format_hhmm(start)
        ))
    })
}

fn parse_weekday_expr(expr: &Expr) -> Result<usize, SqlError> {
    let raw = match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => s.clone(),
        _ => return Err(SqlError::Parse(format!("expected weekday, got {expr:?}"))),
    };
    parse_weekday(&raw).ok_or_else(|| SqlError::Parse(format!("bad weekday: {raw}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const V: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const S: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_vendor() {
        let cmd = parse_sql(&format!("INSERT INTO vendors (id, name) VALUES ('{V}', 'Glow')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertVendor {
                id: ulid(V),
                name: Some("Glow".into())
            }
        );
        let cmd = parse_sql(&format!("INSERT INTO vendors (id) VALUES ('{V}')")).unwrap();
        assert_eq!(cmd, Command::InsertVendor { id: ulid(V), name: None });
    }

    #[test]
    fn parse_working_hours_open_and_closed() {
        let sql = format!(
            r#"INSERT INTO working_hours (vendor_id, weekday, is_available, start, "end") VALUES ('{V}', 'monday', true, '09:00', '17:30')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertWorkingHours {
                vendor_id: ulid(V),
                weekday: 0,
                hours: Some(DayHours {
                    is_available: true,
                    range: TimeRange::new(540, 1050)
                }),
            }
        );

        let sql = format!(
            r#"INSERT INTO working_hours (vendor_id, weekday, is_available, start, "end") VALUES ('{V}', 6, false, NULL, NULL)"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertWorkingHours {
                vendor_id: ulid(V),
                weekday: 6,
                hours: None
            }
        );
    }

    #[test]
    fn parse_insert_service_with_defaults() {
        let sql = format!("INSERT INTO services (id, vendor_id, duration, price) VALUES ('{S}', '{V}', 45, 4500)");
        match parse_sql(&sql).unwrap() {
            Command::InsertService { vendor_id, service } => {
                assert_eq!(vendor_id, ulid(V));
                assert_eq!(service.duration, 45);
                assert_eq!(service.price_cents, 4500);
                assert!(!service.is_addon);
                assert_eq!(service.parent_service_id, None);
            }
            other => panic!("expected InsertService, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_addon_service() {
        let sql = format!(
            "INSERT INTO services (id, vendor_id, duration, price, home_eligible, wedding_eligible, is_addon, parent_service_id) VALUES ('{S}', '{V}', 15, 1000, false, false, true, '{V}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertService { service, .. } => {
                assert!(service.is_addon);
                assert_eq!(service.parent_service_id, Some(ulid(V)));
            }
            other => panic!("expected InsertService, got {other:?}"),
        }
    }

    #[test]
    fn parse_staff_hours_rows_form_one_day() {
        let sql = format!(
            r#"INSERT INTO staff_hours (staff_id, weekday, start, "end") VALUES ('{S}', 'tue', '09:00', '12:00'), ('{S}', 'tue', '17:00', '20:00')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertStaffHours {
                staff_id: ulid(S),
                weekday: 1,
                ranges: vec![TimeRange::new(540, 720), TimeRange::new(1020, 1200)],
            }
        );
    }

    #[test]
    fn parse_staff_hours_rejects_mixed_days() {
        let sql = format!(
            r#"INSERT INTO staff_hours (staff_id, weekday, start, "end") VALUES ('{S}', 1, '09:00', '12:00'), ('{S}', 2, '09:00', '12:00')"#
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_staff_hours_keeps_malformed_range() {
        let sql = format!(r#"INSERT INTO staff_hours (staff_id, weekday, start, "end") VALUES ('{S}', 0, '12:00', '09:00')"#);
        match parse_sql(&sql).unwrap() {
            Command::InsertStaffHours { ranges, .. } => assert_eq!(ranges, vec![TimeRange::new(720, 540)]),
            other => panic!("expected InsertStaffHours, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment_unassigned() {
        let sql = format!(
            r#"INSERT INTO appointments (id, vendor_id, staff_id, date, start, "end", status) VALUES ('{S}', '{V}', NULL, '2026-10-26', '10:00', '10:30', 'completed')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment { appointment, .. } => {
                assert_eq!(appointment.staff_id, None);
                assert_eq!(appointment.span, Span::new(600, 630));
                assert_eq!(appointment.status, AppointmentStatus::Completed);
                assert_eq!(appointment.date, NaiveDate::from_ymd_opt(2026, 10, 26).unwrap());
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_lock_any() {
        let sql = format!(
            r#"INSERT INTO locks (id, vendor_id, staff_id, service_id, date, start, "end", client_id, amount) VALUES ('{S}', '{V}', 'any', '{S}', '2026-10-26', '14:00', '14:30', 'client-7', 4500)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertLock { request } => {
                assert_eq!(request.staff, StaffSelector::Any);
                assert_eq!(request.span, Span::new(840, 870));
                assert_eq!(request.client_id, "client-7");
                assert_eq!(request.amount_cents, Some(4500));
                assert!(request.add_on_ids.is_empty());
            }
            other => panic!("expected InsertLock, got {other:?}"),
        }
    }

    #[test]
    fn parse_lock_with_inverted_times_fails() {
        let sql = format!(
            r#"INSERT INTO locks (id, vendor_id, staff_id, service_id, date, start, "end", client_id) VALUES ('{S}', '{V}', '{S}', '{S}', '2026-10-26', '14:30', '14:00', 'c')"#
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_package_lock() {
        let sql = format!(
            "INSERT INTO package_locks (id, package_id, date, start, client_id) VALUES ('{S}', '{V}', '2026-10-26', '09:00', 'bride')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertPackageLock { request } => {
                assert_eq!(request.start, 540);
                assert_eq!(request.package_id, ulid(V));
            }
            other => panic!("expected InsertPackageLock, got {other:?}"),
        }
    }

    #[test]
    fn numeric_time_past_midnight_is_rejected() {
        let insert = |start: &str| {
            format!(
                "INSERT INTO package_locks (id, package_id, date, start, client_id) VALUES ('{S}', '{V}', '2026-10-26', {start}, 'bride')"
            )
        };
        assert!(matches!(parse_sql(&insert("4294967285")), Err(SqlError::Parse(_))));
        assert!(matches!(parse_sql(&insert("1441")), Err(SqlError::Parse(_))));
        match parse_sql(&insert("600")).unwrap() {
            Command::InsertPackageLock { request } => assert_eq!(request.start, 600),
            other => panic!("expected InsertPackageLock, got {other:?}"),
        }
    }

    #[test]
    fn parse_deletes() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM locks WHERE id = '{S}'")).unwrap(),
            Command::DeleteLock { id: ulid(S) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM appointments WHERE id = '{S}'")).unwrap(),
            Command::CancelAppointment { id: ulid(S) }
        );
        assert!(matches!(
            parse_sql("DELETE FROM locks"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_insert_booking() {
        assert_eq!(
            parse_sql(&format!("INSERT INTO bookings (lock_id) VALUES ('{S}')")).unwrap(),
            Command::InsertBooking { lock_id: ulid(S) }
        );
    }

    #[test]
    fn parse_select_slots_full() {
        let sql = format!(
            "SELECT * FROM slots WHERE vendor_id = '{V}' AND date = '2026-10-26' AND staff_id = 'any' \
             AND service_ids = '{S},{V}' AND addon_ids = '' AND home_service = true \
             AND lat = 6.4541 AND lng = -3.3947"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectSlots { query } => {
                assert_eq!(query.vendor_id, ulid(V));
                assert_eq!(query.staff, StaffSelector::Any);
                assert_eq!(query.service_ids, vec![ulid(S), ulid(V)]);
                assert!(query.add_on_ids.is_empty());
                assert!(query.home_service);
                assert!(!query.wedding_service);
                assert_eq!(query.location, Some((6.4541, -3.3947)));
            }
            other => panic!("expected SelectSlots, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_slots_requires_vendor_and_date() {
        assert!(matches!(
            parse_sql("SELECT * FROM slots WHERE date = '2026-10-26'"),
            Err(SqlError::MissingFilter("vendor_id"))
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM slots WHERE vendor_id = '{V}'")),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn parse_select_slots_lat_without_lng() {
        let sql = format!("SELECT * FROM slots WHERE vendor_id = '{V}' AND date = '2026-10-26' AND lat = 1.0");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_select_appointments_with_staff() {
        let sql = format!(
            "SELECT * FROM appointments WHERE vendor_id = '{V}' AND date = '2026-10-26' AND staff_id = '{S}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAppointments {
                vendor_id: ulid(V),
                date: NaiveDate::from_ymd_opt(2026, 10, 26).unwrap(),
                staff_id: Some(ulid(S)),
            }
        );
    }

    #[test]
    fn parse_select_lock_and_staff() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM locks WHERE id = '{S}'")).unwrap(),
            Command::SelectLock { id: ulid(S) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM staff WHERE vendor_id = '{V}'")).unwrap(),
            Command::SelectStaff { vendor_id: ulid(V) }
        );
    }

    #[test]
    fn range_filters_are_rejected() {
        let sql = format!("SELECT * FROM appointments WHERE vendor_id = '{V}' AND date >= '2026-10-26'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn bad_inputs() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO foobar (id) VALUES ('{V}')")),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(parse_sql(&format!("INSERT INTO vendors (id) VALUES ('{V}'), ('{S}')")).is_err());
        assert!(parse_sql(&format!(
            "SELECT * FROM slots WHERE vendor_id = '{V}' AND date = '2026-13-01'"
        ))
        .is_err());
    }
}
