use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_ROWS_PER_INSERT;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Creates the event type, or edits it when `id` already exists.
    UpsertEventType {
        id: Ulid,
        draft: EventTypeDraft,
    },
    DeleteEventType {
        id: Ulid,
    },
    SelectEventTypes {
        filter: Option<EventTypeRef>,
    },
    SaveWeeklySchedule {
        schedule: WeeklySchedule,
    },
    SelectWeeklySchedule,
    SaveDateOverrides {
        dates: Vec<NaiveDate>,
        payload: OverridePayload,
    },
    DeleteDateOverride {
        date: NaiveDate,
    },
    SelectDateOverrides {
        date: Option<NaiveDate>,
    },
    InsertBooking(NewBooking),
    /// Bookings are never deleted; DELETE cancels.
    CancelBooking {
        id: Ulid,
    },
    SelectBookings {
        tab: Option<BookingTab>,
    },
    SelectBookedSlots {
        date: NaiveDate,
    },
    SelectSlots {
        event_type: EventTypeRef,
        date: NaiveDate,
        format: ClockFormat,
    },
}

const EVENT_TYPE_COLUMNS: &[&str] = &["id", "title", "slug", "description", "duration", "buffer"];
const SCHEDULE_COLUMNS: &[&str] = &["weekday", "enabled", "start", "end", "timezone"];
const OVERRIDE_COLUMNS: &[&str] = &["date", "enabled", "start", "end", "reason"];
const BOOKING_COLUMNS: &[&str] = &["id", "event_type_id", "name", "email", "date", "start_time", "end_time"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES tuple addressed by column name.
struct Row<'a> {
    columns: &'a [String],
    values: &'a [Expr],
}

impl Row<'_> {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    fn require(&self, table: &'static str, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, known): (&'static str, &[&str]) = match table.as_str() {
        "event_types" => ("event_types", EVENT_TYPE_COLUMNS),
        "weekly_schedule" => ("weekly_schedule", SCHEDULE_COLUMNS),
        "date_overrides" => ("date_overrides", OVERRIDE_COLUMNS),
        "bookings" => ("bookings", BOOKING_COLUMNS),
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        known.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(unknown) = columns.iter().find(|c| !known.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(table, unknown.clone()));
    }

    let all_rows = extract_all_insert_rows(insert)?;
    if all_rows.len() > MAX_ROWS_PER_INSERT {
        return Err(SqlError::TooManyRows(all_rows.len()));
    }
    if let Some(bad) = all_rows.iter().find(|r| r.len() != columns.len()) {
        return Err(SqlError::WrongArity(table, columns.len(), bad.len()));
    }
    let rows: Vec<Row> = all_rows
        .iter()
        .map(|values| Row {
            columns: &columns,
            values,
        })
        .collect();

    match table {
        "event_types" => parse_event_type_row(single_row(table, &rows)?),
        "weekly_schedule" => parse_schedule_rows(&rows),
        "date_overrides" => parse_override_rows(&rows),
        _ => parse_booking_row(single_row(table, &rows)?),
    }
}

fn single_row<'a>(table: &'static str, rows: &'a [Row<'a>]) -> Result<&'a Row<'a>, SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!(
            "{table}: expected one row, got {}",
            rows.len()
        ))),
    }
}

fn parse_event_type_row(row: &Row) -> Result<Command, SqlError> {
    const T: &str = "event_types";
    let id = match row.get("id") {
        Some(expr) => parse_ulid_or_null(expr)?.unwrap_or_else(Ulid::new),
        None => Ulid::new(),
    };
    let draft = EventTypeDraft {
        title: parse_text(row.require(T, "title")?)?,
        slug: row.get("slug").map(parse_text_or_null).transpose()?.flatten(),
        description: row
            .get("description")
            .map(parse_text_or_null)
            .transpose()?
            .flatten()
            .unwrap_or_default(),
        duration: parse_u32(row.require(T, "duration")?)?,
        buffer: row
            .get("buffer")
            .map(parse_u32_or_null)
            .transpose()?
            .flatten()
            .unwrap_or(0),
    };
    Ok(Command::UpsertEventType { id, draft })
}

/// Exactly one row per weekday, all sharing one timezone.
fn parse_schedule_rows(rows: &[Row]) -> Result<Command, SqlError> {
    const T: &str = "weekly_schedule";
    let mut seen = [false; 7];
    let mut schedule = WeeklySchedule::default();
    let mut timezone: Option<String> = None;

    for row in rows {
        let weekday = parse_weekday(row.require(T, "weekday")?)?;
        let idx = weekday.num_days_from_sunday() as usize;
        if std::mem::replace(&mut seen[idx], true) {
            return Err(SqlError::Parse(format!("{weekday} listed twice")));
        }
        let hours = DayHours {
            enabled: parse_bool(row.require(T, "enabled")?)?,
            start: row.get("start").map(parse_time_or_null).transpose()?.flatten(),
            end: row.get("end").map(parse_time_or_null).transpose()?.flatten(),
        };
        schedule.set_day(weekday, hours);

        if let Some(tz) = row.get("timezone").map(parse_text_or_null).transpose()?.flatten() {
            match &timezone {
                Some(existing) if *existing != tz => {
                    return Err(SqlError::Parse(format!(
                        "rows disagree on timezone: {existing} vs {tz}"
                    )));
                }
                _ => timezone = Some(tz),
            }
        }
    }

    if let Some(missing) = WEEKDAYS.iter().find(|d| !seen[d.num_days_from_sunday() as usize]) {
        return Err(SqlError::Parse(format!("weekly_schedule needs all 7 days, missing {missing}")));
    }
    if let Some(tz) = timezone {
        schedule.timezone = tz;
    }
    Ok(Command::SaveWeeklySchedule { schedule })
}

/// Every row must carry the same payload; only the dates differ.
fn parse_override_rows(rows: &[Row]) -> Result<Command, SqlError> {
    const T: &str = "date_overrides";
    let mut dates = Vec::with_capacity(rows.len());
    let mut shared: Option<OverridePayload> = None;

    for row in rows {
        dates.push(parse_date(row.require(T, "date")?)?);
        let payload = OverridePayload {
            enabled: parse_bool(row.require(T, "enabled")?)?,
            start: row.get("start").map(parse_time_or_null).transpose()?.flatten(),
            end: row.get("end").map(parse_time_or_null).transpose()?.flatten(),
            reason: row.get("reason").map(parse_text_or_null).transpose()?.flatten(),
        };
        match &shared {
            Some(first) if *first != payload => {
                return Err(SqlError::Parse(
                    "date_overrides rows must share enabled, start, end and reason".into(),
                ));
            }
            Some(_) => {}
            None => shared = Some(payload),
        }
    }

    let payload = shared.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
    Ok(Command::SaveDateOverrides { dates, payload })
}

fn parse_booking_row(row: &Row) -> Result<Command, SqlError> {
    const T: &str = "bookings";
    let id = match row.get("id") {
        Some(expr) => parse_ulid_or_null(expr)?.unwrap_or_else(Ulid::new),
        None => Ulid::new(),
    };
    Ok(Command::InsertBooking(NewBooking {
        id,
        event_type_id: parse_ulid(row.require(T, "event_type_id")?)?,
        name: parse_text(row.require(T, "name")?)?,
        email: parse_text(row.require(T, "email")?)?,
        date: parse_date(row.require(T, "date")?)?,
        start: parse_time(row.require(T, "start_time")?)?,
        end: parse_time(row.require(T, "end_time")?)?,
    }))
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "event_types" => Ok(Command::DeleteEventType {
            id: parse_ulid(require_filter(&filters, "id")?)?,
        }),
        "date_overrides" => Ok(Command::DeleteDateOverride {
            date: parse_date(require_filter(&filters, "date")?)?,
        }),
        "bookings" => Ok(Command::CancelBooking {
            id: parse_ulid(require_filter(&filters, "id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "event_types" => {
            let filter = match (find_filter(&filters, "id"), find_filter(&filters, "slug")) {
                (Some(id), _) => Some(EventTypeRef::Id(parse_ulid(id)?)),
                (None, Some(slug)) => Some(EventTypeRef::Slug(parse_text(slug)?.to_lowercase())),
                (None, None) => None,
            };
            Ok(Command::SelectEventTypes { filter })
        }
        "weekly_schedule" => Ok(Command::SelectWeeklySchedule),
        "date_overrides" => Ok(Command::SelectDateOverrides {
            date: find_filter(&filters, "date").map(parse_date).transpose()?,
        }),
        "bookings" => {
            let tab = match find_filter(&filters, "tab") {
                Some(expr) => {
                    let raw = parse_text(expr)?;
                    Some(BookingTab::parse(&raw).ok_or(SqlError::Parse(format!("unknown tab: {raw}")))?)
                }
                None => None,
            };
            Ok(Command::SelectBookings { tab })
        }
        "booked_slots" => Ok(Command::SelectBookedSlots {
            date: parse_date(require_filter(&filters, "date")?)?,
        }),
        "slots" => {
            let format = match find_filter(&filters, "format") {
                Some(expr) => {
                    let raw = parse_text(expr)?;
                    ClockFormat::parse(&raw).ok_or(SqlError::Parse(format!("unknown format: {raw}")))?
                }
                None => ClockFormat::default(),
            };
            Ok(Command::SelectSlots {
                event_type: EventTypeRef::parse(&parse_text(require_filter(&filters, "event_type")?)?),
                date: parse_date(require_filter(&filters, "date")?)?,
                format,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE ─────────────────────────────────────────────────────

/// Flatten `a = x AND b = y ...` into `(column, value)` pairs.
fn collect_filters(selection: Option<&Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_eq(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_eq<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq(left, out)?;
            collect_eq(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn find_filter<'a>(filters: &[(String, &'a Expr)], column: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
}

fn require_filter<'a>(filters: &[(String, &'a Expr)], column: &'static str) -> Result<&'a Expr, SqlError> {
    find_filter(filters, column).ok_or(SqlError::MissingFilter(column))
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.clone()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

/// A string or numeric literal, as text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("expected non-negative integer, got {s}")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| SqlError::Parse(format!("bad date {s:?}, expected YYYY-MM-DD")))
}

fn parse_time(expr: &Expr) -> Result<TimeOfDay, SqlError> {
    let s = parse_text(expr)?;
    TimeOfDay::parse(&s).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<TimeOfDay>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_time(expr).map(Some)
}

/// Weekday name (`'monday'`, `'Mon'`) or number with 0 = Sunday.
fn parse_weekday(expr: &Expr) -> Result<Weekday, SqlError> {
    let s = parse_text(expr)?;
    if let Ok(n) = s.trim().parse::<usize>() {
        return WEEKDAYS
            .get(n)
            .copied()
            .ok_or_else(|| SqlError::Parse(format!("weekday number {n} out of range 0..=6")));
    }
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| SqlError::Parse(format!("bad weekday: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    TooManyRows(usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::TooManyRows(n) => {
                write!(f, "too many rows in one INSERT: {n} (max {MAX_ROWS_PER_INSERT})")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn t(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn insert_event_type_by_column_name() {
        let sql = format!(
            "INSERT INTO event_types (duration, title, id, buffer) VALUES (30, 'Quick Chat', '{ID}', 10)"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertEventType { id, draft } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(draft.title, "Quick Chat");
                assert_eq!(draft.slug, None);
                assert_eq!(draft.description, "");
                assert_eq!(draft.duration, 30);
                assert_eq!(draft.buffer, 10);
            }
            other => panic!("expected UpsertEventType, got {other:?}"),
        }
    }

    #[test]
    fn insert_event_type_without_id_gets_fresh_one() {
        let sql = "INSERT INTO event_types (title, slug, duration) VALUES ('Intro', NULL, 15)";
        match parse_sql(sql).unwrap() {
            Command::UpsertEventType { draft, .. } => {
                assert_eq!(draft.slug, None);
                assert_eq!(draft.buffer, 0);
            }
            other => panic!("expected UpsertEventType, got {other:?}"),
        }
    }

    #[test]
    fn insert_event_type_positional() {
        let sql = format!("INSERT INTO event_types VALUES ('{ID}', 'Intro', 'hello', 'Say hi', 20, 5)");
        match parse_sql(&sql).unwrap() {
            Command::UpsertEventType { draft, .. } => {
                assert_eq!(draft.slug.as_deref(), Some("hello"));
                assert_eq!(draft.description, "Say hi");
                assert_eq!((draft.duration, draft.buffer), (20, 5));
            }
            other => panic!("expected UpsertEventType, got {other:?}"),
        }
    }

    #[test]
    fn insert_event_type_missing_duration() {
        let sql = "INSERT INTO event_types (title) VALUES ('Intro')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("event_types", "duration"))
        ));
    }

    #[test]
    fn insert_unknown_column_rejected() {
        let sql = "INSERT INTO event_types (title, colour, duration) VALUES ('Intro', 'red', 15)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn("event_types", _))));
    }

    #[test]
    fn insert_arity_mismatch() {
        let sql = "INSERT INTO event_types (title, duration) VALUES ('Intro')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("event_types", 2, 1))));
    }

    fn week_sql(tz_for_sunday: &str) -> String {
        format!(
            r#"INSERT INTO weekly_schedule (weekday, enabled, start, "end", timezone) VALUES
            ('sunday', false, NULL, NULL, '{tz_for_sunday}'),
            ('monday', true, '08:00', '12:00', 'Europe/Paris'),
            ('tuesday', true, '09:00 AM', '05:00 PM', 'Europe/Paris'),
            ('wednesday', true, '09:00', '17:00', 'Europe/Paris'),
            ('thursday', true, '09:00', '17:00', 'Europe/Paris'),
            ('friday', true, '09:00', '13:00', 'Europe/Paris'),
            ('saturday', false, NULL, NULL, 'Europe/Paris')"#
        )
    }

    #[test]
    fn insert_weekly_schedule() {
        match parse_sql(&week_sql("Europe/Paris")).unwrap() {
            Command::SaveWeeklySchedule { schedule } => {
                assert_eq!(schedule.timezone, "Europe/Paris");
                assert_eq!(schedule.day(Weekday::Mon).window(), Some(Span::new(480, 720)));
                assert_eq!(schedule.day(Weekday::Tue).window(), Some(Span::new(540, 1020)));
                assert_eq!(schedule.day(Weekday::Fri).end, Some(t("13:00")));
                assert!(!schedule.day(Weekday::Sun).enabled);
            }
            other => panic!("expected SaveWeeklySchedule, got {other:?}"),
        }
    }

    #[test]
    fn weekly_schedule_rows_must_agree_on_timezone() {
        assert!(matches!(parse_sql(&week_sql("Asia/Tokyo")), Err(SqlError::Parse(_))));
    }

    #[test]
    fn weekly_schedule_needs_every_day_once() {
        let partial = r#"INSERT INTO weekly_schedule (weekday, enabled) VALUES ('monday', false)"#;
        let err = parse_sql(partial).unwrap_err();
        assert!(err.to_string().contains("missing"));

        let twice = r#"INSERT INTO weekly_schedule (weekday, enabled) VALUES
            (0, false), (1, false), (2, false), (3, false), (4, false), (5, false), (1, true)"#;
        let err = parse_sql(twice).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn insert_date_overrides_shared_payload() {
        let sql = r#"INSERT INTO date_overrides (date, enabled, start, "end", reason) VALUES
            ('2030-01-07', true, '10:00', '12:00', 'Workshop'),
            ('2030-01-08', true, '10:00', '12:00', 'Workshop')"#;
        match parse_sql(sql).unwrap() {
            Command::SaveDateOverrides { dates, payload } => {
                assert_eq!(dates, vec![d("2030-01-07"), d("2030-01-08")]);
                assert_eq!(
                    payload,
                    OverridePayload::custom_hours(t("10:00"), t("12:00"), Some("Workshop".into()))
                );
            }
            other => panic!("expected SaveDateOverrides, got {other:?}"),
        }
    }

    #[test]
    fn date_override_rows_must_share_payload() {
        let sql = r#"INSERT INTO date_overrides (date, enabled, reason) VALUES
            ('2030-01-07', false, 'Holiday'),
            ('2030-01-08', false, 'Trip')"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, event_type_id, name, email, date, start_time, end_time) \
             VALUES ('{ID}', '{ID}', 'Ada', 'ada@example.com', '2030-01-07', '09:00 AM', '09:30 AM')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(req) => {
                assert_eq!(req.id.to_string(), ID);
                assert_eq!(req.name, "Ada");
                assert_eq!(req.date, d("2030-01-07"));
                assert_eq!(req.start, t("09:00"));
                assert_eq!(req.end, t("09:30"));
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn insert_booking_rejects_bad_time_and_date() {
        let bad_time = format!(
            "INSERT INTO bookings (event_type_id, name, email, date, start_time, end_time) \
             VALUES ('{ID}', 'Ada', 'ada@example.com', '2030-01-07', 'nine', '09:30')"
        );
        assert!(matches!(parse_sql(&bad_time), Err(SqlError::Parse(_))));

        let bad_date = format!(
            "INSERT INTO bookings (event_type_id, name, email, date, start_time, end_time) \
             VALUES ('{ID}', 'Ada', 'ada@example.com', '07/01/2030', '09:00', '09:30')"
        );
        assert!(matches!(parse_sql(&bad_date), Err(SqlError::Parse(_))));
    }

    #[test]
    fn multi_row_booking_insert_rejected() {
        let sql = format!(
            "INSERT INTO bookings (event_type_id, name, email, date, start_time, end_time) VALUES \
             ('{ID}', 'A', 'a@example.com', '2030-01-07', '09:00', '09:30'), \
             ('{ID}', 'B', 'b@example.com', '2030-01-07', '10:00', '10:30')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn delete_statements() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{ID}'")).unwrap(),
            Command::CancelBooking { id: Ulid::from_string(ID).unwrap() }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM event_types WHERE id = '{ID}'")).unwrap(),
            Command::DeleteEventType { id: Ulid::from_string(ID).unwrap() }
        );
        assert_eq!(
            parse_sql("DELETE FROM date_overrides WHERE date = '2030-01-07'").unwrap(),
            Command::DeleteDateOverride { date: d("2030-01-07") }
        );
        assert!(matches!(
            parse_sql("DELETE FROM bookings"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn select_slots() {
        let sql = "SELECT * FROM slots WHERE event_type = 'quick-chat' AND date = '2030-01-07' AND format = '24h'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectSlots {
                event_type: EventTypeRef::Slug("quick-chat".into()),
                date: d("2030-01-07"),
                format: ClockFormat::H24,
            }
        );

        let by_id = format!("SELECT * FROM slots WHERE event_type = '{ID}' AND date = '2030-01-07'");
        match parse_sql(&by_id).unwrap() {
            Command::SelectSlots { event_type, format, .. } => {
                assert_eq!(event_type, EventTypeRef::Id(Ulid::from_string(ID).unwrap()));
                assert_eq!(format, ClockFormat::H12);
            }
            other => panic!("expected SelectSlots, got {other:?}"),
        }

        assert!(matches!(
            parse_sql("SELECT * FROM slots WHERE event_type = 'x'"),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn select_bookings_with_tab() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE tab = 'Past'").unwrap(),
            Command::SelectBookings { tab: Some(BookingTab::Past) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { tab: None }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE tab = 'someday'"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn select_other_tables() {
        assert_eq!(parse_sql("SELECT * FROM weekly_schedule").unwrap(), Command::SelectWeeklySchedule);
        assert_eq!(
            parse_sql("SELECT * FROM event_types WHERE slug = 'Intro'").unwrap(),
            Command::SelectEventTypes { filter: Some(EventTypeRef::Slug("intro".into())) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM booked_slots WHERE date = '2030-01-07'").unwrap(),
            Command::SelectBookedSlots { date: d("2030-01-07") }
        );
        assert_eq!(
            parse_sql("SELECT * FROM date_overrides").unwrap(),
            Command::SelectDateOverrides { date: None }
        );
    }

    #[test]
    fn unsupported_where_and_tables() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE tab = 'past' OR tab = 'upcoming'"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(parse_sql("SELECT * FROM rooms"), Err(SqlError::UnknownTable(_))));
        assert!(matches!(
            parse_sql("UPDATE bookings SET name = 'x'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
