//! Durable productivity log backed by SQLite.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};
use time::{Date, OffsetDateTime};
use time::macros::format_description;

pub const DEFAULT_REPORT_DAYS: u32 = 7;

const SCHEMA: &str = r#"CREATE TABLE IF NOT EXISTS productivity (
    date TEXT NOT NULL,
    focus_minutes INTEGER NOT NULL CHECK (focus_minutes >= 0),
    tasks_completed INTEGER NOT NULL CHECK (tasks_completed >= 0)
)"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductivityRecord {
    pub date: String,
    pub focus_minutes: u32,
    pub tasks_completed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTotals {
    pub date: String,
    pub focus_minutes: u64,
    pub tasks_completed: u64,
    pub entries: u32,
}

/// Per-day totals over a trailing window, oldest day first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductivityReport {
    pub days: u32,
    pub totals: Vec<DailyTotals>,
}

impl fmt::Display for ProductivityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.totals.is_empty() {
            return write!(f, "No productivity entries in the last {} days.", self.days);
        }

        writeln!(f, "Productivity, last {} days:", self.days)?;
        for day in &self.totals {
            writeln!(
                f,
                "  {}  focus {:>4} min  tasks {:>3}  ({} {})",
                day.date,
                day.focus_minutes,
                day.tasks_completed,
                day.entries,
                if day.entries == 1 { "entry" } else { "entries" }
            )?;
        }
        let focus: u64 = self.totals.iter().map(|d| d.focus_minutes).sum();
        let tasks: u64 = self.totals.iter().map(|d| d.tasks_completed).sum();
        write!(f, "  total       focus {focus:>4} min  tasks {tasks:>3}")
    }
}

pub struct ProductivityStore {
    conn: Mutex<Connection>,
}

impl fmt::Debug for ProductivityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductivityStore").finish_non_exhaustive()
    }
}

impl ProductivityStore {
    /// Opens (or creates) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])
            .context("Failed to create productivity table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Database lock poisoned: {e}"))
    }

    /// Appends one row dated today. Two identical calls store two rows.
    pub fn record(&self, focus_minutes: u32, tasks_completed: u32) -> Result<ProductivityRecord> {
        self.record_on(&today()?, focus_minutes, tasks_completed)
    }

    pub fn record_on(
        &self,
        date: &str,
        focus_minutes: u32,
        tasks_completed: u32,
    ) -> Result<ProductivityRecord> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO productivity (date, focus_minutes, tasks_completed) VALUES (?1, ?2, ?3)",
            params![date, focus_minutes, tasks_completed],
        )
        .context("Failed to insert productivity record")?;

        tracing::debug!(date, focus_minutes, tasks_completed, "productivity recorded");
        Ok(ProductivityRecord {
            date: date.to_string(),
            focus_minutes,
            tasks_completed,
        })
    }

    /// Rows dated within the last `days` days, in insertion order.
    pub fn recent(&self, days: u32) -> Result<Vec<ProductivityRecord>> {
        let since = window_start(days)?;
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, focus_minutes, tasks_completed FROM productivity
             WHERE date >= ?1
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok(ProductivityRecord {
                    date: row.get(0)?,
                    focus_minutes: row.get(1)?,
                    tasks_completed: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn daily_totals(&self, days: u32) -> Result<Vec<DailyTotals>> {
        let since = window_start(days)?;
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, SUM(focus_minutes), SUM(tasks_completed), COUNT(*) FROM productivity
             WHERE date >= ?1
             GROUP BY date
             ORDER BY date",
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok(DailyTotals {
                    date: row.get(0)?,
                    focus_minutes: row.get::<_, i64>(1)?.max(0) as u64,
                    tasks_completed: row.get::<_, i64>(2)?.max(0) as u64,
                    entries: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Drops the table so later writes fail.
    #[cfg(test)]
    pub(crate) fn break_for_test(&self) -> Result<()> {
        self.lock_conn()?.execute("DROP TABLE productivity", [])?;
        Ok(())
    }

    pub fn report(&self, days: u32) -> Result<ProductivityReport> {
        Ok(ProductivityReport {
            days,
            totals: self.daily_totals(days)?,
        })
    }
}

/// First day of a window ending today. Windows reaching past the calendar's
/// start are clamped to it.
fn window_start(days: u32) -> Result<String> {
    format_day(first_day_of_window(OffsetDateTime::now_utc().date(), days))
}

fn first_day_of_window(today: Date, days: u32) -> Date {
    today
        .checked_sub(time::Duration::days(i64::from(days)))
        .unwrap_or(Date::MIN)
}

/// Current UTC day as `YYYY-MM-DD`.
pub fn today() -> Result<String> {
    format_day(OffsetDateTime::now_utc().date())
}

fn format_day(day: Date) -> Result<String> {
    day.format(format_description!("[year]-[month]-[day]"))
        .context("Failed to format date")
}

#[cfg(test)]
mod tests {
    use super::{
        DailyTotals, ProductivityReport, ProductivityStore, first_day_of_window, format_day, today,
    };
    use tempfile::tempdir;
    use time::Date;
    use time::macros::date;

    #[test]
    fn today_is_an_iso_day() {
        let day = today().expect("today");
        assert_eq!(day.len(), 10);
        assert_eq!(&day[4..5], "-");
        assert_eq!(&day[7..8], "-");
    }

    #[test]
    fn duplicate_records_are_kept() {
        let store = ProductivityStore::open_in_memory().expect("store");
        let first = store.record(5, 2).expect("first");
        let second = store.record(5, 2).expect("second");
        assert_eq!(first, second);

        let rows = store.recent(7).expect("recent");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.focus_minutes == 5 && r.tasks_completed == 2));
        assert_eq!(rows[0].date, first.date);
    }

    #[test]
    fn zero_values_are_accepted() {
        let store = ProductivityStore::open_in_memory().expect("store");
        store.record(0, 0).expect("zero record");
        assert_eq!(store.recent(1).expect("recent").len(), 1);
    }

    #[test]
    fn recent_filters_out_old_days() {
        let store = ProductivityStore::open_in_memory().expect("store");
        store.record_on("2001-01-01", 30, 1).expect("old");
        store.record(45, 3).expect("today");

        let rows = store.recent(7).expect("recent");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].focus_minutes, 45);
    }

    #[test]
    fn huge_windows_still_include_today() {
        let store = ProductivityStore::open_in_memory().expect("store");
        store.record(5, 2).expect("record");

        for days in [10_000_000, u32::MAX] {
            assert_eq!(store.recent(days).expect("recent").len(), 1, "days = {days}");
            assert_eq!(store.daily_totals(days).expect("totals").len(), 1, "days = {days}");
        }
    }

    #[test]
    fn window_start_counts_back_from_today() {
        let today = date!(2026 - 03 - 02);
        assert_eq!(first_day_of_window(today, 1), date!(2026 - 03 - 01));
        assert_eq!(first_day_of_window(today, 7), date!(2026 - 02 - 23));
        assert_eq!(first_day_of_window(today, u32::MAX), Date::MIN);
        assert!(format_day(Date::MIN).expect("format") < "0001-01-01".to_string());
    }

    #[test]
    fn daily_totals_group_by_date() {
        let store = ProductivityStore::open_in_memory().expect("store");
        store.record(25, 1).expect("a");
        store.record(50, 2).expect("b");

        let totals = store.daily_totals(7).expect("totals");
        assert_eq!(
            totals,
            vec![DailyTotals {
                date: today().expect("today"),
                focus_minutes: 75,
                tasks_completed: 3,
                entries: 2,
            }]
        );
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/neurocode.db");
        {
            let store = ProductivityStore::open(&path).expect("open");
            store.record(90, 4).expect("record");
        }
        let store = ProductivityStore::open(&path).expect("reopen");
        let rows = store.recent(7).expect("recent");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tasks_completed, 4);
    }

    #[test]
    fn report_renders_totals() {
        let report = ProductivityReport {
            days: 7,
            totals: vec![
                DailyTotals {
                    date: "2026-10-18".to_string(),
                    focus_minutes: 120,
                    tasks_completed: 4,
                    entries: 2,
                },
                DailyTotals {
                    date: "2026-10-19".to_string(),
                    focus_minutes: 30,
                    tasks_completed: 1,
                    entries: 1,
                },
            ],
        };
        insta::assert_snapshot!(report.to_string(), @r"
        Productivity, last 7 days:
          2026-10-18  focus  120 min  tasks   4  (2 entries)
          2026-10-19  focus   30 min  tasks   1  (1 entry)
          total       focus  150 min  tasks   5
        ");
    }

    #[test]
    fn empty_report_says_so() {
        let report = ProductivityReport {
            days: 3,
            totals: Vec::new(),
        };
        assert_eq!(report.to_string(), "No productivity entries in the last 3 days.");
    }
}
