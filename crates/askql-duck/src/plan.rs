//! Scan-size estimation from DuckDB `EXPLAIN (FORMAT JSON)` plans

use duckdb::{Connection, Result as DuckResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Schema assumed for unqualified table names
const DEFAULT_SCHEMA: &str = "main";

/// Width used for variable-length types and unknown columns.
const VARIABLE_WIDTH: u64 = 32;
/// Row width assumed for scans that don't name a table (table functions).
const UNKNOWN_ROW_WIDTH: u64 = 64;

/// One scan operator found in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanNode {
    /// Schema from a qualified table name; `main` is assumed when absent
    pub schema: Option<String>,
    pub table: Option<String>,
    /// Planner estimate of rows leaving the scan, after pushed-down filters
    pub cardinality: u64,
    pub projections: Vec<String>,
    /// Pushed-down filter expressions, as printed by the planner
    pub filters: Vec<String>,
}

impl ScanNode {
    fn unnamed() -> Self {
        Self {
            schema: None,
            table: None,
            cardinality: 0,
            projections: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn key(&self) -> Option<TableKey> {
        self.table.as_ref().map(|table| TableKey {
            schema: self.schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            table: table.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub schema: String,
    pub table: String,
}

/// What a full read of one table costs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStats {
    pub rows: u64,
    /// Column name (lowercase) to byte width
    pub widths: HashMap<String, u64>,
}

/// Collect every scan node in the plan tree.
pub fn scan_nodes(plan: &Value) -> Vec<ScanNode> {
    let mut nodes = Vec::new();
    collect(plan, &mut nodes);
    nodes
}

fn collect(value: &Value, nodes: &mut Vec<ScanNode>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect(item, nodes)),
        Value::Object(node) => {
            let name = node
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");

            if name.contains("SCAN") && name != "DUMMY_SCAN" {
                if let Some(scan) = node.get("extra_info").map(parse_extra_info) {
                    nodes.push(scan);
                }
            }

            if let Some(children) = node.get("children") {
                collect(children, nodes);
            }
        }
        _ => {}
    }
}

fn parse_extra_info(info: &Value) -> ScanNode {
    match info {
        // DuckDB >= 1.1: key/value map
        Value::Object(map) => {
            let (schema, table) = match map.get("Table").and_then(Value::as_str) {
                Some(name) => {
                    let (schema, table) = split_qualified(name);
                    (schema, Some(table))
                }
                None => (None, None),
            };
            let cardinality = map
                .get("Estimated Cardinality")
                .map(|v| match v {
                    Value::String(s) => parse_count(s),
                    other => other.as_u64().unwrap_or(0),
                })
                .unwrap_or(0);
            ScanNode {
                schema,
                table,
                cardinality,
                projections: string_list(map.get("Projections")),
                filters: string_list(map.get("Filters")),
            }
        }
        // Older releases: dash-separated sections of text. Table and
        // projections first, then filters, `EC: n` last.
        Value::String(text) => {
            let mut sections: Vec<Vec<String>> = vec![Vec::new()];
            let mut cardinality = 0;
            for line in split_lines(text) {
                if let Some(count) = line.strip_prefix("EC:") {
                    cardinality = parse_count(count);
                } else if line.chars().all(|c| c == '-') {
                    sections.push(Vec::new());
                } else if let Some(section) = sections.last_mut() {
                    section.push(line);
                }
            }

            let mut sections = sections.into_iter().filter(|s| !s.is_empty());
            let mut head = sections.next().unwrap_or_default().into_iter();
            let (schema, table) = match head.next() {
                Some(name) => {
                    let (schema, table) = split_qualified(&name);
                    (schema, Some(table))
                }
                None => (None, None),
            };
            ScanNode {
                schema,
                table,
                cardinality,
                projections: head.collect(),
                filters: sections.flatten().collect(),
            }
        }
        _ => ScanNode::unnamed(),
    }
}

/// `db.main.units` -> (`main`, `units`); `units` -> (None, `units`)
fn split_qualified(name: &str) -> (Option<String>, String) {
    let mut parts = name
        .trim()
        .rsplit('.')
        .map(|part| part.trim().trim_matches('"').to_string());
    let table = parts.next().unwrap_or_default();
    (parts.next(), table)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => split_lines(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn parse_count(text: &str) -> u64 {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Lowercase identifiers in a filter expression, skipping string literals.
fn identifiers(expr: &str) -> HashSet<String> {
    let mut found = HashSet::new();
    let mut current = String::new();
    let mut in_literal = false;

    for c in expr.chars() {
        if in_literal {
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            current.extend(c.to_lowercase());
            continue;
        }
        if !current.is_empty() {
            found.insert(std::mem::take(&mut current));
        }
        if c == '\'' {
            in_literal = true;
        }
    }
    if !current.is_empty() {
        found.insert(current);
    }
    found
}

/// Fixed byte width for a DuckDB type name.
pub fn type_width(data_type: &str) -> u64 {
    let upper = data_type.to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "BOOLEAN" | "TINYINT" | "UTINYINT" => 1,
        "SMALLINT" | "USMALLINT" => 2,
        "INTEGER" | "UINTEGER" | "FLOAT" | "REAL" | "DATE" => 4,
        "BIGINT" | "UBIGINT" | "DOUBLE" | "TIMESTAMP" | "TIMESTAMP WITH TIME ZONE" | "TIME" => 8,
        "HUGEINT" | "UHUGEINT" | "UUID" | "INTERVAL" | "DECIMAL" => 16,
        _ => VARIABLE_WIDTH,
    }
}

/// Bytes a set of scans would read.
///
/// A table scan reads every row of the table whatever its filters select,
/// so table scans are sized from the table's full row count. The columns
/// read are the projected ones plus any referenced only by a filter.
pub fn scan_bytes(scans: &[ScanNode], tables: &HashMap<TableKey, TableStats>) -> u64 {
    scans
        .iter()
        .map(|scan| match scan.key().and_then(|key| tables.get(&key)) {
            Some(stats) => {
                let rows = stats.rows.max(scan.cardinality);
                rows.saturating_mul(read_width(scan, stats).max(1))
            }
            None => scan.cardinality.saturating_mul(UNKNOWN_ROW_WIDTH),
        })
        .fold(0u64, u64::saturating_add)
}

fn read_width(scan: &ScanNode, stats: &TableStats) -> u64 {
    if scan.projections.is_empty() {
        return stats.widths.values().sum();
    }

    let mut columns: HashSet<String> = scan
        .projections
        .iter()
        .map(|p| p.trim_matches('"').to_lowercase())
        .collect();
    for filter in &scan.filters {
        columns.extend(
            identifiers(filter)
                .into_iter()
                .filter(|ident| stats.widths.contains_key(ident)),
        );
    }

    columns
        .iter()
        .map(|c| stats.widths.get(c).copied().unwrap_or(VARIABLE_WIDTH))
        .sum()
}

/// Plan the query (without running it) and estimate the bytes its scans read.
pub fn estimate_scan_bytes(conn: &Connection, query: &str) -> DuckResult<u64> {
    let explain = format!("EXPLAIN (FORMAT JSON) {}", query);
    let mut stmt = conn.prepare(&explain)?;
    let plans: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<DuckResult<Vec<_>>>()?;

    let mut scans = Vec::new();
    for plan in &plans {
        match serde_json::from_str::<Value>(plan) {
            Ok(value) => scans.extend(scan_nodes(&value)),
            Err(e) => tracing::warn!("Unreadable EXPLAIN output: {}", e),
        }
    }

    let mut tables = HashMap::new();
    for key in scans.iter().filter_map(ScanNode::key) {
        if !tables.contains_key(&key) {
            let stats = table_stats(conn, &key)?;
            tables.insert(key, stats);
        }
    }

    Ok(scan_bytes(&scans, &tables))
}

fn table_stats(conn: &Connection, key: &TableKey) -> DuckResult<TableStats> {
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = ? AND table_name = ?",
    )?;
    let widths = stmt
        .query_map([&key.schema, &key.table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .map(|column| column.map(|(name, data_type)| (name.to_lowercase(), type_width(&data_type))))
        .collect::<DuckResult<HashMap<_, _>>>()?;

    let mut stmt = conn.prepare(
        "SELECT estimated_size FROM duckdb_tables() WHERE schema_name = ? AND table_name = ?",
    )?;
    let rows = stmt
        .query_map([&key.schema, &key.table], |row| row.get::<_, Option<i64>>(0))?
        .next()
        .transpose()?
        .flatten()
        .unwrap_or(0);

    Ok(TableStats {
        rows: rows.max(0) as u64,
        widths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn units_stats(rows: u64) -> HashMap<TableKey, TableStats> {
        let widths = HashMap::from([
            ("id".to_string(), 4),
            ("status".to_string(), 32),
            ("rent".to_string(), 8),
        ]);
        HashMap::from([(
            TableKey {
                schema: "main".to_string(),
                table: "units".to_string(),
            },
            TableStats { rows, widths },
        )])
    }

    fn units_scan(cardinality: u64, projections: &[&str], filters: &[&str]) -> ScanNode {
        ScanNode {
            schema: None,
            table: Some("units".to_string()),
            cardinality,
            projections: projections.iter().map(|p| p.to_string()).collect(),
            filters: filters.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_scan_nodes_from_map_extra_info() {
        let plan = json!([{
            "name": "PROJECTION",
            "children": [{
                "name": "SEQ_SCAN ",
                "children": [],
                "extra_info": {
                    "Table": "units",
                    "Type": "Sequential Scan",
                    "Projections": "id\nstatus",
                    "Filters": "status='vacant'",
                    "Estimated Cardinality": "~1200"
                }
            }],
            "extra_info": {}
        }]);

        assert_eq!(
            scan_nodes(&plan),
            vec![units_scan(1200, &["id", "status"], &["status='vacant'"])]
        );
    }

    #[test]
    fn test_scan_nodes_from_text_extra_info() {
        let plan = json!({
            "name": "SEQ_SCAN",
            "children": [],
            "extra_info": "reporting.units\nid\n-----\nrent>1000\n-----\nEC: 40"
        });
        let scans = scan_nodes(&plan);
        assert_eq!(scans[0].schema.as_deref(), Some("reporting"));
        assert_eq!(scans[0].table.as_deref(), Some("units"));
        assert_eq!(scans[0].cardinality, 40);
        assert_eq!(scans[0].projections, vec!["id".to_string()]);
        assert_eq!(scans[0].filters, vec!["rent>1000".to_string()]);
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("units"), (None, "units".to_string()));
        assert_eq!(
            split_qualified("db.\"sales\".units"),
            (Some("sales".to_string()), "units".to_string())
        );
    }

    #[test]
    fn test_dummy_scan_ignored() {
        let plan = json!([{"name": "DUMMY_SCAN", "children": [], "extra_info": {}}]);
        assert!(scan_nodes(&plan).is_empty());
    }

    #[test]
    fn test_scan_bytes_uses_projected_widths() {
        let tables = units_stats(100);

        assert_eq!(scan_bytes(&[units_scan(100, &["id", "rent"], &[])], &tables), 1_200);
        assert_eq!(scan_bytes(&[units_scan(100, &[], &[])], &tables), 4_400);

        let function_scan = ScanNode {
            cardinality: 10,
            ..ScanNode::unnamed()
        };
        assert_eq!(scan_bytes(&[function_scan], &tables), 640);
    }

    #[test]
    fn test_filtered_scan_reads_whole_table() {
        let tables = units_stats(1_000_000);

        let unfiltered = scan_bytes(&[units_scan(1_000_000, &["id"], &[])], &tables);
        let filtered = scan_bytes(
            &[units_scan(200_000, &["id"], &["status='vacant' AND status IS NOT NULL"])],
            &tables,
        );

        assert_eq!(unfiltered, 4_000_000);
        assert_eq!(filtered, 36_000_000);
        assert!(filtered >= unfiltered);
    }

    #[test]
    fn test_tables_keyed_by_schema() {
        let tables = units_stats(100);
        let other_schema = ScanNode {
            schema: Some("archive".to_string()),
            ..units_scan(7, &["id"], &[])
        };
        assert_eq!(scan_bytes(&[other_schema], &tables), 7 * UNKNOWN_ROW_WIDTH);
    }

    #[test]
    fn test_identifiers_skip_literals() {
        let found = identifiers("status='rent' AND Rent>=1000");
        assert!(found.contains("status"));
        assert!(found.contains("rent"));
        assert!(found.contains("and"));
        assert_eq!(identifiers("status='rent'"), HashSet::from(["status".to_string()]));
    }

    #[test]
    fn test_type_width() {
        assert_eq!(type_width("INTEGER"), 4);
        assert_eq!(type_width("DECIMAL(18,3)"), 16);
        assert_eq!(type_width("VARCHAR"), 32);
        assert_eq!(type_width("timestamp"), 8);
    }
}
