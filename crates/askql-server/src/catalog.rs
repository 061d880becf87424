//! Database catalog extraction
//!
//! The catalog is rendered as JSON lines and handed to the translator as
//! schema context, and served as-is by the `catalog` tool.

use askql_duck::duckdb_value_to_json;
use duckdb::{Connection, Result as DuckResult};
use serde::{Deserialize, Serialize};

/// Sample rows kept per table
const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCatalog {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub sample_data: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCatalog {
    pub database_path: String,
    pub tables: Vec<TableCatalog>,
}

impl DatabaseCatalog {
    /// Extract catalog information through an open connection
    pub fn from_connection(conn: &Connection, database_path: &str) -> DuckResult<Self> {
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' ORDER BY table_name",
        )?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<DuckResult<Vec<_>>>()?;

        let mut tables = Vec::new();
        for table_name in table_names {
            match Self::extract_table_info(conn, &table_name) {
                Ok(table) => tables.push(table),
                Err(e) => tracing::warn!(table = %table_name, "Skipping table in catalog: {}", e),
            }
        }

        Ok(DatabaseCatalog {
            database_path: database_path.to_string(),
            tables,
        })
    }

    /// Extract information for a single table
    fn extract_table_info(conn: &Connection, table_name: &str) -> DuckResult<TableCatalog> {
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_name = ? \
             ORDER BY ordinal_position",
        )?;
        let columns: Vec<ColumnInfo> = stmt
            .query_map([table_name], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                    is_nullable: row.get::<_, String>(2)? == "YES",
                })
            })?
            .collect::<DuckResult<Vec<_>>>()?;

        let quoted = table_name.replace('"', "\"\"");
        let count_query = format!("SELECT COUNT(*) FROM \"{}\"", quoted);
        let row_count: i64 = conn.query_row(&count_query, [], |row| row.get(0))?;

        let sample_query = format!("SELECT * FROM \"{}\" LIMIT {}", quoted, SAMPLE_ROWS);
        let mut sample_stmt = conn.prepare(&sample_query)?;
        let mut rows = sample_stmt.query([])?;
        let mut sample_data = Vec::new();
        while let Some(row) = rows.next()? {
            let mut row_map = serde_json::Map::new();
            for (idx, column) in columns.iter().enumerate() {
                row_map.insert(column.name.clone(), duckdb_value_to_json(row, idx)?);
            }
            sample_data.push(row_map);
        }

        Ok(TableCatalog {
            name: table_name.to_string(),
            columns,
            sample_data,
            row_count: row_count.max(0) as usize,
        })
    }

    /// One table per line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let lines = self
            .tables
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_from_connection() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE units (id INTEGER NOT NULL, status VARCHAR);
             INSERT INTO units VALUES (1, 'vacant'), (2, 'leased'), (3, 'vacant'), (4, 'leased');
             CREATE TABLE leases (unit_id INTEGER, rent DOUBLE);",
        )
        .unwrap();

        let catalog = DatabaseCatalog::from_connection(&conn, ":memory:").unwrap();
        assert_eq!(catalog.table_names(), vec!["leases", "units"]);

        let units = &catalog.tables[1];
        assert_eq!(units.row_count, 4);
        assert_eq!(units.sample_data.len(), SAMPLE_ROWS);
        assert_eq!(units.columns[0].name, "id");
        assert!(!units.columns[0].is_nullable);
        assert!(units.columns[1].is_nullable);

        let jsonl = catalog.to_jsonl().unwrap();
        assert_eq!(jsonl.lines().count(), 2);
        assert!(jsonl.contains("\"name\":\"units\""));
    }
}
