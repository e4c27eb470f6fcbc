//! Relational lookup of food descriptions and per-100g nutrient values.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RetrievalError};

/// SQLite's default bound-parameter ceiling on older builds is 999.
const MAX_IN_PARAMS: usize = 500;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS foods (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    food_group  TEXT NOT NULL,
    calories    REAL NOT NULL,
    fat_g       REAL NOT NULL,
    protein_g   REAL NOT NULL,
    carbs_g     REAL NOT NULL
);
";

const SELECT_COLUMNS: &str = "id, name, food_group, calories, fat_g, protein_g, carbs_g";

/// One reference food. Nutrient values are per 100 g.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodRecord {
    pub id: i64,
    pub name: String,
    pub food_group: String,
    pub calories: f64,
    pub fat_g: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
}

impl FoodRecord {
    /// Text the offline pipeline feeds to the encoder for this food.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.name, self.food_group)
    }

    /// Labeled single-line summary used as grounding context.
    pub fn context_line(&self) -> String {
        format!(
            "{}, {}, calories (kcal per 100g): {}, fat (g): {}, protein (g): {}, carbohydrates (g): {}",
            self.name, self.food_group, self.calories, self.fat_g, self.protein_g, self.carbs_g
        )
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            food_group: row.get(2)?,
            calories: row.get(3)?,
            fat_g: row.get(4)?,
            protein_g: row.get(5)?,
            carbs_g: row.get(6)?,
        })
    }
}

/// Identifier-keyed lookup of food metadata.
pub trait MetadataStore: Send + Sync {
    /// Returns the records for `ids`. Unknown ids are absent from the map;
    /// duplicates in the input are harmless and an empty input yields an
    /// empty map.
    fn get_many(&self, ids: &[i64]) -> Result<HashMap<i64, FoodRecord>>;
}

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RetrievalError::io(parent, e))?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Mutations run in transactions, so a poisoned lock still guards a consistent table.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the whole table with `records` in one transaction.
    pub fn replace_all(&self, records: &[FoodRecord]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM foods", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO foods (id, name, food_group, calories, fat_g, protein_g, carbs_g)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.id,
                    r.name,
                    r.food_group,
                    r.calories,
                    r.fat_g,
                    r.protein_g,
                    r.carbs_g
                ])?;
            }
        }
        tx.commit()?;
        info!(count = records.len(), "Metadata table replaced");
        Ok(records.len())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM foods", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn get_many(&self, ids: &[i64]) -> Result<HashMap<i64, FoodRecord>> {
        let unique: Vec<i64> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut found = HashMap::with_capacity(unique.len());
        if unique.is_empty() {
            return Ok(found);
        }

        let conn = self.lock();
        for chunk in unique.chunks(MAX_IN_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT {} FROM foods WHERE id IN ({})", SELECT_COLUMNS, placeholders);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), FoodRecord::from_row)?;
            for row in rows {
                let record = row?;
                found.insert(record.id, record);
            }
        }

        debug!(requested = unique.len(), found = found.len(), "Metadata lookup");
        Ok(found)
    }
}
