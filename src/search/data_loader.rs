use csv::ReaderBuilder;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Result, RetrievalError};
use crate::metadata_store::FoodRecord;

// Column headers of the nutrition spreadsheet export
const ID_COL: &str = "ID";
const NAME_COL: &str = "name";
const GROUP_COL: &str = "Food Group";
const KCAL_COL: &str = "Calories";
const FAT_COL: &str = "Fat (g)";
const PROTEIN_COL: &str = "Protein (g)";
const CARB_COL: &str = "Carbohydrate (g)";

/// Blank cells mean zero in the export; anything else must parse.
fn parse_nutrient(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        Some(0.0)
    } else {
        s.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

// Spreadsheet round-trips sometimes render integer ids as "167512.0".
fn parse_id(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| v as i64)
    })
}

pub fn load_food_records(csv_path: &Path) -> Result<Vec<FoodRecord>> {
    let file = std::fs::File::open(csv_path).map_err(|e| RetrievalError::io(csv_path, e))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| RetrievalError::InvalidArgument(format!("Column '{}' not found", name)))
    };
    let id_idx = column(ID_COL)?;
    let name_idx = column(NAME_COL)?;
    let group_idx = column(GROUP_COL)?;
    let kcal_idx = column(KCAL_COL)?;
    let fat_idx = column(FAT_COL)?;
    let protein_idx = column(PROTEIN_COL)?;
    let carb_idx = column(CARB_COL)?;

    let mut seen_ids = HashSet::new();
    let mut foods = Vec::new();
    for (row_index, result) in rdr.records().enumerate() {
        let record = result?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let Some(id) = parse_id(field(id_idx)) else {
            warn!(row = row_index, "Skipping row without a valid ID");
            continue;
        };
        let name = field(name_idx).trim().to_string();
        if name.is_empty() {
            warn!(row = row_index, id, "Skipping row with empty name");
            continue;
        }
        if !seen_ids.insert(id) {
            warn!(row = row_index, id, "Skipping duplicate ID");
            continue;
        }

        let nutrients = (
            parse_nutrient(field(kcal_idx)),
            parse_nutrient(field(fat_idx)),
            parse_nutrient(field(protein_idx)),
            parse_nutrient(field(carb_idx)),
        );
        let (Some(calories), Some(fat_g), Some(protein_g), Some(carbs_g)) = nutrients else {
            warn!(row = row_index, id, "Skipping row with non-numeric nutrient value");
            continue;
        };

        foods.push(FoodRecord {
            id,
            name,
            food_group: field(group_idx).trim().to_string(),
            calories,
            fat_g,
            protein_g,
            carbs_g,
        });
    }

    if foods.is_empty() {
        return Err(RetrievalError::InvalidArgument(format!(
            "No valid food records loaded from {}",
            csv_path.display()
        )));
    }

    info!(path = %csv_path.display(), count = foods.len(), "Food records loaded");
    Ok(foods)
}
