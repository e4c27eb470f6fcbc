use std::sync::Arc;
use std::thread;

use meal_retrieval::config::Settings;
use meal_retrieval::metadata_store::{FoodRecord, SqliteMetadataStore};
use meal_retrieval::prompt::{meal_prompt, user_message, NO_MATCHES_MESSAGE, UNAVAILABLE_MESSAGE};
use meal_retrieval::retrieval_service::RetrievalService;
use meal_retrieval::search::{EmbeddingRecord, EmbeddingStore, NeighborSearch, VectorIndex};
use meal_retrieval::{Result, RetrievalError};
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn food(id: i64, name: &str, group: &str, calories: f64, fat_g: f64, protein_g: f64, carbs_g: f64) -> FoodRecord {
    FoodRecord {
        id,
        name: name.to_string(),
        food_group: group.to_string(),
        calories,
        fat_g,
        protein_g,
        carbs_g,
    }
}

fn unit_records() -> Vec<EmbeddingRecord> {
    vec![
        EmbeddingRecord::new(1, vec![1.0, 0.0, 0.0]),
        EmbeddingRecord::new(2, vec![0.0, 1.0, 0.0]),
        EmbeddingRecord::new(3, vec![0.0, 0.0, 1.0]),
    ]
}

fn random_records(count: usize, dimension: usize, seed: u64) -> Vec<EmbeddingRecord> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let vector = (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
            EmbeddingRecord::new(i as i64 * 7 + 100, vector)
        })
        .collect()
}

#[test]
fn test_fruit_example_end_to_end() -> Result<()> {
    let index = Arc::new(VectorIndex::build(&unit_records())?);

    let hits = index.search(&[0.0, 1.0, 0.0], 2)?;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, 2);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    // Apple and Carrot tie at zero; the lower id wins.
    assert_eq!(hits[1].id, 1);
    assert!(hits[1].score.abs() < 1e-6);

    let metadata = SqliteMetadataStore::open_in_memory()?;
    metadata.replace_all(&[
        food(1, "Apple", "Fruits", 52.0, 0.2, 0.3, 13.8),
        food(2, "Banana", "Fruits", 89.0, 0.3, 1.1, 22.8),
    ])?;
    let service = RetrievalService::new(index, metadata);

    let lines = service.retrieve(&[0.0, 1.0, 0.0], 3)?;
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        "Banana, Fruits, calories (kcal per 100g): 89, fat (g): 0.3, protein (g): 1.1, carbohydrates (g): 22.8"
    );
    assert!(lines[1].starts_with("Apple, Fruits"));

    let prompt = meal_prompt("a banana smoothie", &lines);
    assert!(prompt.contains("a banana smoothie"));
    assert!(prompt.contains(&format!("{}\n{}", lines[0], lines[1])));
    Ok(())
}

#[test]
fn test_k_larger_than_index_is_clamped() -> Result<()> {
    let index = VectorIndex::build(&unit_records())?;
    let hits = index.search(&[0.3, 0.3, 0.3], 50)?;
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    Ok(())
}

#[test]
fn test_store_build_save_load_gives_identical_results() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = EmbeddingStore::new(dir.path().join("embeddings.femb"));
    let index_path = dir.path().join("food_index.fidx");

    let records = random_records(200, 16, 42);
    store.write(&records)?;
    assert_eq!(store.read_all()?, records);

    let built = VectorIndex::from_store(&store)?;
    built.save(&index_path)?;
    let loaded = VectorIndex::load(&index_path)?;

    assert_eq!(loaded.len(), 200);
    assert_eq!(loaded.dimension(), 16);
    assert_eq!(loaded.ids(), built.ids());

    for query in random_records(10, 16, 7) {
        let a = built.search(&query.vector, 5)?;
        let b = loaded.search(&query.vector, 5)?;
        assert_eq!(a, b);
    }
    Ok(())
}

#[test]
fn test_self_query_ranks_itself_first() -> Result<()> {
    let records = random_records(100, 8, 3);
    let index = VectorIndex::build(&records)?;
    for record in records.iter().take(20) {
        let hits = index.search(&record.vector, 1)?;
        assert_eq!(hits[0].id, record.id);
        assert!((hits[0].score - 1.0).abs() < 1e-4);
    }
    Ok(())
}

#[test]
fn test_concurrent_searches_share_one_index() -> Result<()> {
    let records = random_records(500, 12, 11);
    let index = Arc::new(VectorIndex::build(&records)?);
    let queries: Vec<Vec<f32>> = records.iter().take(8).map(|r| r.vector.clone()).collect();
    let expected: Vec<_> = queries
        .iter()
        .map(|q| index.search(q, 5))
        .collect::<Result<Vec<_>>>()?;

    let handles: Vec<_> = queries
        .into_iter()
        .map(|query| {
            let index = Arc::clone(&index);
            thread::spawn(move || index.search(&query, 5))
        })
        .collect();

    for (handle, want) in handles.into_iter().zip(expected) {
        let got = handle.join().expect("search thread panicked")?;
        assert_eq!(got, want);
    }
    Ok(())
}

#[test]
fn test_load_or_rebuild_recovers_from_corrupt_index() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = EmbeddingStore::new(dir.path().join("embeddings.femb"));
    let index_path = dir.path().join("food_index.fidx");
    store.write(&unit_records())?;
    std::fs::write(&index_path, b"definitely not an index").unwrap();

    let index = VectorIndex::load_or_rebuild(&index_path, &store)?;
    assert_eq!(index.len(), 3);

    // The rebuilt file is now loadable on its own.
    assert_eq!(VectorIndex::load(&index_path)?.len(), 3);
    Ok(())
}

#[test]
fn test_missing_index_and_store_reports_unavailable() {
    let dir = tempdir().unwrap();
    let store = EmbeddingStore::new(dir.path().join("embeddings.femb"));
    let outcome = VectorIndex::load_or_rebuild(&dir.path().join("food_index.fidx"), &store);

    let err = outcome.unwrap_err();
    assert!(err.is_unavailable());
    assert_ne!(user_message(&Err::<Vec<String>, RetrievalError>(err)), NO_MATCHES_MESSAGE);
}

#[test]
fn test_metadata_on_disk_survives_reopen() -> Result<()> {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("food.db");
    {
        let metadata = SqliteMetadataStore::open(&db_path)?;
        metadata.replace_all(&[food(5, "Oats", "Grains", 389.0, 6.9, 16.9, 66.3)])?;
    }
    let reopened = SqliteMetadataStore::open(&db_path)?;
    assert_eq!(reopened.count()?, 1);

    let index = Arc::new(VectorIndex::build(&[EmbeddingRecord::new(5, vec![0.5, 0.5])])?);
    let service = RetrievalService::new(index, reopened);
    let foods = service.retrieve_detailed(&[1.0, 1.0], 3)?;
    assert_eq!(foods.len(), 1);
    assert_eq!(foods[0].record.name, "Oats");
    Ok(())
}

type FoodService = RetrievalService<VectorIndex, SqliteMetadataStore>;

fn settings_in(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.paths.embedding_store = dir.join("embeddings.femb");
    settings.paths.index = dir.join("food_index.fidx");
    settings.paths.metadata_db = dir.join("food.db");
    settings
}

#[test]
fn test_open_without_index_reads_as_unavailable() {
    let dir = tempdir().unwrap();
    let mut settings = settings_in(dir.path());

    for rebuild in [true, false] {
        settings.retrieval.rebuild_on_load_failure = rebuild;
        let err = match FoodService::open(&settings) {
            Ok(_) => panic!("opened a service without an index"),
            Err(e) => e,
        };
        assert!(matches!(err, RetrievalError::NotFound(_)), "got {:?}", err);
        assert!(user_message(&Err(err)).starts_with(UNAVAILABLE_MESSAGE));
    }
}

#[test]
fn test_open_rebuilds_index_from_store() -> Result<()> {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    EmbeddingStore::new(&settings.paths.embedding_store).write(&unit_records())?;
    SqliteMetadataStore::open(&settings.paths.metadata_db)?
        .replace_all(&[food(2, "Banana", "Fruits", 89.0, 0.3, 1.1, 22.8)])?;

    let service = FoodService::open(&settings)?;
    assert_eq!(service.index().len(), 3);
    assert!(settings.paths.index.exists());

    let lines = service.retrieve(&[0.0, 1.0, 0.0], 1)?;
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("Banana"));
    Ok(())
}
