use anyhow::Result;
use tempfile::TempDir;
use std::fs;
use std::path::PathBuf;
use mandi_server::{build_sqlite_url, connect_pool, health_with_pool, run_migrations, sqlite_url_for_path};

// Funzione di utilità per costruire l'URL SQLite da un percorso di file
fn sqlite_url_for(p: &PathBuf) -> String {
    sqlite_url_for_path(p.as_path()).expect("build sqlite url")
}

// Test che verifica che le migrazioni creino le tabelle necessarie
#[tokio::test]
async fn run_migrations_creates_tables() -> Result<()> {
    let td = TempDir::new()?;
    let db_path = td.path().join("mandi.db");

    // assicurati che la directory genitrice esista e crea il file
    if let Some(parent) = db_path.parent() { fs::create_dir_all(parent)?; }
    fs::File::create(&db_path)?;

    let url = sqlite_url_for(&db_path);
    let pool = connect_pool(&url, 2).await?;
    run_migrations(&pool).await?;

    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('groups','messages')"
    ).fetch_all(&pool).await?;

    for expected in ["groups", "messages"] {
        assert!(names.contains(&expected.to_string()), "missing table {}", expected);
    }
    Ok(())
}

// Le migrazioni si possono rieseguire sullo stesso database
#[tokio::test]
async fn migrations_are_idempotent() -> Result<()> {
    let td = TempDir::new()?;
    let url = sqlite_url_for(&td.path().join("mandi.db"));
    let pool = connect_pool(&url, 2).await?;
    run_migrations(&pool).await?;
    run_migrations(&pool).await?;
    Ok(())
}

// Test che verifica che l'handler di health funzioni dopo le migrazioni
#[tokio::test]
async fn health_handler_works_after_migrations() -> Result<()> {
    let td = TempDir::new()?;
    let db_path = td.path().join("mandi.db");
    let url = sqlite_url_for(&db_path);
    let pool = connect_pool(&url, 2).await?;
    run_migrations(&pool).await?;

    let status = health_with_pool(&pool).await;
    assert!(status.is_success(), "health should return 200 OK");
    Ok(())
}

// Test che verifica che la creazione del file DB e delle directory genitrici sia idempotente
#[tokio::test]
async fn creating_db_file_and_parent_dirs_is_idempotent() -> Result<()> {
    let td = TempDir::new()?;
    let nested = td.path().join("a").join("b").join("mandi.db");
    let parent = nested.parent().unwrap().to_path_buf();
    assert!(!parent.exists());

    // usa la funzione di libreria che creerà le directory genitrici e il file
    let url = build_sqlite_url(nested.to_str().unwrap())?;
    let pool = connect_pool(&url, 2).await?;
    run_migrations(&pool).await?;

    assert!(parent.exists(), "parent dir should have been created");
    assert!(nested.exists(), "db file should have been created");

    let again = sqlite_url_for_path(nested.as_path())?;
    assert_eq!(again, url);
    Ok(())
}

// I messaggi sopravvivono alla chiusura del pool: l'append è durevole quando ritorna
#[tokio::test]
async fn appended_messages_survive_reconnect() -> Result<()> {
    use mandi_core::{GroupFilter, SendMessageRequest};
    use mandi_server::AppState;
    use std::time::Duration;

    let td = TempDir::new()?;
    let url = sqlite_url_for(&td.path().join("mandi.db"));

    let group_id = {
        let pool = connect_pool(&url, 2).await?;
        run_migrations(&pool).await?;
        let state = AppState::new(pool.clone(), Duration::from_secs(5));
        let group = state.directory.list(&GroupFilter::default()).await?.remove(0);
        state
            .gateway
            .send(SendMessageRequest {
                group_id: group.id.clone(),
                text: "Urea prices up".into(),
                sender_id: "u1".into(),
                sender_name: "Farmer1".into(),
                kind: None,
            })
            .await?;
        pool.close().await;
        group.id
    };

    let pool = connect_pool(&url, 2).await?;
    let state = AppState::new(pool, Duration::from_secs(5));
    let history = state.store.list_by_group(&group_id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "Urea prices up");
    // il catalogo esiste già: nessun nuovo seeding
    assert_eq!(state.directory.list(&GroupFilter::default()).await?.len(), 4);
    Ok(())
}
