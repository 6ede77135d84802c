use tg_digestbot::config;
use tg_digestbot::db;
use tg_digestbot::ingest::{DiscardReason, IngestOutcome, Ingestor, RawEvent, WatchList};
use tg_digestbot::model::MediaKind;

const GOOD_TEXT: &str =
    "The new release ships faster incremental builds and a redesigned dashboard for teams.";

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn ingestor(pool: &sqlx::SqlitePool) -> Ingestor {
    let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    Ingestor::new(
        pool.clone(),
        WatchList::new(&cfg.watch.patterns),
        cfg.quality.filter(),
    )
}

fn event(chat_title: &str, message_id: &str, text: &str) -> RawEvent {
    RawEvent {
        chat_id: "-100777".into(),
        chat_title: chat_title.into(),
        chat_username: Some("mvp1news".into()),
        message_id: message_id.into(),
        text: text.into(),
        author_id: Some("99".into()),
        media: vec![MediaKind::Photo],
    }
}

async fn post_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM posts")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn stores_once_and_reports_redelivery_as_duplicate() {
    let pool = setup_pool().await;
    let ingestor = ingestor(&pool);

    let first = ingestor
        .handle_event(&event("MVP 1 News", "10", GOOD_TEXT))
        .await
        .unwrap();
    let id = match first {
        IngestOutcome::Stored(id) => id,
        other => panic!("expected stored, got {other:?}"),
    };
    let second = ingestor
        .handle_event(&event("MVP 1 News", "10", GOOD_TEXT))
        .await
        .unwrap();
    assert_eq!(second, IngestOutcome::Duplicate);
    assert_eq!(post_count(&pool).await, 1);

    let post = db::get_post(&pool, id).await.unwrap().unwrap();
    assert_eq!(post.content, GOOD_TEXT);
    assert_eq!(post.media, vec![MediaKind::Photo]);
    assert_eq!(post.author_id.as_deref(), Some("99"));
    assert!(!post.is_used);

    let channel = db::get_channel(&pool, "-100777").await.unwrap().unwrap();
    assert_eq!(channel.name, "MVP 1 News");
    assert_eq!(channel.username.as_deref(), Some("mvp1news"));
    assert_eq!(post.channel_id, channel.id);
}

#[tokio::test]
async fn unwatched_channel_writes_nothing() {
    let pool = setup_pool().await;
    let ingestor = ingestor(&pool);

    let outcome = ingestor
        .handle_event(&event("Random Chatter", "1", GOOD_TEXT))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Discarded(DiscardReason::NotWatched));
    assert!(db::get_channel(&pool, "-100777").await.unwrap().is_none());
    assert_eq!(post_count(&pool).await, 0);
}

#[tokio::test]
async fn low_quality_message_registers_channel_only() {
    let pool = setup_pool().await;
    let ingestor = ingestor(&pool);

    for (n, text) in ["https://example.com/a/very/long/link/that/goes/on/and/on", "🔥🔥🔥", "ok"]
        .iter()
        .enumerate()
    {
        let outcome = ingestor
            .handle_event(&event("mvp 1 news", &n.to_string(), text))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Discarded(DiscardReason::LowQuality));
    }
    assert!(db::get_channel(&pool, "-100777").await.unwrap().is_some());
    assert_eq!(post_count(&pool).await, 0);
}

#[tokio::test]
async fn deactivated_channel_is_reactivated_on_next_sighting() {
    let pool = setup_pool().await;
    let ingestor = ingestor(&pool);

    ingestor
        .handle_event(&event("MVP 1 News", "1", GOOD_TEXT))
        .await
        .unwrap();
    assert!(ingestor.deactivate("-100777").await.unwrap());
    assert!(!ingestor.deactivate("-404").await.unwrap());
    let channel = db::get_channel(&pool, "-100777").await.unwrap().unwrap();
    assert!(!channel.is_active);

    let renamed = RawEvent {
        chat_title: "MVP 1 News (archive)".into(),
        ..event("", "2", GOOD_TEXT)
    };
    assert!(matches!(
        ingestor.handle_event(&renamed).await.unwrap(),
        IngestOutcome::Stored(_)
    ));
    let channel = db::get_channel(&pool, "-100777").await.unwrap().unwrap();
    assert!(channel.is_active);
    assert_eq!(channel.name, "MVP 1 News (archive)");

    let stats = db::channel_stats(&pool).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].posts_count, 2);
}
