use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tempfile::TempDir;

use sv_cache::prelude::*;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct TopicProgressDb {
    topics: HashMap<String, TopicProgress>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct TopicProgress {
    stories: HashMap<String, StoryProgress>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct StoryProgress {
    chapters: HashMap<String, ChapterProgress>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum ChapterProgress {
    InProgress { last_played_at: u64 },
    Completed { completed_at: u64 },
}

#[derive(Debug, PartialEq)]
enum RecordOutcome {
    Recorded,
    AlreadyCompleted,
}

/// Pure merge: rebuilds the affected key at every nesting level and leaves
/// every other entry untouched.
fn record_chapter(
    db: &TopicProgressDb,
    topic: &str,
    story: &str,
    chapter: &str,
    progress: ChapterProgress,
) -> (TopicProgressDb, RecordOutcome) {
    let topic_entry = db.topics.get(topic).cloned().unwrap_or_default();
    let story_entry = topic_entry.stories.get(story).cloned().unwrap_or_default();

    if matches!(
        story_entry.chapters.get(chapter),
        Some(ChapterProgress::Completed { .. })
    ) {
        return (db.clone(), RecordOutcome::AlreadyCompleted);
    }

    let mut chapters = story_entry.chapters;
    chapters.insert(chapter.to_string(), progress);
    let mut stories = topic_entry.stories;
    stories.insert(story.to_string(), StoryProgress { chapters });
    let mut topics = db.topics.clone();
    topics.insert(topic.to_string(), TopicProgress { stories });

    (TopicProgressDb { topics }, RecordOutcome::Recorded)
}

fn chapter_of<'a>(db: &'a TopicProgressDb, topic: &str, story: &str, chapter: &str) -> Option<&'a ChapterProgress> {
    db.topics.get(topic)?.stories.get(story)?.chapters.get(chapter)
}

fn registry_at(dir: &TempDir) -> Arc<StoreRegistry<TopicProgressDb>> {
    StoreRegistry::builder()
        .base_dir(dir.path().to_path_buf())
        .seed(TopicProgressDb::default())
        .notifier(ChangeNotifier::new())
        .build()
        .unwrap()
}

#[tokio::test]
async fn merging_a_chapter_preserves_its_siblings() {
    let dir = TempDir::new().unwrap();
    let registry = registry_at(&dir);
    let store = registry.partition_store("topic_progress", "profile_0").await.unwrap();

    let outcome = store
        .write_with_result(true, |db| {
            record_chapter(&db, "t1", "s1", "e1", ChapterProgress::Completed { completed_at: 1000 })
        })
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::Recorded);

    let outcome = store
        .write_with_result(true, |db| {
            record_chapter(&db, "t1", "s1", "e2", ChapterProgress::InProgress { last_played_at: 2000 })
        })
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::Recorded);

    let db = store.read_once().await.unwrap();
    assert_eq!(
        chapter_of(&db, "t1", "s1", "e1"),
        Some(&ChapterProgress::Completed { completed_at: 1000 }),
        "recording e2 must leave e1's completed entry unchanged"
    );
    assert_eq!(
        chapter_of(&db, "t1", "s1", "e2"),
        Some(&ChapterProgress::InProgress { last_played_at: 2000 })
    );
}

#[tokio::test]
async fn completed_chapters_are_not_demoted() {
    let dir = TempDir::new().unwrap();
    let registry = registry_at(&dir);
    let store = registry.partition_store("topic_progress", "profile_0").await.unwrap();

    store
        .write(true, |db| {
            record_chapter(&db, "t1", "s1", "e1", ChapterProgress::Completed { completed_at: 1000 }).0
        })
        .await
        .unwrap();

    let outcome = store
        .write_with_result(true, |db| {
            record_chapter(&db, "t1", "s1", "e1", ChapterProgress::InProgress { last_played_at: 3000 })
        })
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::AlreadyCompleted);

    let db = store.read_once().await.unwrap();
    assert_eq!(
        chapter_of(&db, "t1", "s1", "e1"),
        Some(&ChapterProgress::Completed { completed_at: 1000 })
    );
}

#[tokio::test]
async fn partitions_are_fully_independent() {
    let dir = TempDir::new().unwrap();
    let registry = registry_at(&dir);

    let zero = registry.partition_store("topic_progress", "profile_0").await.unwrap();
    let one = registry.partition_store("topic_progress", "profile_1").await.unwrap();

    zero.write(true, |db| {
        record_chapter(&db, "t1", "s1", "e1", ChapterProgress::Completed { completed_at: 1 }).0
    })
    .await
    .unwrap();
    one.write(true, |db| {
        record_chapter(&db, "t9", "s9", "e9", ChapterProgress::InProgress { last_played_at: 2 }).0
    })
    .await
    .unwrap();

    // One file per partition, under its own directory.
    assert!(dir.path().join("profile_0").join("topic_progress.cache").exists());
    assert!(dir.path().join("profile_1").join("topic_progress.cache").exists());

    let zero_db = zero.read_once().await.unwrap();
    let one_db = one.read_once().await.unwrap();
    assert!(chapter_of(&zero_db, "t9", "s9", "e9").is_none());
    assert!(chapter_of(&one_db, "t1", "s1", "e1").is_none());

    // Same key resolves to the same instance.
    let zero_again = registry.partition_store("topic_progress", "profile_0").await.unwrap();
    assert!(Arc::ptr_eq(&zero, &zero_again));
}

#[tokio::test]
async fn forgotten_store_reloads_from_its_file() {
    let dir = TempDir::new().unwrap();
    let registry = registry_at(&dir);

    let store = registry.partition_store("topic_progress", "profile_0").await.unwrap();
    store
        .write(true, |db| {
            record_chapter(&db, "t1", "s1", "e1", ChapterProgress::Completed { completed_at: 1000 }).0
        })
        .await
        .unwrap();
    drop(store);

    registry.forget("topic_progress", Some("profile_0")).await;
    let fresh = registry.partition_store("topic_progress", "profile_0").await.unwrap();
    fresh.prime_in_memory_cache(false).await.unwrap();

    let db = fresh.read_once().await.unwrap();
    assert_eq!(
        chapter_of(&db, "t1", "s1", "e1"),
        Some(&ChapterProgress::Completed { completed_at: 1000 })
    );
}

struct CountingObserver {
    seen: Mutex<Vec<StoreIdentity>>,
}

#[async_trait]
impl ChangeObserver for CountingObserver {
    async fn on_change(&self, identity: StoreIdentity) {
        self.seen.lock().unwrap().push(identity);
    }
}

#[tokio::test]
async fn observers_wake_after_each_recorded_chapter() {
    let dir = TempDir::new().unwrap();
    let registry = registry_at(&dir);
    let store = registry.partition_store("topic_progress", "profile_0").await.unwrap();

    let observer = Arc::new(CountingObserver { seen: Mutex::new(Vec::new()) });
    store.subscribe(Arc::clone(&observer) as Arc<dyn ChangeObserver>);

    for stamp in [1000u64, 2000] {
        store
            .write(true, move |db| {
                record_chapter(&db, "t1", "s1", "e1", ChapterProgress::InProgress { last_played_at: stamp }).0
            })
            .await
            .unwrap();
    }

    for _ in 0..400 {
        if observer.seen.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let seen = observer.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|identity| identity == &store.identity()));
}
