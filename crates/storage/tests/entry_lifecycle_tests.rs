#![cfg(feature = "postgres-tests")]

use chrono::{Local, Utc};
use ohq_domain::{QueueType, Tid};
use ohq_storage::{CourseRepository, EntryRepository, NewEntry, QueueRepository, RosterRepository};
use sqlx::{PgConnection, PgPool};

async fn seed_queue(conn: &mut PgConnection) -> Tid {
    let course = CourseRepository::new()
        .create(conn, "CS 4400")
        .await
        .unwrap();
    QueueRepository::new()
        .create_queue(conn, course.id, QueueType::Ordered, "Office Hours", "CULC 123")
        .await
        .unwrap()
        .id
}

fn signup(queue: Tid, email: &str) -> NewEntry {
    NewEntry {
        queue,
        email: email.to_string(),
        name: "Student".to_string(),
        description: "help with hw".to_string(),
        location: "table 1".to_string(),
        priority: 0,
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn one_active_entry_per_student(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let entries = EntryRepository::new();

    entries.insert(&mut conn, signup(queue, "a@x.edu")).await.unwrap();
    let dup = entries.insert(&mut conn, signup(queue, "a@x.edu")).await;
    assert!(matches!(dup, Err(ohq_storage::StorageError::Conflict)));

    // A different student still fits.
    entries.insert(&mut conn, signup(queue, "b@x.edu")).await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn remove_archives_and_rejects_double_removal(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let entries = EntryRepository::new();

    let entry = entries.insert(&mut conn, signup(queue, "a@x.edu")).await.unwrap();
    let removed = entries
        .remove(&mut conn, queue, entry.id, "ta@x.edu")
        .await
        .unwrap();
    assert!(removed.active.is_none());
    assert!(removed.helped);
    assert!(!removed.pinned);
    assert_eq!(removed.helping, "");
    assert_eq!(removed.removed_by.as_deref(), Some("ta@x.edu"));
    assert!(removed.removed_at.is_some());

    let again = entries.remove(&mut conn, queue, entry.id, "ta@x.edu").await;
    assert!(matches!(again, Err(ohq_storage::StorageError::NotFound)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn pin_resurrects_unless_owner_is_active(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let entries = EntryRepository::new();

    let entry = entries.insert(&mut conn, signup(queue, "a@x.edu")).await.unwrap();
    entries.remove(&mut conn, queue, entry.id, "ta@x.edu").await.unwrap();

    let pinned = entries.pin(&mut conn, queue, entry.id).await.unwrap();
    assert_eq!(pinned.active, Some(true));
    assert!(pinned.pinned);
    assert!(!pinned.helped);
    assert!(pinned.removed_at.is_none());
    assert!(pinned.removed_by.is_none());

    // Archive it again, sign up fresh, then pinning the archived entry must
    // trip the single-active-entry index.
    entries.remove(&mut conn, queue, entry.id, "ta@x.edu").await.unwrap();
    entries.insert(&mut conn, signup(queue, "a@x.edu")).await.unwrap();
    let conflict = entries.pin(&mut conn, queue, entry.id).await;
    assert!(matches!(conflict, Err(ohq_storage::StorageError::Conflict)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn clear_archives_everything_unhelped(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let entries = EntryRepository::new();

    for email in ["a@x.edu", "b@x.edu", "c@x.edu"] {
        entries.insert(&mut conn, signup(queue, email)).await.unwrap();
    }
    let cleared = entries.clear(&mut conn, queue, "ta@x.edu").await.unwrap();
    assert_eq!(cleared.len(), 3);
    for entry in &cleared {
        assert!(entry.active.is_none());
        assert!(!entry.helped);
        assert!(!entry.pinned);
        assert_eq!(entry.helping, "");
    }
    assert!(entries.active_entries(&mut conn, queue).await.unwrap().is_empty());

    let stack = entries.stack(&mut conn, queue, 20).await.unwrap();
    assert_eq!(stack.len(), 3);
}

#[sqlx::test(migrations = "../../migrations")]
async fn stack_is_newest_first(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let entries = EntryRepository::new();

    let first = entries.insert(&mut conn, signup(queue, "a@x.edu")).await.unwrap();
    let second = entries.insert(&mut conn, signup(queue, "b@x.edu")).await.unwrap();
    entries.remove(&mut conn, queue, first.id, "ta@x.edu").await.unwrap();
    entries.remove(&mut conn, queue, second.id, "ta@x.edu").await.unwrap();

    let stack = entries.stack(&mut conn, queue, 1).await.unwrap();
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].id, second.id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn randomize_reassigns_one_through_ten(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let entries = EntryRepository::new();

    for email in ["a@x.edu", "b@x.edu", "c@x.edu", "d@x.edu"] {
        entries.insert(&mut conn, signup(queue, email)).await.unwrap();
    }
    let randomized = entries.randomize(&mut conn, queue).await.unwrap();
    assert_eq!(randomized.len(), 4);
    for entry in randomized {
        assert!((1..=10).contains(&entry.priority), "got {}", entry.priority);
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn helped_tracking_feeds_cooldown_and_boost(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let entries = EntryRepository::new();
    let day_start = Tid::start_of_day(Local::now());

    assert!(
        entries
            .last_helped_time(&mut conn, queue, "a@x.edu")
            .await
            .unwrap()
            .is_none()
    );
    assert!(!entries.helped_today(&mut conn, queue, "a@x.edu", day_start).await.unwrap());

    let entry = entries.insert(&mut conn, signup(queue, "a@x.edu")).await.unwrap();
    entries.remove(&mut conn, queue, entry.id, "ta@x.edu").await.unwrap();

    let helped_at = entries
        .last_helped_time(&mut conn, queue, "a@x.edu")
        .await
        .unwrap()
        .expect("staff removal records a helped time");
    assert!((Utc::now() - helped_at).num_seconds() < 10);
    assert!(entries.helped_today(&mut conn, queue, "a@x.edu", day_start).await.unwrap());

    // Self-removal does not count as being helped.
    let own = entries.insert(&mut conn, signup(queue, "b@x.edu")).await.unwrap();
    entries.remove(&mut conn, queue, own.id, "b@x.edu").await.unwrap();
    assert!(
        entries
            .last_helped_time(&mut conn, queue, "b@x.edu")
            .await
            .unwrap()
            .is_none()
    );
    assert!(!entries.helped_today(&mut conn, queue, "b@x.edu", day_start).await.unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
async fn groups_partition_and_teammate_checks(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let roster = RosterRepository::new();
    let entries = EntryRepository::new();

    roster
        .set_groups(
            &mut conn,
            queue,
            &[
                vec!["a@x.edu".to_string(), "b@x.edu".to_string()],
                vec!["c@x.edu".to_string()],
            ],
        )
        .await
        .unwrap();

    let groups = roster.groups(&mut conn, queue).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), 3);

    // One email in two groups violates the partition.
    let overlap = roster
        .set_groups(
            &mut conn,
            queue,
            &[vec!["a@x.edu".to_string()], vec!["a@x.edu".to_string()]],
        )
        .await;
    assert!(matches!(overlap, Err(ohq_storage::StorageError::Conflict)));

    // Restore a valid partition; teammate lookups work through the view.
    roster
        .set_groups(
            &mut conn,
            queue,
            &[vec!["a@x.edu".to_string(), "b@x.edu".to_string()]],
        )
        .await
        .unwrap();
    assert!(
        !roster
            .teammate_has_active_entry(&mut conn, queue, "a@x.edu")
            .await
            .unwrap()
    );
    entries.insert(&mut conn, signup(queue, "b@x.edu")).await.unwrap();
    assert!(
        roster
            .teammate_has_active_entry(&mut conn, queue, "a@x.edu")
            .await
            .unwrap()
    );
    // Being your own teammate is not a thing.
    assert!(
        !roster
            .teammate_has_active_entry(&mut conn, queue, "b@x.edu")
            .await
            .unwrap()
    );

    let teammate_helped = entries
        .teammate_helped_today(&mut conn, queue, "a@x.edu", Tid::start_of_day(Local::now()))
        .await
        .unwrap();
    assert!(!teammate_helped);
}

#[sqlx::test(migrations = "../../migrations")]
async fn roster_bulk_replace(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let roster = RosterRepository::new();

    roster
        .set_roster(&mut conn, queue, &["a@x.edu".to_string(), "b@x.edu".to_string()])
        .await
        .unwrap();
    assert!(roster.in_roster(&mut conn, queue, "a@x.edu").await.unwrap());

    roster
        .set_roster(&mut conn, queue, &["c@x.edu".to_string()])
        .await
        .unwrap();
    assert!(!roster.in_roster(&mut conn, queue, "a@x.edu").await.unwrap());
    assert_eq!(roster.roster(&mut conn, queue).await.unwrap(), vec!["c@x.edu"]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn schedule_round_trip(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    let queue = seed_queue(&mut conn).await;
    let queues = QueueRepository::new();

    let initial = queues.get_schedule(&mut conn, queue).await.unwrap();
    assert_eq!(initial.len(), 7);
    assert!(initial.iter().all(|day| day == &"c".repeat(48)));

    let mut week = vec!["c".repeat(48); 7];
    week[2] = format!("{}{}", "o".repeat(24), "c".repeat(24));
    queues.update_schedule(&mut conn, queue, &week).await.unwrap();
    assert_eq!(queues.get_schedule(&mut conn, queue).await.unwrap(), week);
}
