//! Integration tests for the live session synchronizer.

mod helpers;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use lessonsync_core::error::ErrorKind;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::types::{ClassId, LessonId, UserId};
use lessonsync_entity::session::{LiveSession, SessionStatus};
use lessonsync_realtime::LiveSessionSync;
use lessonsync_worker::ReconcileTask;

use helpers::TestEnv;

async fn started(sync: &LiveSessionSync, teacher: UserId) -> LiveSession {
    let session = sync
        .create_session(LessonId::new(), teacher, ClassId::new())
        .await
        .unwrap();
    sync.start_session(session.session_id, teacher).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_teacher_and_students_run_a_full_session() {
    let env = TestEnv::new();
    let teacher_tab = env.session_sync(10);
    let student_tab = env.session_sync(10);
    let teacher = UserId::new();
    let student = UserId::new();

    let session = teacher_tab
        .create_session(LessonId::new(), teacher, ClassId::new())
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Scheduled);
    let id = session.session_id;

    teacher_tab.start_session(id, teacher).await.unwrap();
    let participation = student_tab.participate(id, student, "Ada").await.unwrap();

    teacher_tab.update_slide(id, teacher, 3).await.unwrap();
    participation.report_slide(3).await.unwrap();

    // Activity keeps the entry fresh well past the staleness window.
    time::sleep(Duration::from_secs(150)).await;
    let session = teacher_tab.get_session(id).await.unwrap().unwrap();
    assert_eq!(session.current_slide_index, 3);
    let active = session.active_students(env.clock.now(), env.config.session.roster_stale());
    assert_eq!(active.len(), 1);
    assert_eq!(session.student(student).unwrap().current_slide_index, 3);

    participation.stop().await;
    participation.stop().await;
    let ended = teacher_tab.end_session(id, teacher).await.unwrap();
    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(ended.connected_students.is_empty());
    assert_eq!(ended.elapsed(env.clock.now()), Some(chrono::Duration::seconds(150)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_joins_from_separate_clients_all_land() {
    let env = TestEnv::new();
    let teacher = UserId::new();
    let session = started(&env.session_sync(5), teacher).await;
    let id = session.session_id;

    let students: Vec<UserId> = (0..6).map(|_| UserId::new()).collect();
    let joins: Vec<_> = students
        .iter()
        .enumerate()
        .map(|(i, &student)| {
            let sync = env.session_sync(5);
            tokio::spawn(async move { sync.join(id, student, &format!("student-{i}")).await })
        })
        .collect();
    // The teacher moves the slide while students are joining.
    env.session_sync(5).update_slide(id, teacher, 2).await.unwrap();
    for join in joins {
        join.await.unwrap().unwrap();
    }

    let session = env.session_sync(5).get_session(id).await.unwrap().unwrap();
    assert_eq!(session.connected_students.len(), students.len());
    for student in &students {
        assert!(session.student(*student).is_some());
    }
    assert_eq!(session.current_slide_index, 2);
}

#[tokio::test(start_paused = true)]
async fn test_slide_change_after_end_is_rejected() {
    let env = TestEnv::new();
    let teacher = UserId::new();
    let first_tab = env.session_sync(8);
    let second_tab = env.session_sync(8);
    let id = started(&first_tab, teacher).await.session_id;

    first_tab.update_slide(id, teacher, 4).await.unwrap();
    first_tab.end_session(id, teacher).await.unwrap();

    let err = second_tab.update_slide(id, teacher, 5).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Session);
    let session = first_tab.get_session(id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
    assert_eq!(session.current_slide_index, 4);

    // Late joins are refused; late activity is ignored.
    let student = UserId::new();
    assert_eq!(
        second_tab.join(id, student, "Late").await.unwrap_err().kind,
        ErrorKind::Session
    );
    second_tab.record_activity(id, student, None).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stale_tab_gets_conflict_on_versioned_update() {
    let env = TestEnv::new();
    let teacher = UserId::new();
    let sync = env.session_sync(8);
    let session = started(&sync, teacher).await;
    let seen_version = session.version;

    // Another tab moves ahead.
    env.session_sync(8)
        .update_slide(session.session_id, teacher, 6)
        .await
        .unwrap();

    let err = sync
        .update_slide_versioned(session.session_id, teacher, 1, seen_version)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    let latest = sync.get_session(session.session_id).await.unwrap().unwrap();
    assert_eq!(latest.current_slide_index, 6);
    let updated = sync
        .update_slide_versioned(session.session_id, teacher, 1, latest.version)
        .await
        .unwrap();
    assert_eq!(updated.current_slide_index, 1);
    assert_eq!(updated.version, latest.version + 1);
}

#[tokio::test(start_paused = true)]
async fn test_crashed_student_is_hidden_then_pruned() {
    let env = TestEnv::new();
    let teacher = UserId::new();
    let sync = env.session_sync(5);
    let id = started(&sync, teacher).await.session_id;
    let crashed = UserId::new();
    let present = UserId::new();

    sync.join(id, crashed, "Gone").await.unwrap();
    let participation = sync.participate(id, present, "Here").await.unwrap();

    time::sleep(Duration::from_secs(75)).await;
    let session = sync.get_session(id).await.unwrap().unwrap();
    // Still stored, but no longer counted.
    assert_eq!(session.connected_students.len(), 2);
    let active = session.active_students(env.clock.now(), env.config.session.roster_stale());
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, present);

    let summary = env.roster_prune().run_once().await.unwrap();
    assert_eq!(summary["entries_pruned"], 1);
    let session = sync.get_session(id).await.unwrap().unwrap();
    assert_eq!(session.connected_students.len(), 1);
    assert!(session.student(present).is_some());

    participation.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_observer_tracks_roster_and_elapsed_time() {
    let env = TestEnv::new();
    let teacher = UserId::new();
    let sync = env.session_sync(5);
    let id = started(&sync, teacher).await.session_id;
    sync.join(id, UserId::new(), "Quiet").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = sync.observe(id, move |view| {
        let _ = tx.send(view);
    });

    let first = rx.recv().await.unwrap();
    assert_eq!(first.active_students.len(), 1);
    assert_eq!(first.elapsed_seconds(), Some(0));

    time::sleep(Duration::from_secs(90)).await;
    let mut latest = first;
    while let Ok(view) = rx.try_recv() {
        latest = view;
    }
    // The student never refreshed, so the view dropped them without any write.
    assert!(latest.active_students.is_empty());
    assert_eq!(latest.session.connected_students.len(), 1);
    assert!(latest.elapsed_seconds().unwrap() >= 89);

    sync.end_session(id, teacher).await.unwrap();
    time::sleep(Duration::from_secs(1)).await;
    let mut ended = latest;
    while let Ok(view) = rx.try_recv() {
        ended = view;
    }
    assert_eq!(ended.session.status, SessionStatus::Ended);
    let frozen = ended.elapsed_seconds();

    time::sleep(Duration::from_secs(30)).await;
    let mut after = ended;
    while let Ok(view) = rx.try_recv() {
        after = view;
    }
    assert_eq!(after.elapsed_seconds(), frozen);
    assert!(observer.fallback_status().push_deliveries >= 2);
    assert!(!observer.fallback_status().polling_started);

    observer.stop();
    assert!(observer.is_stopped());
}
