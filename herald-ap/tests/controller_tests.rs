//! Controller behavior against a scripted engine and a manual clock

mod helpers;

use helpers::{settle, wait_until, Harness, MORNING_BILL};
use herald_ap::error::Error;
use herald_ap::events::ControllerEvent;
use herald_ap::playback::{ControlState, StopReason, TempKind};
use herald_common::{Bill, MusicFile};
use std::time::{Duration, Instant};

const ONCE_BILL: &str = r#"{
    "name": "once",
    "slot": [
        {"sdt": "08:00", "edt": "09:00", "playOrd": 1, "playMode": 1,
         "files": [{"fId": "1", "fName": "a.mp3", "playTimes": 1}]}
    ]
}"#;

const EVENING_BILL: &str = r#"{
    "name": "evening", "ver": "2",
    "slot": [
        {"sdt": "10:00", "edt": "11:00", "files": [{"fId": "3", "fName": "c.mp3"}]}
    ]
}"#;

fn alert() -> MusicFile {
    MusicFile::local("alert.mp3", 1)
}

/// Harness at 08:30 with the morning program's first file playing
async fn playing_program() -> Harness {
    let h = Harness::new(MORNING_BILL, "08:30").await;
    h.controller.start().await.unwrap();
    h.wait_for_sessions(1).await;
    h.wait_for_state(ControlState::ProgramPlaying).await;
    h
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_plays_current_slot_in_order() {
    let h = playing_program().await;

    let first = h.player.session(0);
    assert_eq!(first.file_name(), "a.mp3");
    assert_eq!(first.loop_count, 1);

    first.finish(StopReason::PlayOver);
    h.wait_for_sessions(2).await;
    let second = h.player.session(1);
    assert_eq!(second.file_name(), "b.mp3");
    assert_eq!(second.loop_count, 2);

    h.controller.stop().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Stopped);
    assert_eq!(second.ended(), Some(StopReason::ForceOver));
    assert!(!h.scheduler.is_running());
}

#[tokio::test]
async fn test_start_and_stop_are_not_repeatable() {
    let h = Harness::new(MORNING_BILL, "10:00").await;

    assert!(matches!(h.controller.stop().await, Err(Error::AlreadyStopped)));
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Running);
    assert!(matches!(h.controller.start().await, Err(Error::AlreadyRunning)));

    h.controller.stop().await.unwrap();
    assert!(matches!(h.controller.stop().await, Err(Error::AlreadyStopped)));
}

#[tokio::test]
async fn test_triggers_start_and_end_the_slot() {
    let h = Harness::new(MORNING_BILL, "07:00").await;
    assert_eq!(h.scheduler.trigger_times(), vec!["08:00", "09:00"]);

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Running);
    assert_eq!(h.player.count(), 0);

    assert_eq!(h.scheduler.fire_at("08:00"), 1);
    h.wait_for_sessions(1).await;
    h.wait_for_state(ControlState::ProgramPlaying).await;

    assert_eq!(h.scheduler.fire_at("09:00"), 1);
    h.wait_for_state(ControlState::Running).await;
    assert_eq!(h.player.session(0).ended(), Some(StopReason::ForceOver));
}

#[tokio::test]
async fn test_once_slot_settles_in_running() {
    let h = Harness::new(ONCE_BILL, "08:30").await;
    h.controller.start().await.unwrap();
    h.wait_for_sessions(1).await;

    h.player.session(0).finish(StopReason::PlayOver);
    h.wait_for_state(ControlState::Running).await;
    settle().await;
    assert_eq!(h.player.count(), 1);
}

#[tokio::test]
async fn test_second_stop_request_is_rejected_while_pending() {
    let h = playing_program().await;

    let (first, second) = tokio::join!(h.controller.stop_program(), h.controller.stop_program());
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::StopAlreadyInProgress))));
    assert_eq!(h.controller.state().await, ControlState::Running);

    // No loop left; stopping again is a no-op
    h.controller.stop_program().await.unwrap();
}

#[tokio::test]
async fn test_set_bill_waits_for_old_program_and_persists() {
    let h = playing_program().await;

    h.controller
        .set_bill(Bill::from_json(EVENING_BILL).unwrap(), true)
        .await
        .unwrap();

    assert_eq!(h.player.session(0).ended(), Some(StopReason::ForceOver));
    assert_eq!(h.controller.state().await, ControlState::Running);
    assert_eq!(h.scheduler.trigger_times(), vec!["10:00", "11:00"]);
    assert!(h.scheduler.is_running());

    let stored = h.settings.load_bill_json().await.unwrap().unwrap();
    assert_eq!(Bill::from_json(&stored).unwrap().name, "evening");
    assert_eq!(h.controller.bill().await.version, "2");
}

#[tokio::test]
async fn test_invalid_bill_keeps_current_one() {
    let h = playing_program().await;
    let overlapping = r#"{"name": "bad", "slot": [
        {"sdt": "08:00", "edt": "09:00", "files": []},
        {"sdt": "08:30", "edt": "10:00", "files": []}
    ]}"#;

    let result = h
        .controller
        .set_bill(Bill::from_json(overlapping).unwrap(), true)
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(h.controller.bill().await.name, "morning");
    assert_eq!(h.player.session(0).ended(), None);
}

#[tokio::test]
async fn test_persistence_failure_aborts_install() {
    let h = playing_program().await;
    h.settings.pool().close().await;

    let result = h
        .controller
        .set_bill(Bill::from_json(EVENING_BILL).unwrap(), true)
        .await;
    assert!(matches!(result, Err(Error::Persistence(_))));
    assert_eq!(h.controller.bill().await.name, "morning");
}

#[tokio::test]
async fn test_reset_installs_empty_bill() {
    let h = playing_program().await;

    h.controller.reset().await.unwrap();

    assert_eq!(h.controller.state().await, ControlState::Running);
    assert!(h.scheduler.trigger_times().is_empty());
    assert_eq!(h.controller.bill().await.name, "default");
    let stored = h.settings.load_bill_json().await.unwrap().unwrap();
    assert!(Bill::from_json(&stored).unwrap().slots.is_empty());
}

// ============================================================================
// Enable flag
// ============================================================================

#[tokio::test]
async fn test_disabled_controller_refuses_commands() {
    let h = Harness::with_enabled(MORNING_BILL, "10:00", false).await;

    assert!(matches!(h.controller.start().await, Err(Error::FeatureDisabled)));
    assert!(matches!(
        h.controller.play_temp(alert(), 1, None).await,
        Err(Error::FeatureDisabled)
    ));
    assert!(matches!(h.controller.set_volume(10).await, Err(Error::FeatureDisabled)));
    assert!(matches!(h.controller.pause().await, Err(Error::FeatureDisabled)));

    h.controller.set_enable(true).await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Running);
    assert!(h.settings.load_enable().await.unwrap());

    // Enabling twice is still a success
    h.controller.set_enable(true).await.unwrap();
}

#[tokio::test]
async fn test_disable_stops_everything() {
    let h = playing_program().await;

    h.controller.set_enable(false).await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Stopped);
    assert_eq!(h.player.session(0).ended(), Some(StopReason::ForceOver));
    assert!(!h.settings.load_enable().await.unwrap());
    assert!(!h.controller.status().await.enabled);
}

// ============================================================================
// Temporary sessions
// ============================================================================

#[tokio::test]
async fn test_temp_pauses_program_and_resumes_on_natural_end() {
    let h = playing_program().await;
    let program = h.player.session(0);

    h.controller.play_temp(alert(), 5, None).await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);
    assert!(program.is_paused());
    assert_eq!(h.controller.status().await.priority, 5);

    let temp = h.player.last();
    assert_eq!(temp.file_name(), "alert.mp3");
    temp.finish(StopReason::PlayOver);

    h.wait_for_state(ControlState::ProgramPlaying).await;
    assert!(!program.is_paused());
    assert_eq!(h.controller.status().await.priority, 9);
}

#[tokio::test]
async fn test_less_urgent_request_is_rejected() {
    let h = playing_program().await;
    h.controller.play_temp(alert(), 3, None).await.unwrap();

    let result = h.controller.play_temp(alert(), 5, None).await;
    assert!(matches!(
        result,
        Err(Error::PreemptedByHigherPriority {
            active: 3,
            requested: 5
        })
    ));
    assert_eq!(h.player.count(), 2);
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);
}

#[tokio::test]
async fn test_more_urgent_request_replaces_active_temp() {
    let h = playing_program().await;
    let program = h.player.session(0);
    h.controller.play_temp(alert(), 3, None).await.unwrap();
    let first = h.player.last();

    h.controller.play_inner(2, 1, None).await.unwrap();
    assert_eq!(first.ended(), Some(StopReason::ForceOver));
    assert_eq!(h.controller.state().await, ControlState::InnerPlaying);
    assert!(program.is_paused());

    let inner = h.player.last();
    assert_eq!(inner.file_name(), "inner_tip1.mp3");
    assert_eq!(inner.loop_count, -1);

    // The forced end of the first session must not resume the program
    settle().await;
    assert!(program.is_paused());
    assert_eq!(h.controller.state().await, ControlState::InnerPlaying);

    inner.finish(StopReason::PlayOver);
    h.wait_for_state(ControlState::ProgramPlaying).await;
    assert!(!program.is_paused());
}

#[tokio::test]
async fn test_equal_priority_preempts() {
    let h = Harness::new(MORNING_BILL, "10:00").await;
    h.controller.play_temp(alert(), 4, None).await.unwrap();
    let first = h.player.last();

    h.controller.play_temp(alert(), 4, None).await.unwrap();
    assert_eq!(first.ended(), Some(StopReason::ForceOver));
    assert_eq!(h.player.count(), 2);
}

#[tokio::test]
async fn test_duration_limit_leaves_program_paused() {
    let h = playing_program().await;
    let program = h.player.session(0);
    let mut events = h.controller.subscribe();

    h.controller
        .play_temp(alert(), 1, Some(Duration::from_millis(30)))
        .await
        .unwrap();
    let temp = h.player.last();

    h.wait_for_state(ControlState::Paused).await;
    assert_eq!(temp.ended(), Some(StopReason::TimeOver));
    assert!(program.is_paused());

    let mut saw_time_over = false;
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::TempEnded { reason, kind, .. } = event {
            assert_eq!(kind, TempKind::Temp);
            saw_time_over = reason == StopReason::TimeOver;
        }
    }
    assert!(saw_time_over);

    h.controller.resume().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::ProgramPlaying);
    assert!(!program.is_paused());
}

#[tokio::test]
async fn test_temp_while_stopped_settles_back_to_stopped() {
    let h = Harness::new(MORNING_BILL, "10:00").await;

    h.controller.play_inner(1, 0, None).await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::InnerPlaying);

    h.player.last().finish(StopReason::PlayOver);
    h.wait_for_state(ControlState::Stopped).await;
}

#[tokio::test]
async fn test_temp_request_validation() {
    let h = Harness::new(MORNING_BILL, "10:00").await;

    assert!(matches!(
        h.controller.play_temp(alert(), 0, None).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.controller.play_temp(alert(), 10, None).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.controller.play_inner(1, -1, None).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.controller.play_temp(MusicFile::local("", 1), 1, None).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.controller.play_temp(MusicFile::local("missing.mp3", 1), 1, None).await,
        Err(Error::Playback(_))
    ));
    assert_eq!(h.player.count(), 0);
}

#[tokio::test]
async fn test_temp_downloads_remote_file_first() {
    let h = Harness::new(MORNING_BILL, "10:00").await;
    let file = MusicFile {
        id: "77".to_string(),
        name: "drill".to_string(),
        play_times: 1,
        url: Some("http://cdn.example/clips/drill.wav?token=1".to_string()),
        ..Default::default()
    };

    h.controller.play_temp(file, 1, None).await.unwrap();

    assert_eq!(
        h.fetcher.calls(),
        vec!["http://cdn.example/clips/drill.wav?token=1"]
    );
    assert!(h.files.path().join("77.wav").exists());
    assert_eq!(h.player.last().file_name(), "77.wav");
}

#[tokio::test]
async fn test_failed_download_leaves_state_alone() {
    let h = playing_program().await;
    h.fetcher.set_fail(true);
    let file = MusicFile {
        id: "78".to_string(),
        url: Some("http://cdn.example/x.mp3".to_string()),
        ..Default::default()
    };

    let result = h.controller.play_temp(file, 1, None).await;
    assert!(matches!(result, Err(Error::Fetch(_))));
    assert_eq!(h.controller.state().await, ControlState::ProgramPlaying);
    assert!(!h.player.session(0).is_paused());
}

#[tokio::test]
async fn test_engine_failure_resumes_program() {
    let h = playing_program().await;
    let program = h.player.session(0);
    h.player.set_fail(true);

    let result = h.controller.play_temp(alert(), 1, None).await;
    assert!(matches!(result, Err(Error::Playback(_))));
    assert!(!program.is_paused());
    assert_eq!(h.controller.state().await, ControlState::ProgramPlaying);
    assert_eq!(h.controller.status().await.priority, 9);
}

#[tokio::test]
async fn test_program_waits_for_temp_before_next_file() {
    let h = playing_program().await;
    h.controller.play_temp(alert(), 1, None).await.unwrap();

    // Program file ends while the announcement plays
    h.player.session(0).finish(StopReason::PlayOver);
    settle().await;
    assert_eq!(h.player.count(), 2);

    h.player.session(1).finish(StopReason::PlayOver);
    h.wait_for_sessions(3).await;
    assert_eq!(h.player.session(2).file_name(), "b.mp3");
}

#[tokio::test]
async fn test_engine_open_runs_without_controller_lock() {
    let h = Harness::new(MORNING_BILL, "10:00").await;
    h.controller.start().await.unwrap();
    h.player.set_open_delay(Duration::from_millis(300));

    let begun = Instant::now();
    let controller = h.controller.clone();
    let request = tokio::spawn(async move { controller.play_temp(alert(), 1, None).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let status = h.controller.status().await;
    assert!(begun.elapsed() < Duration::from_millis(200));
    assert_eq!(status.state, ControlState::Running);
    assert_eq!(h.player.count(), 0);

    request.await.unwrap().unwrap();
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);
    assert_eq!(h.player.count(), 1);
}

#[tokio::test]
async fn test_program_file_opened_during_temp_is_discarded() {
    let h = Harness::new(MORNING_BILL, "08:30").await;
    h.player.set_open_delay(Duration::from_millis(100));
    h.controller.start().await.unwrap();
    settle().await;

    // The program's first file is still opening when the temp arrives
    h.controller.play_temp(alert(), 1, None).await.unwrap();
    h.wait_for_sessions(2).await;
    settle().await;
    let program = h.player.session(0);
    assert_eq!(program.file_name(), "a.mp3");
    assert_eq!(program.ended(), Some(StopReason::ForceOver));
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);

    h.player.set_open_delay(Duration::ZERO);
    h.player.session(1).finish(StopReason::PlayOver);
    h.wait_for_sessions(3).await;
    assert_eq!(h.player.session(2).file_name(), "a.mp3");
    h.wait_for_state(ControlState::ProgramPlaying).await;
}

#[tokio::test]
async fn test_settle_delay_runs_without_controller_lock() {
    let h = Harness::with_settle(MORNING_BILL, "08:30", Duration::from_millis(300)).await;
    h.controller.start().await.unwrap();
    h.wait_for_sessions(1).await;
    let program = h.player.session(0);

    let begun = Instant::now();
    let controller = h.controller.clone();
    let request = tokio::spawn(async move { controller.play_temp(alert(), 1, None).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    let state = h.controller.state().await;
    assert!(begun.elapsed() < Duration::from_millis(200));
    assert_eq!(state, ControlState::ProgramPlaying);
    assert!(program.is_paused());

    request.await.unwrap().unwrap();
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);

    // Natural end: the program resumes once the settle delay has passed
    h.player.session(1).finish(StopReason::PlayOver);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let begun = Instant::now();
    h.controller.status().await;
    assert!(begun.elapsed() < Duration::from_millis(150));
    assert!(program.is_paused());

    h.wait_for_state(ControlState::ProgramPlaying).await;
    assert!(!program.is_paused());
}

// ============================================================================
// Pause, resume, volume
// ============================================================================

#[tokio::test]
async fn test_pause_and_resume_program() {
    let h = playing_program().await;
    let program = h.player.session(0);

    h.controller.pause().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Paused);
    assert!(program.is_paused());
    h.controller.pause().await.unwrap();

    h.controller.resume().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::ProgramPlaying);
    assert!(!program.is_paused());
}

#[tokio::test]
async fn test_pause_targets_temp_first() {
    let h = playing_program().await;
    h.controller.play_temp(alert(), 1, None).await.unwrap();
    let temp = h.player.last();

    h.controller.pause().await.unwrap();
    assert!(temp.is_paused());

    h.controller.resume().await.unwrap();
    assert!(!temp.is_paused());
    assert!(h.player.session(0).is_paused());
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);
}

#[tokio::test]
async fn test_paused_temp_survives_bill_install() {
    let h = Harness::new(MORNING_BILL, "10:00").await;
    h.controller.start().await.unwrap();
    h.controller.play_temp(alert(), 1, None).await.unwrap();
    let temp = h.player.last();

    h.controller.pause().await.unwrap();
    assert!(temp.is_paused());
    h.controller
        .set_bill(Bill::from_json(MORNING_BILL).unwrap(), false)
        .await
        .unwrap();
    assert_eq!(h.controller.state().await, ControlState::Paused);

    h.controller.resume().await.unwrap();
    assert!(!temp.is_paused());
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);
}

#[tokio::test]
async fn test_paused_temp_survives_slot_end() {
    let h = playing_program().await;
    let program = h.player.session(0);
    h.controller.play_temp(alert(), 1, None).await.unwrap();
    let temp = h.player.last();
    h.controller.pause().await.unwrap();

    assert_eq!(h.scheduler.fire_at("09:00"), 1);
    let ended = program.clone();
    wait_until(move || ended.ended() == Some(StopReason::ForceOver)).await;
    settle().await;
    assert_eq!(h.controller.state().await, ControlState::Paused);
    assert!(temp.is_paused());

    h.controller.resume().await.unwrap();
    assert!(!temp.is_paused());
    assert_eq!(h.controller.state().await, ControlState::TempPlaying);
}

#[tokio::test]
async fn test_pause_between_files_holds_next_file() {
    let h = Harness::with_settle(MORNING_BILL, "08:30", Duration::from_millis(200)).await;
    h.controller.start().await.unwrap();
    h.wait_for_sessions(1).await;

    // The loop sits in the settle delay after the first file
    h.player.session(0).finish(StopReason::PlayOver);
    settle().await;
    h.controller.pause().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Paused);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.player.count(), 1);
    assert_eq!(h.controller.state().await, ControlState::Paused);

    h.controller.resume().await.unwrap();
    h.wait_for_sessions(2).await;
    assert_eq!(h.player.session(1).file_name(), "b.mp3");
    h.wait_for_state(ControlState::ProgramPlaying).await;
}

#[tokio::test]
async fn test_pause_with_nothing_playing_is_noop() {
    let h = Harness::new(MORNING_BILL, "10:00").await;
    h.controller.start().await.unwrap();

    h.controller.pause().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Running);
    h.controller.resume().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Running);
}

#[tokio::test]
async fn test_volume_is_clamped_and_applied() {
    let h = playing_program().await;

    h.controller.set_volume(150).await.unwrap();
    assert_eq!(h.controller.status().await.volume, 100);
    assert_eq!(h.player.session(0).volume(), 1.0);

    h.controller.set_volume(-5).await.unwrap();
    assert_eq!(h.controller.status().await.volume, 0);
    assert_eq!(h.player.session(0).volume(), 0.0);

    h.controller.set_volume(40).await.unwrap();
    h.controller.play_temp(alert(), 1, None).await.unwrap();
    assert!((h.player.last().volume() - 0.4).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_missing_remote_program_file_is_fetched_in_background() {
    let bill = r#"{"name": "remote", "slot": [
        {"sdt": "08:00", "edt": "09:00", "playMode": 2,
         "files": [{"fId": "9", "fName": "chime", "url": "http://cdn.example/chime.mp3"}]}
    ]}"#;
    let h = Harness::new(bill, "08:30").await;
    h.controller.start().await.unwrap();

    let fetcher = h.fetcher.clone();
    wait_until(move || !fetcher.calls().is_empty()).await;
    assert_eq!(h.player.count(), 0);
    assert_eq!(h.controller.state().await, ControlState::ProgramPlaying);

    h.controller.stop().await.unwrap();
    assert_eq!(h.controller.state().await, ControlState::Stopped);
}
