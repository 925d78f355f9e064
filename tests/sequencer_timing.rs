//! Wall-clock sequencer scenarios
//!
//! Timing assertions use wide windows (hundreds of milliseconds) so that a
//! loaded CI machine cannot turn scheduling jitter into a failure.

use std::io::Write;
use std::time::{Duration, Instant};

use tonedeck::{Score, ScoreSequencer, SequencerEvent};

/// Collect every event with its arrival offset until `Finished` or `deadline`.
fn collect_until_finished(
    rx: &std::sync::mpsc::Receiver<SequencerEvent>,
    deadline: Duration,
) -> Vec<(SequencerEvent, Duration)> {
    let start = Instant::now();
    let mut events = Vec::new();
    while start.elapsed() < deadline {
        match rx.recv_timeout(deadline.saturating_sub(start.elapsed())) {
            Ok(event) => {
                let at = start.elapsed();
                let finished = event == SequencerEvent::Finished;
                events.push((event, at));
                if finished {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    events
}

#[test]
fn three_entry_score_triggers_on_the_grid() {
    // C4 for 16 units (500 ms), a 16-unit rest, E4 for 16 units.
    let score = Score::from_json(
        r#"[
            {"code": "C4", "duration": "16"},
            {"code": "-",  "duration": "16"},
            {"code": "E4", "duration": "16"}
        ]"#,
    )
    .unwrap();

    let (mut sequencer, rx) = ScoreSequencer::new();
    sequencer.play(&score).unwrap();
    let events = collect_until_finished(&rx, Duration::from_secs(4));

    let triggers: Vec<_> = events
        .iter()
        .filter_map(|(e, at)| match e {
            SequencerEvent::Trigger(key) => Some((*key, *at)),
            _ => None,
        })
        .collect();
    assert_eq!(triggers.len(), 2, "the rest must not trigger: {events:?}");

    // C4 is key 0, E4 is key 4
    let (key, at) = triggers[0];
    assert_eq!(key, 0);
    assert!(at < Duration::from_millis(250), "first trigger late: {at:?}");

    let (key, at) = triggers[1];
    assert_eq!(key, 4);
    assert!(
        at > Duration::from_millis(800) && at < Duration::from_millis(1400),
        "third entry should fire near 1000 ms, got {at:?}"
    );

    // The rest clears the highlight between the two triggers
    let rest_clear = events
        .iter()
        .any(|(e, at)| *e == SequencerEvent::ClearHighlight && *at < triggers[1].1);
    assert!(rest_clear, "rest entry should clear the highlight: {events:?}");

    // Finished arrives after the last entry's full duration
    let (last_event, at) = events.last().unwrap();
    assert_eq!(*last_event, SequencerEvent::Finished);
    assert!(
        *at > Duration::from_millis(1300) && *at < Duration::from_millis(2200),
        "finish should land near 1500 ms, got {at:?}"
    );
}

#[test]
fn stop_cancels_all_pending_triggers() {
    // Four quarter-second notes
    let score = Score::from_json(
        r#"[
            {"code": "C4", "duration": "8"},
            {"code": "D4", "duration": "8"},
            {"code": "E4", "duration": "8"},
            {"code": "F4", "duration": "8"}
        ]"#,
    )
    .unwrap();

    let (mut sequencer, rx) = ScoreSequencer::new();
    sequencer.play(&score).unwrap();

    // Wait for the first trigger, then cut the run short
    let start = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            SequencerEvent::Trigger(0) => break,
            _ if start.elapsed() > Duration::from_secs(2) => panic!("no first trigger"),
            _ => {}
        }
    }
    sequencer.stop();
    assert_eq!(sequencer.cursor(), 0);

    // Long enough for every remaining step to have fired if it were going to
    std::thread::sleep(Duration::from_millis(1200));
    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(event, SequencerEvent::Trigger(_) | SequencerEvent::Finished),
            "cancelled run still produced {event:?}"
        );
    }
}

#[test]
fn replaying_supersedes_the_previous_run() {
    let long = Score::from_json(r#"[{"code": "C4", "duration": "64"}]"#).unwrap();
    let short = Score::from_json(r#"[{"code": "E4", "duration": "4"}]"#).unwrap();

    let (mut sequencer, rx) = ScoreSequencer::new();
    sequencer.play(&long).unwrap();
    // Let the first run get its trigger out, then replace it mid-note
    std::thread::sleep(Duration::from_millis(100));
    sequencer.play(&short).unwrap();

    let events = collect_until_finished(&rx, Duration::from_secs(4));
    let finishes = events
        .iter()
        .filter(|(e, _)| *e == SequencerEvent::Finished)
        .count();
    assert_eq!(finishes, 1, "only the superseding run may finish: {events:?}");

    // The long note's 2 s deadline never produces a second Finished
    assert!(rx.recv_timeout(Duration::from_secs(3)).is_err());
}

#[test]
fn score_round_trips_through_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"[{"code":"A4","duration":"32"},{"code":"-","duration":"16"}]"#)
        .unwrap();

    let text = std::fs::read_to_string(file.path()).unwrap();
    let score = Score::from_json(&text).unwrap();
    assert_eq!(score.entries.len(), 2);
    assert_eq!(score.entries[0].code, "A4");
    assert_eq!(score.entries[0].duration_units().unwrap(), 32);
    assert_eq!(score.entries[1].code, "-");
}
