//! Speech sessions: one background thread per utterance, plus a registry
//! so HTTP handlers can pause, resume and stop them by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::control::SpeechControl;
use super::{lock, SpeechEngine, SpeechError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechOptions {
    pub rate: u32,
    pub voice_index: usize,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            rate: 200,
            voice_index: 0,
        }
    }
}

/// Outcome of one `speak` run.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakReport {
    pub segments_spoken: usize,
    pub stopped: bool,
    pub playback_ms: f64,
}

/// Split on every literal `.`, keeping empty segments.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split('.').collect()
}

/// Speak `text` segment by segment, honouring `control` between segments.
///
/// Blocks the calling thread for the whole utterance. Stop is checked before
/// and after the pause wait, so it takes effect at the next segment boundary.
pub fn speak(
    engine: &dyn SpeechEngine,
    text: &str,
    control: &SpeechControl,
    options: &SpeechOptions,
) -> Result<SpeakReport, SpeechError> {
    engine.set_rate(options.rate)?;
    let voices = engine.voices();
    match voices.get(options.voice_index) {
        Some(voice) => engine.set_voice(voice)?,
        None => debug!(
            "Voice index {} out of range ({} voices), keeping default",
            options.voice_index,
            voices.len()
        ),
    }

    let segments = split_sentences(text);
    control.set_total(segments.len());

    let t0 = Instant::now();
    let mut spoken = 0;
    let mut stopped = false;

    for (i, segment) in segments.iter().enumerate() {
        if control.is_stopped() || control.wait_while_paused() {
            stopped = true;
            info!("Speech stopped before segment {}/{}", i + 1, segments.len());
            break;
        }

        engine.say_and_wait(segment)?;
        control.record_spoken();
        spoken += 1;
        debug!("Spoke segment {}/{} ({} chars)", i + 1, segments.len(), segment.len());
    }

    Ok(SpeakReport {
        segments_spoken: spoken,
        stopped,
        playback_ms: t0.elapsed().as_secs_f64() * 1000.0,
    })
}

/// A `speak` run on its own thread.
pub struct SpeechSession {
    id: u64,
    started_at: DateTime<Local>,
    control: Arc<SpeechControl>,
    handle: JoinHandle<()>,
}

impl SpeechSession {
    /// Start speaking on a new thread. The caller keeps `control` to steer it.
    pub fn start(
        id: u64,
        engine: Arc<dyn SpeechEngine>,
        text: String,
        options: SpeechOptions,
        control: Arc<SpeechControl>,
    ) -> Result<Self, SpeechError> {
        let thread_control = control.clone();
        let handle = std::thread::Builder::new()
            .name(format!("speech-{id}"))
            .spawn(move || {
                match speak(engine.as_ref(), &text, &thread_control, &options) {
                    Ok(report) => info!(
                        "Speech session {id} done: {} segments in {:.0}ms{}",
                        report.segments_spoken,
                        report.playback_ms,
                        if report.stopped { " (stopped)" } else { "" }
                    ),
                    Err(e) => warn!("Error during text-to-speech (session {id}): {e}"),
                }
                thread_control.mark_finished();
            })?;

        Ok(Self {
            id,
            started_at: Local::now(),
            control,
            handle,
        })
    }

    pub fn control(&self) -> &Arc<SpeechControl> {
        &self.control
    }

    pub fn status(&self) -> SessionStatus {
        let snapshot = self.control.snapshot();
        SessionStatus {
            id: self.id,
            started_at: self.started_at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            segments_total: snapshot.segments_total,
            segments_spoken: snapshot.segments_spoken,
            paused: snapshot.paused,
            stopped: snapshot.stopped,
            finished: snapshot.finished,
        }
    }

    /// Wait for the thread to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("Speech session {} panicked", self.id);
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub id: u64,
    pub started_at: String,
    pub segments_total: usize,
    pub segments_spoken: usize,
    pub paused: bool,
    pub stopped: bool,
    pub finished: bool,
}

/// All sessions started through the HTTP API.
///
/// Sessions run independently; starting one does not stop the others.
pub struct SpeechSessions {
    engine: Arc<dyn SpeechEngine>,
    defaults: SpeechOptions,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, SpeechSession>>,
}

impl SpeechSessions {
    pub fn new(engine: Arc<dyn SpeechEngine>, defaults: SpeechOptions) -> Self {
        Self {
            engine,
            defaults,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> SpeechOptions {
        self.defaults
    }

    pub fn voices(&self) -> Vec<String> {
        self.engine.voices()
    }

    /// Start a new session, dropping finished ones from the registry.
    pub fn start(&self, text: String, options: SpeechOptions) -> Result<u64, SpeechError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = SpeechSession::start(
            id,
            self.engine.clone(),
            text,
            options,
            Arc::new(SpeechControl::new()),
        )?;

        let mut sessions = lock(&self.sessions);
        let finished: Vec<u64> = sessions
            .iter()
            .filter(|(_, s)| s.control().is_finished())
            .map(|(&id, _)| id)
            .collect();
        for old in finished {
            if let Some(s) = sessions.remove(&old) {
                s.join();
            }
        }
        sessions.insert(id, session);
        info!("Speech session {id} started ({} active)", sessions.len());
        Ok(id)
    }

    pub fn pause(&self, id: u64) -> bool {
        self.with_control(id, SpeechControl::pause)
    }

    pub fn resume(&self, id: u64) -> bool {
        self.with_control(id, SpeechControl::resume)
    }

    pub fn stop(&self, id: u64) -> bool {
        self.with_control(id, SpeechControl::stop)
    }

    /// Stop every session. Returns how many were still running.
    pub fn stop_all(&self) -> usize {
        let sessions = lock(&self.sessions);
        let mut running = 0;
        for session in sessions.values().filter(|s| !s.control().is_finished()) {
            session.control().stop();
            running += 1;
        }
        running
    }

    pub fn status(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> =
            lock(&self.sessions).values().map(SpeechSession::status).collect();
        statuses.sort_by_key(|s| s.id);
        statuses
    }

    fn with_control(&self, id: u64, f: impl FnOnce(&SpeechControl)) -> bool {
        match lock(&self.sessions).get(&id) {
            Some(session) => {
                f(session.control().as_ref());
                true
            }
            None => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::fake::FakeEngine;
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn split_is_a_literal_split_on_periods() {
        assert_eq!(split_sentences("A.B.C"), vec!["A", "B", "C"]);
        assert_eq!(split_sentences("Hi. There."), vec!["Hi", " There", ""]);
        assert_eq!(split_sentences(".A"), vec!["", "A"]);
        assert_eq!(split_sentences("v1.5 is out"), vec!["v1", "5 is out"]);
        assert_eq!(split_sentences(""), vec![""]);
    }

    #[test]
    fn speaks_every_segment_in_order_with_rate_and_voice() {
        let engine = FakeEngine::default();
        let control = SpeechControl::new();
        let options = SpeechOptions {
            rate: 150,
            voice_index: 1,
        };

        let report = speak(&engine, "One.Two.Three", &control, &options).unwrap();

        assert_eq!(engine.said(), vec!["One", "Two", "Three"]);
        assert_eq!(report.segments_spoken, 3);
        assert!(!report.stopped);
        assert_eq!(*lock(&engine.rate), Some(150));
        assert_eq!(lock(&engine.voice).as_deref(), Some("bravo"));
        assert_eq!(control.snapshot().segments_total, 3);
        assert_eq!(control.snapshot().segments_spoken, 3);
    }

    #[test]
    fn out_of_range_voice_keeps_default() {
        let engine = FakeEngine::default();
        let options = SpeechOptions {
            voice_index: 7,
            ..SpeechOptions::default()
        };
        speak(&engine, "Hello", &SpeechControl::new(), &options).unwrap();
        assert_eq!(*lock(&engine.voice), None);
        assert_eq!(engine.said(), vec!["Hello"]);
    }

    #[test]
    fn stop_before_start_speaks_nothing() {
        let engine = FakeEngine::default();
        let control = SpeechControl::new();
        control.stop();

        let report = speak(&engine, "A.B.C", &control, &SpeechOptions::default()).unwrap();

        assert!(engine.said().is_empty());
        assert_eq!(report.segments_spoken, 0);
        assert!(report.stopped);
    }

    #[test]
    fn pause_holds_progress_until_resumed() {
        let engine = Arc::new(FakeEngine::default());
        let control = Arc::new(SpeechControl::new());
        control.pause();

        let session = SpeechSession::start(
            1,
            engine.clone(),
            "A.B".into(),
            SpeechOptions::default(),
            control.clone(),
        )
        .unwrap();

        assert!(!control.wait_finished(Duration::from_millis(200)));
        assert!(engine.said().is_empty());

        control.resume();
        assert!(control.wait_finished(WAIT));
        assert_eq!(engine.said(), vec!["A", "B"]);
        session.join();
    }

    #[test]
    fn stop_while_paused_ends_the_session() {
        let engine = Arc::new(FakeEngine::default());
        let control = Arc::new(SpeechControl::new());
        control.pause();

        let session =
            SpeechSession::start(1, engine.clone(), "A.B".into(), SpeechOptions::default(), control.clone())
                .unwrap();
        control.stop();

        assert!(control.wait_finished(WAIT));
        assert!(engine.said().is_empty());
        session.join();
    }

    #[test]
    fn stop_during_playback_ends_at_the_next_segment_boundary() {
        let engine = Arc::new(FakeEngine::slow(Duration::from_millis(200)));
        let control = Arc::new(SpeechControl::new());

        let speaker = {
            let engine = engine.clone();
            let control = control.clone();
            std::thread::spawn(move || speak(engine.as_ref(), "A.B.C", &control, &SpeechOptions::default()))
        };

        let deadline = Instant::now() + WAIT;
        while control.snapshot().segments_spoken < 1 {
            assert!(Instant::now() < deadline, "first segment never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
        control.stop();

        let report = speaker.join().unwrap().unwrap();
        assert!(report.stopped);
        let said = engine.said();
        assert!(said == ["A"] || said == ["A", "B"], "said {said:?}");
        assert_eq!(report.segments_spoken, said.len());
    }

    #[test]
    fn engine_failure_ends_the_session_quietly() {
        let engine = Arc::new(FakeEngine {
            fail_on: Some("B".into()),
            ..FakeEngine::default()
        });
        let control = Arc::new(SpeechControl::new());

        let session =
            SpeechSession::start(1, engine.clone(), "A.B.C".into(), SpeechOptions::default(), control.clone())
                .unwrap();

        assert!(control.wait_finished(WAIT));
        assert_eq!(engine.said(), vec!["A"]);
        session.join();
    }

    #[test]
    fn pausing_one_session_leaves_another_running() {
        let engine: Arc<dyn SpeechEngine> = Arc::new(FakeEngine::slow(Duration::from_millis(100)));
        let sessions = SpeechSessions::new(engine, SpeechOptions::default());

        let first = sessions.start("A.B.C".into(), SpeechOptions::default()).unwrap();
        assert!(sessions.pause(first));
        let second = sessions.start("D.E".into(), SpeechOptions::default()).unwrap();

        let second_control = lock(&sessions.sessions)[&second].control().clone();
        assert!(second_control.wait_finished(WAIT));

        let status = sessions.status();
        assert_eq!(status.len(), 2);
        assert!(status[0].paused);
        assert!(status[1].finished);
        assert_eq!(status[1].segments_spoken, 2);

        assert_eq!(sessions.stop_all(), 1);
        let first_control = lock(&sessions.sessions)[&first].control().clone();
        assert!(first_control.wait_finished(WAIT));
        assert!(first_control.snapshot().segments_spoken < 3);
    }

    #[test]
    fn unknown_session_ids_are_reported() {
        let engine: Arc<dyn SpeechEngine> = Arc::new(FakeEngine::default());
        let sessions = SpeechSessions::new(engine, SpeechOptions::default());
        assert!(!sessions.pause(42));
        assert!(!sessions.resume(42));
        assert!(!sessions.stop(42));
    }

    #[test]
    fn finished_sessions_are_pruned_on_next_start() {
        let engine: Arc<dyn SpeechEngine> = Arc::new(FakeEngine::default());
        let sessions = SpeechSessions::new(engine, SpeechOptions::default());

        let first = sessions.start("A".into(), SpeechOptions::default()).unwrap();
        let control = lock(&sessions.sessions)[&first].control().clone();
        assert!(control.wait_finished(WAIT));

        let second = sessions.start("B".into(), SpeechOptions::default()).unwrap();
        let ids: Vec<u64> = sessions.status().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second]);
    }
}
