use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use worker_daemon::{
    standby, state_fn, Context, ContextBuilder, DaemonConfig, HealthCode, HealthReport,
    Predicate, ReportHealth, SleepPolicy, Sleeper, StateError, StateKind, StateRef, Step,
};

#[derive(Default)]
struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

impl RecordingSleeper {
    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct RecordingReporter {
    reports: Mutex<Vec<(HealthCode, bool)>>,
}

impl ReportHealth for RecordingReporter {
    fn report(&self, report: &HealthReport) {
        self.reports
            .lock()
            .unwrap()
            .push((report.health, report.changed()));
    }
}

/// Predicate answering from a fixed script, then `false` forever.
fn scripted(answers: &[bool]) -> Predicate {
    let answers = Mutex::new(answers.iter().copied().collect::<VecDeque<_>>());
    Arc::new(move |_: &Context| answers.lock().unwrap().pop_front().unwrap_or(false))
}

fn counting_state(name: &str, calls: Arc<AtomicUsize>) -> StateRef {
    state_fn(name, move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Step::Repeat)
    })
}

/// Standby and guard alternate as the condition flips, and the work state
/// only runs under the guard.
#[test]
fn standby_alternates_with_condition() {
    let sleeper = Arc::new(RecordingSleeper::default());
    let context = ContextBuilder::for_testing()
        .sleep_policy(SleepPolicy::new(Duration::from_millis(250)).with_sleeper(sleeper.clone()))
        .build()
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let work = counting_state("work", Arc::clone(&calls));
    let initial = standby(Arc::clone(&work), scripted(&[true, false, true, false]), None);
    let mut machine = worker_daemon::StateMachine::new(context, initial);

    let expected = [
        StateKind::Standby,
        StateKind::StandbyGuard,
        StateKind::Standby,
        StateKind::StandbyGuard,
    ];
    for kind in expected {
        let state = machine.advance().unwrap();
        assert_eq!(state.kind(), kind);
        assert!(Arc::ptr_eq(state.inner().unwrap(), &work));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(250)]);
}

/// A configured poll timeout replaces the sleep policy default while in standby.
#[test]
fn standby_uses_poll_timeout() {
    let sleeper = Arc::new(RecordingSleeper::default());
    let context = ContextBuilder::for_testing()
        .sleep_policy(SleepPolicy::new(Duration::from_secs(1)).with_sleeper(sleeper.clone()))
        .build()
        .unwrap();

    let initial = standby(
        state_fn("work", |_| Ok(Step::Repeat)),
        scripted(&[true, true, true]),
        Some(Duration::from_millis(10)),
    );
    let mut machine = worker_daemon::StateMachine::new(context, initial);

    for _ in 0..3 {
        assert_eq!(machine.advance().unwrap().kind(), StateKind::Standby);
    }
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(10); 3]);
}

/// Sleeping never changes the current state and only sleeps on request.
#[test]
fn sleep_requests_keep_current_state() {
    let sleeper = Arc::new(RecordingSleeper::default());
    let context = ContextBuilder::for_testing()
        .sleep_policy(SleepPolicy::new(Duration::from_secs(2)).with_sleeper(sleeper.clone()))
        .build()
        .unwrap();

    let turns = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&turns);
    let initial = state_fn("poll", move |_| {
        Ok(match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Step::Sleep(None),
            1 => Step::sleep_for(Duration::from_millis(5)),
            _ => Step::Repeat,
        })
    });
    let mut machine = worker_daemon::StateMachine::new(context, Arc::clone(&initial));

    for _ in 0..4 {
        let state = machine.advance().unwrap();
        assert!(Arc::ptr_eq(&state, &initial));
    }
    assert_eq!(
        sleeper.sleeps(),
        vec![Duration::from_secs(2), Duration::from_millis(5)]
    );
}

/// In strict mode a recoverable error is recorded and still propagates.
#[test]
fn strict_policy_records_and_reraises() {
    let mut config = DaemonConfig::default();
    config.error_policy.strict = true;
    let context = ContextBuilder::for_testing().config(config).build().unwrap();

    let initial = state_fn("flaky", |_| Err(anyhow::anyhow!("upstream timeout").into()));
    let mut machine = worker_daemon::StateMachine::new(context, initial);

    let err = machine.advance().unwrap_err();
    assert!(matches!(err, StateError::Other(_)));

    let errors = machine.context().error_policy().errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("upstream timeout"));
    assert_eq!(machine.context().error_policy().health(), HealthCode::Error);
}

/// Non-strict errors are swallowed; health flips to ERROR and back, reported
/// at the first scope exit and on every change.
#[test]
fn lenient_policy_reports_health_transitions() {
    let reporter = Arc::new(RecordingReporter::default());
    let mut config = DaemonConfig::default();
    config.error_policy.health_report_interval_secs = 3600.0;
    let context = ContextBuilder::for_testing()
        .config(config)
        .health_reporter(reporter.clone())
        .build()
        .unwrap();

    let turns = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&turns);
    let initial = state_fn("flaky", move |_| match counter.fetch_add(1, Ordering::SeqCst) {
        1 => Err(anyhow::anyhow!("transient").into()),
        _ => Ok(Step::Repeat),
    });
    let mut machine = worker_daemon::StateMachine::new(context, initial);

    for _ in 0..4 {
        machine.advance().unwrap();
    }

    let reports = reporter.reports.lock().unwrap().clone();
    assert_eq!(
        reports,
        vec![
            (HealthCode::Ok, false),
            (HealthCode::Error, true),
            (HealthCode::Ok, true),
        ]
    );
}

/// A fatal error stops the machine regardless of strictness.
#[test]
fn fatal_error_ends_run() {
    let context = ContextBuilder::for_testing().build().unwrap();
    let initial = state_fn("broken", |_| Err(StateError::fatal("corrupt state")));
    let mut machine = worker_daemon::StateMachine::new(context, initial);

    assert!(matches!(machine.run(), Err(StateError::Fatal(_))));
}
