//! The internal log sink is process wide, so it gets a test binary of its
//! own.

mod common;

use std::sync::Mutex;

use common::*;
use meshlink::{DropReason, MacConfig, RxOutcome};

struct Recording {
    records: Mutex<Vec<(log::Level, String)>>,
}

impl Recording {
    const fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Vec<(log::Level, String)> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }
}

impl log::Log for Recording {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if record.target().starts_with("meshlink") {
            let msg = record.args().to_string();
            self.records.lock().unwrap().push((record.level(), msg));
        }
    }

    fn flush(&self) {}
}

static GLOBAL: Recording = Recording::new();
static LINK: Recording = Recording::new();

#[test]
fn diagnostics_go_to_the_installed_sink() {
    log::set_logger(&GLOBAL).unwrap();
    log::set_max_level(log::LevelFilter::Trace);

    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = TestCore::new(MacConfig::DEFAULT, &seg, &frm, &expiry).unwrap();
    let mut timers = FakeTimers::default();
    let mut upper = Recorder::default();
    let data = payload(20, 3);
    let mut frames = segments(addr(4), 1, &data, 239);
    frames[0].header.segment_id = 2;

    // Until a sink is installed, the global logger gets everything
    let res = core.receive(&frames[0], &mut timers, &mut upper);
    assert_eq!(res, RxOutcome::Dropped(DropReason::Malformed));
    let seen = GLOBAL.take();
    assert!(
        seen.iter()
            .any(|(lvl, msg)| *lvl == log::Level::Warn && msg.starts_with("malformed frame")),
        "{seen:?}"
    );

    meshlink::set_internal_log_sink(&LINK);
    core.receive(&frames[0], &mut timers, &mut upper);
    assert!(GLOBAL.take().is_empty());
    let seen = LINK.take();
    assert!(
        seen.iter()
            .any(|(lvl, msg)| *lvl == log::Level::Warn && msg.starts_with("malformed frame")),
        "{seen:?}"
    );

    // An installed sink stays in place
    meshlink::silence_internal_logs();
    core.receive(&frames[0], &mut timers, &mut upper);
    assert!(GLOBAL.take().is_empty());
    assert_eq!(LINK.take().len(), 1);
    assert_eq!(core.counters().malformed_frame, 3);
}
