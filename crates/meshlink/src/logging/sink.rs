// Which sink do the MAC's own diagnostics go to?
//
// * By default, the global `log::logger()`
// * A user provided logger, when the global logger forwards records over the
//   radio link itself (logging about the link through the link loops)
// * Nothing at all, once silenced
//
// The sink can be switched away from the global default only once.

pub(crate) mod internal {
    use core::{
        cell::UnsafeCell,
        mem::MaybeUninit,
        sync::atomic::{AtomicU8, Ordering},
    };

    use critical_section::CriticalSection;

    pub(super) struct StaticLogger {
        manual_logger: UnsafeCell<MaybeUninit<&'static dyn log::Log>>,
        state: AtomicU8,
    }

    unsafe impl Sync for StaticLogger {}
    unsafe impl Send for StaticLogger {}

    impl StaticLogger {
        const fn new() -> Self {
            Self {
                manual_logger: UnsafeCell::new(MaybeUninit::uninit()),
                state: AtomicU8::new(STATE_GLOBAL_DEFAULT),
            }
        }

        pub(super) fn set_null_with_cs(&'static self, _cs: CriticalSection<'_>) {
            if self.state.load(Ordering::Relaxed) != STATE_GLOBAL_DEFAULT {
                return;
            }
            self.state.store(STATE_NULL, Ordering::Relaxed);
        }

        pub(super) fn set_manual_with_cs(
            &'static self,
            _cs: CriticalSection<'_>,
            dlog: &'static dyn log::Log,
        ) {
            if self.state.load(Ordering::Relaxed) != STATE_GLOBAL_DEFAULT {
                return;
            }
            // SAFETY: the logger is only written while the state is still
            // GLOBAL_DEFAULT, and under a critical section. The state is
            // stored after the write, and never leaves MANUAL again, so
            // readers that observe MANUAL see a fully written reference.
            unsafe {
                self.manual_logger.get().write(MaybeUninit::new(dlog));
            }
            self.state.store(STATE_MANUAL, Ordering::Release);
        }

        fn current(&'static self) -> &'static dyn log::Log {
            match self.state.load(Ordering::Acquire) {
                STATE_GLOBAL_DEFAULT => log::logger(),
                STATE_MANUAL => {
                    let ptr: *mut MaybeUninit<&'static dyn log::Log> = self.manual_logger.get();
                    // SAFETY: MANUAL is only stored after the reference was
                    // written, and the reference is never written again.
                    unsafe {
                        let muref: &'static MaybeUninit<&'static dyn log::Log> = &*ptr;
                        muref.assume_init_ref()
                    }
                }
                _ => &NOP_LOGGER,
            }
        }
    }

    pub(super) static STORE: StaticLogger = StaticLogger::new();
    const STATE_GLOBAL_DEFAULT: u8 = 0;
    const STATE_NULL: u8 = 1;
    const STATE_MANUAL: u8 = 2;

    #[inline]
    pub(crate) fn logger() -> &'static dyn log::Log {
        STORE.current()
    }

    struct NopLogger;
    static NOP_LOGGER: NopLogger = NopLogger;

    impl log::Log for NopLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            false
        }

        fn log(&self, _: &log::Record) {}
        fn flush(&self) {}
    }

    #[cfg(test)]
    mod test {
        use core::sync::atomic::AtomicUsize;

        use super::*;

        struct Counting(AtomicUsize);

        impl log::Log for Counting {
            fn enabled(&self, _: &log::Metadata) -> bool {
                true
            }

            fn log(&self, _: &log::Record) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }

            fn flush(&self) {}
        }

        fn emit(store: &'static StaticLogger) {
            log::warn!(logger: store.current(), "hello");
        }

        #[test]
        fn silenced_stays_silent() {
            static STORE: StaticLogger = StaticLogger::new();
            static SINK: Counting = Counting(AtomicUsize::new(0));
            log::set_max_level(log::LevelFilter::Trace);

            critical_section::with(|cs| STORE.set_null_with_cs(cs));
            critical_section::with(|cs| STORE.set_manual_with_cs(cs, &SINK));
            emit(&STORE);
            assert_eq!(SINK.0.load(Ordering::Relaxed), 0);
        }

        #[test]
        fn first_sink_wins() {
            static STORE: StaticLogger = StaticLogger::new();
            static FIRST: Counting = Counting(AtomicUsize::new(0));
            static SECOND: Counting = Counting(AtomicUsize::new(0));
            log::set_max_level(log::LevelFilter::Trace);

            critical_section::with(|cs| STORE.set_manual_with_cs(cs, &FIRST));
            critical_section::with(|cs| STORE.set_manual_with_cs(cs, &SECOND));
            critical_section::with(|cs| STORE.set_null_with_cs(cs));
            emit(&STORE);
            emit(&STORE);
            assert_eq!(FIRST.0.load(Ordering::Relaxed), 2);
            assert_eq!(SECOND.0.load(Ordering::Relaxed), 0);
        }
    }
}

/// Send the MAC's own log records to `sink` instead of the global logger.
///
/// Only effective once, and only if [`silence_internal_logs()`] has not been
/// called first.
pub fn set_internal_log_sink(sink: &'static dyn log::Log) {
    critical_section::with(|cs| {
        internal::STORE.set_manual_with_cs(cs, sink);
    })
}

/// Drop all of the MAC's own log records.
///
/// Only effective if no sink was installed with [`set_internal_log_sink()`].
pub fn silence_internal_logs() {
    critical_section::with(|cs| {
        internal::STORE.set_null_with_cs(cs);
    })
}
