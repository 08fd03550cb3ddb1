//! Test fixtures and pulse file helpers.
//!
//! Provides convenience functions for setting up test pulse files
//! and common test scenarios.

use pulse_core::{
    Config, FileStoreProvider, LocalSession, MemoryStoreProvider, PulseAccess, TargetRegistry,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Shot number used by the fixtures.
pub const TEST_SHOT: i32 = 1234;
/// Run number used by the fixtures.
pub const TEST_RUN: i32 = 1;
/// Pulse file name used by the fixtures.
pub const TEST_NAME: &str = "test";

/// A session on a fresh pulse file with automatic cleanup.
pub struct TestPulse {
    /// Registry the pulse file was created through.
    pub registry: TargetRegistry,
    /// The session.
    pub session: LocalSession,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestPulse {
    /// Creates a pulse file in memory.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates a pulse file in memory with the given configuration.
    pub fn memory_with(config: Config) -> Self {
        let registry = TargetRegistry::new(config, MemoryStoreProvider::new())
            .expect("Failed to create registry");
        let session = registry
            .create(TEST_NAME, TEST_SHOT, TEST_RUN, 0, 0)
            .expect("Failed to create pulse file");
        Self {
            registry,
            session,
            temp_dir: None,
        }
    }

    /// Creates a pulse file in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let registry = TargetRegistry::new(
            Config::default(),
            FileStoreProvider::new(temp_dir.path()),
        )
        .expect("Failed to create registry");
        let session = registry
            .create(TEST_NAME, TEST_SHOT, TEST_RUN, 0, 0)
            .expect("Failed to create pulse file");
        Self {
            registry,
            session,
            temp_dir: Some(temp_dir),
        }
    }

    /// Directory holding the pulse file, `None` if in memory.
    pub fn dir(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Closes the session and opens the pulse file again.
    pub fn reopen(&mut self) {
        self.session.close().expect("Failed to close session");
        self.session = self
            .registry
            .open(TEST_NAME, TEST_SHOT, TEST_RUN)
            .expect("Failed to reopen pulse file");
    }
}

impl std::ops::Deref for TestPulse {
    type Target = LocalSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

/// Runs a test with a session on a temporary in-memory pulse file.
///
/// # Example
///
/// ```rust
/// use pulse_codec::Value;
/// use pulse_core::{PulseAccess, PutKind};
/// use pulse_testkit::with_temp_pulse;
///
/// with_temp_pulse(|session| {
///     session.begin_put("magnetics", PutKind::non_timed()).unwrap();
///     session.put_data("magnetics", "ip", Value::Double(1.0)).unwrap();
///     session.end_put("magnetics").unwrap();
///     assert_eq!(session.get_data("magnetics", "ip").unwrap(), Value::Double(1.0));
/// });
/// ```
pub fn with_temp_pulse<F, R>(f: F) -> R
where
    F: FnOnce(&LocalSession) -> R,
{
    let pulse = TestPulse::memory();
    f(&pulse.session)
}

/// Runs a test with a session on a temporary pulse file on disk.
pub fn with_file_pulse<F, R>(f: F) -> R
where
    F: FnOnce(&LocalSession, &std::path::Path) -> R,
{
    let pulse = TestPulse::file();
    let dir = pulse.dir().expect("File pulse should have a directory");
    f(&pulse.session, &dir)
}

/// Test scenario helpers.
pub mod scenarios {
    use pulse_codec::Value;
    use pulse_core::{ObjectNode, PulseAccess, PutKind};

    /// `n` evenly spaced times starting at 0.
    pub fn time_base(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * step).collect()
    }

    /// An array of `n` structures, slot `i` holding `psi = i / 10`.
    pub fn profile_slices(n: usize) -> ObjectNode {
        let mut object = ObjectNode::with_capacity(n);
        for i in 0..n {
            object
                .put_value("profiles_1d/psi", i, Value::Double(i as f64 / 10.0), n)
                .expect("Failed to build slice");
        }
        object
    }

    /// Writes a full `equilibrium` record with `n` time slices: the time
    /// base, a scalar series `global_quantities/ip` and a timed array of
    /// structures `time_slice`.
    pub fn write_equilibrium(session: &dyn PulseAccess, n: usize) {
        let times = time_base(n, 0.1);
        let ip: Vec<Value> = (0..n).map(|i| Value::Double(1.0e6 + i as f64)).collect();
        let time: Vec<Value> = times.iter().map(|t| Value::Double(*t)).collect();
        session
            .begin_put("equilibrium", PutKind::timed(times.clone()))
            .expect("Failed to begin put");
        session
            .put_segment("equilibrium", "time", "time", time, times.clone())
            .expect("Failed to put time base");
        session
            .put_segment("equilibrium", "global_quantities/ip", "time", ip, times)
            .expect("Failed to put ip");
        session
            .put_data(
                "equilibrium",
                "vacuum_toroidal_field/r0",
                Value::Double(6.2),
            )
            .expect("Failed to put r0");
        if n > 0 {
            session
                .put_object("equilibrium", "time_slice", &profile_slices(n), true)
                .expect("Failed to put time slices");
        }
        session.end_put("equilibrium").expect("Failed to end put");
    }

    /// Appends one `magnetics` slice per `(time, ip)` pair: the time base
    /// with `put_slice`, then `ip` and its shape bookkeeping with
    /// `put_data`, each pair in its own slice put.
    pub fn append_plain_slices(session: &dyn PulseAccess, samples: &[(f64, f64)]) {
        for (count, &(time, ip)) in samples.iter().enumerate() {
            session
                .begin_put("magnetics", PutKind::Slice { time })
                .expect("Failed to begin slice put");
            session
                .put_slice("magnetics", "time", "time", Value::Double(time), time)
                .expect("Failed to put time");
            session
                .put_data("magnetics", "ip", Value::Double(ip))
                .expect("Failed to put ip");
            session
                .put_data("magnetics", "shape_of_ip", Value::Int(count as i32 + 1))
                .expect("Failed to put shape");
            session.end_put("magnetics").expect("Failed to end put");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{ObjectNode, SlicePolicy};

    #[test]
    fn memory_pulse_is_usable() {
        let pulse = TestPulse::memory();
        scenarios::write_equilibrium(&*pulse, 5);
        let ip = pulse
            .get_all("equilibrium", "global_quantities/ip", "time")
            .unwrap();
        assert_eq!(ip.len(), 5);
    }

    #[test]
    fn file_pulse_survives_reopen() {
        let mut pulse = TestPulse::file();
        scenarios::write_equilibrium(&*pulse, 3);
        pulse.reopen();
        let slice = pulse
            .get_object_slice(
                "equilibrium",
                "time_slice",
                "time",
                0.2,
                SlicePolicy::Closest,
            )
            .unwrap();
        let expected = scenarios::profile_slices(3).into_slots().unwrap().remove(2);
        assert_eq!(slice, ObjectNode::from_value(expected.to_value()));
        assert!(pulse.dir().unwrap().exists());
    }

    #[test]
    fn scenario_time_base() {
        assert_eq!(scenarios::time_base(3, 0.5), vec![0.0, 0.5, 1.0]);
    }
}
