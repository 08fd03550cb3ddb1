//! Property tests across sessions.

use proptest::prelude::*;
use pulse_core::{Config, GetKind, PulseAccess, PutKind};
use pulse_testkit::prelude::*;

/// Appends the series in the given chunks, one slice bracket per chunk.
fn append_in_chunks(
    session: &dyn PulseAccess,
    times: &[f64],
    rows: &[pulse_codec::Value],
    chunks: &[usize],
) {
    let mut at = 0;
    for &size in chunks {
        let end = at + size;
        session
            .begin_put("magnetics", PutKind::Slice { time: times[at] })
            .unwrap();
        session
            .put_segment(
                "magnetics",
                "ip",
                "time",
                rows[at..end].to_vec(),
                times[at..end].to_vec(),
            )
            .unwrap();
        session.end_put("magnetics").unwrap();
        at = end;
    }
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn chunking_does_not_change_reads((times, rows, chunks) in chunked_series_strategy(60)) {
        let pulse = TestPulse::memory_with(Config::default().segment_capacity(7));
        append_in_chunks(&*pulse, &times, &rows, &chunks);

        let series = pulse.get_all("magnetics", "ip", "time").unwrap();
        prop_assert_eq!(series.keys, times);
        prop_assert_eq!(series.rows, rows);
    }

    #[test]
    fn remote_chunks_read_like_local((times, rows, chunks) in chunked_series_strategy(40)) {
        let local = local_session();
        let remote = RemoteHarness::new();
        append_in_chunks(&local, &times, &rows, &chunks);
        append_in_chunks(&remote.session, &times, &rows, &chunks);
        prop_assert_eq!(remote.calls(pulse_protocol::Procedure::PutBatch), chunks.len());

        remote.session.begin_get("magnetics", GetKind::Full).unwrap();
        let read_times = [times[0] - 1.0, times[times.len() / 2], times[times.len() - 1] + 1.0];
        assert_same_series(&local, &remote.session, "magnetics", "ip", "time", &read_times);
        remote.session.end_get("magnetics").unwrap();
    }

    #[test]
    fn plain_slices_read_like_local((times, rows) in series_strategy(25)) {
        let samples: Vec<(f64, f64)> = times
            .iter()
            .zip(&rows)
            .map(|(t, row)| (*t, row.to_f64_vec().unwrap()[0]))
            .collect();
        let local = local_session();
        let remote = RemoteHarness::new();
        scenarios::append_plain_slices(&local, &samples);
        scenarios::append_plain_slices(&remote.session, &samples);

        let series = local.get_all("magnetics", "ip", "time").unwrap();
        prop_assert_eq!(&series.keys, &times);
        prop_assert_eq!(&series.rows, &rows);

        remote.session.begin_get("magnetics", GetKind::Full).unwrap();
        let read_times = [times[0], times[times.len() - 1] + 0.5];
        assert_same_series(&local, &remote.session, "magnetics", "ip", "time", &read_times);
        remote.session.end_get("magnetics").unwrap();
    }
}
