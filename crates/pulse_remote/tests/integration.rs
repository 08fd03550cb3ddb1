//! Integration tests for remote sessions against an in-process server.

use pulse_codec::Value;
use pulse_core::{
    CoreError, GetKind, ObjectNode, PulseAccess, PutKind, SlicePolicy, TargetRegistry,
};
use pulse_protocol::Procedure;
use pulse_remote::{
    LoopbackTransport, PeerHandler, RecordingTransport, RemoteConfig, RemoteSession,
    RemoteTransport,
};
use pulse_server::{PulseServer, ServerConfig};
use std::sync::Arc;

const SHOT: i32 = 5;
const RUN: i32 = 1;

fn server() -> Arc<PulseServer> {
    Arc::new(PulseServer::new(
        ServerConfig::default(),
        TargetRegistry::in_memory(),
    ))
}

fn connect(
    server: &Arc<PulseServer>,
) -> Arc<RecordingTransport<LoopbackTransport<impl PeerHandler>>> {
    let server = Arc::clone(server);
    Arc::new(RecordingTransport::new(LoopbackTransport::new(
        move |procedure: Procedure, payload: &[u8]| server.handle(procedure, payload),
    )))
}

fn slot(psi: f64) -> ObjectNode {
    let mut object = ObjectNode::with_capacity(1);
    object.put_value("psi", 0, Value::Double(psi), 1).unwrap();
    object.into_slots().unwrap().remove(0)
}

fn slots(psi: &[f64]) -> ObjectNode {
    ObjectNode::Array(psi.iter().map(|p| slot(*p)).collect())
}

/// Writes the same pulse through any session: a full record, two appended
/// slices and a replacement of the last slice.
fn write_pulse(session: &dyn PulseAccess) {
    let times = vec![0.0, 1.0];
    session
        .begin_put("equilibrium", PutKind::timed(times.clone()))
        .unwrap();
    session
        .put_segment(
            "equilibrium",
            "time",
            "time",
            vec![Value::Double(0.0), Value::Double(1.0)],
            times.clone(),
        )
        .unwrap();
    session
        .put_data("equilibrium", "vacuum_toroidal_field/r0", Value::Double(6.2))
        .unwrap();
    session
        .put_segment(
            "equilibrium",
            "global_quantities/ip",
            "time",
            vec![Value::Double(1.0e6), Value::Double(1.1e6)],
            times,
        )
        .unwrap();
    session
        .put_object("equilibrium", "time_slice", &slots(&[0.1, 0.2]), true)
        .unwrap();
    session.end_put("equilibrium").unwrap();

    for (time, psi) in [(2.0, 0.3), (3.0, 0.4)] {
        session
            .begin_put("equilibrium", PutKind::Slice { time })
            .unwrap();
        session
            .put_slice("equilibrium", "time", "time", Value::Double(time), time)
            .unwrap();
        session
            .put_slice(
                "equilibrium",
                "global_quantities/ip",
                "time",
                Value::Double(1.0e6 + time),
                time,
            )
            .unwrap();
        session
            .put_object_slice("equilibrium", "time_slice", &slot(psi))
            .unwrap();
        session.end_put("equilibrium").unwrap();
    }

    session
        .begin_put("equilibrium", PutKind::ReplaceLast)
        .unwrap();
    session
        .replace_last_slice("equilibrium", "global_quantities/ip", Value::Double(9.0))
        .unwrap();
    session
        .replace_last_object_slice("equilibrium", "time_slice", &slot(0.9))
        .unwrap();
    session.end_put("equilibrium").unwrap();
}

#[test]
fn remote_reads_match_local() {
    let local = TargetRegistry::in_memory()
        .create("test", SHOT, RUN, 0, 0)
        .unwrap();
    write_pulse(&local);

    let server = server();
    let remote = RemoteSession::create(
        connect(&server),
        RemoteConfig::default(),
        "test",
        SHOT,
        RUN,
        0,
        0,
    )
    .unwrap();
    write_pulse(&remote);

    remote.begin_get("equilibrium", GetKind::Full).unwrap();
    let ip = remote
        .get_all("equilibrium", "global_quantities/ip", "time")
        .unwrap();
    assert_eq!(ip.keys, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(ip.rows.last(), Some(&Value::Double(9.0)));
    assert_eq!(
        ip,
        local
            .get_all("equilibrium", "global_quantities/ip", "time")
            .unwrap()
    );

    assert_eq!(
        remote
            .get_data("equilibrium", "vacuum_toroidal_field/r0")
            .unwrap(),
        local
            .get_data("equilibrium", "vacuum_toroidal_field/r0")
            .unwrap()
    );
    assert_eq!(
        remote
            .get_slice(
                "equilibrium",
                "global_quantities/ip",
                "time",
                0.5,
                SlicePolicy::Interpolation
            )
            .unwrap(),
        local
            .get_slice(
                "equilibrium",
                "global_quantities/ip",
                "time",
                0.5,
                SlicePolicy::Interpolation
            )
            .unwrap()
    );

    let last = remote
        .get_object_slice("equilibrium", "time_slice", "time", 3.0, SlicePolicy::Closest)
        .unwrap();
    assert_eq!(last, ObjectNode::from_value(slot(0.9).to_value()));
    assert_eq!(
        last,
        local
            .get_object_slice("equilibrium", "time_slice", "time", 3.0, SlicePolicy::Closest)
            .unwrap()
    );
    assert_eq!(
        remote.get_dimension("equilibrium", "time_slice").unwrap(),
        local.get_dimension("equilibrium", "time_slice").unwrap()
    );
    remote.end_get("equilibrium").unwrap();

    remote.close().unwrap();
    local.close().unwrap();
}

#[test]
fn sliced_get_matches_local() {
    let local = TargetRegistry::in_memory()
        .create("test", SHOT, RUN, 0, 0)
        .unwrap();
    write_pulse(&local);

    let server = server();
    let transport = connect(&server);
    let remote = RemoteSession::create(
        transport.clone(),
        RemoteConfig::default(),
        "test",
        SHOT,
        RUN,
        0,
        0,
    )
    .unwrap();
    write_pulse(&remote);

    let kind = GetKind::Slice {
        time: 1.0,
        policy: SlicePolicy::Closest,
    };
    remote.begin_get("equilibrium", kind).unwrap();
    let sample = remote
        .get_slice(
            "equilibrium",
            "global_quantities/ip",
            "time",
            1.0,
            SlicePolicy::Closest,
        )
        .unwrap();
    assert_eq!(sample.time, 1.0);
    assert_eq!(
        sample,
        local
            .get_slice(
                "equilibrium",
                "global_quantities/ip",
                "time",
                1.0,
                SlicePolicy::Closest
            )
            .unwrap()
    );
    assert_eq!(
        remote
            .get_object_slice("equilibrium", "time_slice", "time", 1.0, SlicePolicy::Closest)
            .unwrap(),
        local
            .get_object_slice("equilibrium", "time_slice", "time", 1.0, SlicePolicy::Closest)
            .unwrap()
    );
    assert!(remote
        .is_sliced("equilibrium", "global_quantities/ip")
        .unwrap());
    remote.end_get("equilibrium").unwrap();
    assert_eq!(transport.count(Procedure::GetBatch), 1);

    remote.close().unwrap();
    local.close().unwrap();
}

#[test]
fn one_put_call_per_bracket() {
    let server = server();
    let transport = connect(&server);
    let remote = RemoteSession::create(
        transport.clone(),
        RemoteConfig::default(),
        "test",
        SHOT,
        RUN,
        0,
        0,
    )
    .unwrap();
    write_pulse(&remote);

    assert_eq!(transport.count(Procedure::Create), 1);
    assert_eq!(transport.count(Procedure::PutBatch), 4);
    assert_eq!(transport.count(Procedure::GetBatch), 0);
    remote.close().unwrap();
}

#[test]
fn remote_writes_reach_the_server() {
    let server = server();
    let remote = RemoteSession::create(
        connect(&server),
        RemoteConfig::default(),
        "test",
        SHOT,
        RUN,
        0,
        0,
    )
    .unwrap();
    write_pulse(&remote);
    remote.close().unwrap();
    assert_eq!(server.session_count(), 0);

    let local = server.registry().open("test", SHOT, RUN).unwrap();
    let ip = local
        .get_all("equilibrium", "global_quantities/ip", "time")
        .unwrap();
    assert_eq!(ip.len(), 4);
    local.close().unwrap();
}

#[test]
fn reads_outside_a_get_bracket_fail() {
    let server = server();
    let remote = RemoteSession::create(
        connect(&server),
        RemoteConfig::default(),
        "test",
        SHOT,
        RUN,
        0,
        0,
    )
    .unwrap();
    write_pulse(&remote);

    let err = remote
        .get_data("equilibrium", "vacuum_toroidal_field/r0")
        .unwrap_err();
    assert!(matches!(err, CoreError::RemoteProtocol { .. }));

    remote.begin_get("equilibrium", GetKind::Full).unwrap();
    assert!(remote
        .get_data("equilibrium", "vacuum_toroidal_field/b0")
        .unwrap_err()
        .is_not_found());
    assert!(!remote
        .get_dimension("equilibrium", "vacuum_toroidal_field/b0")
        .unwrap()
        .exists);
    remote.end_get("equilibrium").unwrap();
    remote.close().unwrap();
}

#[test]
fn delete_goes_straight_to_the_server() {
    let server = server();
    let remote = RemoteSession::create(
        connect(&server),
        RemoteConfig::default(),
        "test",
        SHOT,
        RUN,
        0,
        0,
    )
    .unwrap();
    write_pulse(&remote);

    remote
        .delete_data("equilibrium", "global_quantities/ip")
        .unwrap();
    remote.begin_get("equilibrium", GetKind::Full).unwrap();
    assert!(!remote
        .get_dimension("equilibrium", "global_quantities/ip")
        .unwrap()
        .exists);
    assert!(remote
        .get_dimension("equilibrium", "time_slice")
        .unwrap()
        .exists);
    remote.end_get("equilibrium").unwrap();

    remote.delete_all_fields("equilibrium").unwrap();
    remote.begin_get("equilibrium", GetKind::Full).unwrap();
    assert!(!remote
        .get_dimension("equilibrium", "time_slice")
        .unwrap()
        .exists);
    remote.end_get("equilibrium").unwrap();
    remote.close().unwrap();
}

#[test]
fn open_of_missing_pulse_is_refused() {
    let server = server();
    let err = RemoteSession::open(
        connect(&server),
        RemoteConfig::default(),
        "test",
        99,
        0,
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::RemoteProtocol { .. }));
    assert_eq!(server.session_count(), 0);
}

#[test]
fn closed_transport_fails_calls() {
    let server = server();
    let transport = connect(&server);
    let remote = RemoteSession::create(
        transport.clone(),
        RemoteConfig::default().with_flush_on_close(false),
        "test",
        SHOT,
        RUN,
        0,
        0,
    )
    .unwrap();
    remote
        .begin_put("magnetics", PutKind::non_timed())
        .unwrap();
    remote
        .put_data("magnetics", "ip", Value::Double(1.0))
        .unwrap();
    transport.close();
    let err = remote.end_put("magnetics").unwrap_err();
    assert!(err.to_string().contains("not connected"));
}
