//! Property tests for protocol messages.

use proptest::prelude::*;
use pulse_codec::Value;
use pulse_core::{FieldContent, PutKind, Series};
use pulse_protocol::{Entry, GetBatchReply, PutBatch, SessionToken, WireMessage};

fn row() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Int),
        (-1.0e9..1.0e9f64).prop_map(Value::Double),
        "[a-z]{0,12}".prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn any_token_survives(raw in any::<i64>()) {
        let batch = PutBatch::new(SessionToken(raw), "a", PutKind::ReplaceLast);
        let decoded = PutBatch::decode(&batch.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded.session, SessionToken(raw));
    }

    #[test]
    fn segment_entries_keep_rows(rows in prop::collection::vec(row(), 0..20)) {
        let times: Vec<f64> = (0..rows.len()).map(|i| i as f64 * 0.5).collect();
        let mut batch = PutBatch::new(SessionToken(1), "core_pro400", PutKind::timed(times));
        batch.segments.push(Entry::rows("core_pro400/te0", rows.clone(), Vec::new()));
        let decoded = PutBatch::decode(&batch.encode().unwrap()).unwrap();
        prop_assert_eq!(&decoded.segments[0].value, &Value::List(rows));
        prop_assert_eq!(decoded, batch);
    }

    #[test]
    fn series_fields_survive(rows in prop::collection::vec(row(), 1..20)) {
        let keys: Vec<f64> = (0..rows.len()).map(|i| i as f64).collect();
        let series = Series::new(keys, rows).unwrap();
        let reply = GetBatchReply {
            fields: vec![("te0".to_string(), FieldContent::Series(series))],
        };
        prop_assert_eq!(GetBatchReply::decode(&reply.encode().unwrap()).unwrap(), reply);
    }
}
