//! Integration tests for the hash join engine: kinds × strictness, NULL
//! semantics, other filters, non-joined emission, and concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use arrow::array::{
    Array, BooleanArray, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use stratum_common::CancelToken;
use stratum_join::{
    Join, JoinKeyDesc, JoinKind, JoinOptions, NonJoinedStream, ProbeProcessInfo, Strictness,
};

fn two_col_schema(key: &str, value: &str) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(key, DataType::Int64, true),
        Field::new(value, DataType::Utf8, true),
    ]))
}

fn block(schema: &SchemaRef, keys: Vec<Option<i64>>, values: Vec<&str>) -> RecordBatch {
    RecordBatch::try_new(
        Arc::clone(schema),
        vec![
            Arc::new(Int64Array::from(keys)),
            Arc::new(StringArray::from(values)),
        ],
    )
    .unwrap()
}

fn build_and_probe(join: &Arc<Join>, right: RecordBatch, left: RecordBatch) -> Vec<RecordBatch> {
    join.insert_from_block(&right, 0).unwrap();
    join.finish_one_build();
    join.wait_until_all_build_finished().unwrap();

    join.set_probe_concurrency(1);
    let mut probe = ProbeProcessInfo::new(left);
    let mut out = Vec::new();
    loop {
        let batch = join.join_block(&mut probe).unwrap();
        if batch.num_rows() > 0 {
            out.push(batch);
        }
        if probe.all_rows_joined_finish {
            break;
        }
    }
    join.finish_one_probe();
    join.wait_until_all_probe_finished().unwrap();
    out
}

/// Collect (left_value, right_value) string pairs from output batches.
fn collect_pairs(batches: &[RecordBatch], left_col: &str, right_col: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for batch in batches {
        let left = batch
            .column_by_name(left_col)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let right = batch
            .column_by_name(right_col)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        for row in 0..batch.num_rows() {
            let l = if left.is_null(row) {
                "<null>".to_string()
            } else {
                left.value(row).to_string()
            };
            let r = if right.is_null(row) {
                "<null>".to_string()
            } else {
                right.value(row).to_string()
            };
            out.push((l, r));
        }
    }
    out
}

fn options(kind: JoinKind, strictness: Strictness) -> JoinOptions {
    JoinOptions::new(kind, strictness, vec![JoinKeyDesc::new(0, 0)])
}

#[test]
fn all_inner_multiplicities() {
    // Right {(1,'x'), (1,'y'), (2,'z')}; left {(1,'L1'), (1,'L2'), (3,'L3')}.
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Inner, Strictness::All),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();

    let right = block(&right_schema, vec![Some(1), Some(1), Some(2)], vec!["x", "y", "z"]);
    let left = block(&left_schema, vec![Some(1), Some(1), Some(3)], vec!["L1", "L2", "L3"]);
    let batches = build_and_probe(&join, right, left);

    let pairs = collect_pairs(&batches, "lv", "rv");
    assert_eq!(
        pairs,
        vec![
            ("L1".into(), "x".into()),
            ("L1".into(), "y".into()),
            ("L2".into(), "x".into()),
            ("L2".into(), "y".into()),
        ]
    );
}

#[test]
fn any_left_preserves_left_row_count() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Left, Strictness::Any),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();

    let right = block(&right_schema, vec![Some(1), Some(1), Some(2)], vec!["x", "y", "z"]);
    let left = block(
        &left_schema,
        vec![Some(1), Some(2), Some(5), None],
        vec!["a", "b", "c", "d"],
    );
    let batches = build_and_probe(&join, right, left);
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    assert_eq!(rows, 4);

    let pairs = collect_pairs(&batches, "lv", "rv");
    // ANY keeps the first inserted match for key 1.
    assert_eq!(pairs[0], ("a".into(), "x".into()));
    assert_eq!(pairs[1], ("b".into(), "z".into()));
    assert_eq!(pairs[2], ("c".into(), "<null>".into()));
    assert_eq!(pairs[3], ("d".into(), "<null>".into()));
}

#[test]
fn null_keys_never_match() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Inner, Strictness::All),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();

    let right = block(&right_schema, vec![None, Some(2)], vec!["n", "z"]);
    let left = block(&left_schema, vec![None, Some(2)], vec!["ln", "l2"]);
    let batches = build_and_probe(&join, right, left);
    let pairs = collect_pairs(&batches, "lv", "rv");
    assert_eq!(pairs, vec![("l2".into(), "z".into())]);
}

#[test]
fn full_join_with_nulls_emits_each_side_once() {
    // S6: right {(1,'x'), (NULL,'n')}; left {(1,'L1'), (NULL,'Lnull')}.
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Full, Strictness::All),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();

    let right = block(&right_schema, vec![Some(1), None], vec!["x", "n"]);
    let left = block(&left_schema, vec![Some(1), None], vec!["L1", "Lnull"]);
    let matched = build_and_probe(&join, right, left);

    let mut pairs = collect_pairs(&matched, "lv", "rv");
    let mut stream =
        NonJoinedStream::new(Arc::clone(&join), &left_schema, 0, 1, 8192).unwrap();
    let mut non_joined = Vec::new();
    while let Some(batch) = stream.next_block().unwrap() {
        non_joined.push(batch);
    }
    pairs.extend(collect_pairs(&non_joined, "lv", "rv"));

    let l1 = pairs.iter().filter(|p| p.0 == "L1").count();
    let lnull = pairs.iter().filter(|p| p.0 == "Lnull").count();
    let n = pairs.iter().filter(|p| p.1 == "n").count();
    let x = pairs.iter().filter(|p| p.1 == "x").count();
    assert_eq!(l1, 1);
    assert_eq!(lnull, 1);
    assert_eq!(n, 1);
    assert_eq!(x, 1);
    assert!(pairs.contains(&("L1".into(), "x".into())));
    assert!(pairs.contains(&("Lnull".into(), "<null>".into())));
    assert!(pairs.contains(&("<null>".into(), "n".into())));
}

#[test]
fn right_join_emits_every_right_row_exactly_once() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Right, Strictness::All),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();

    let right = block(
        &right_schema,
        vec![Some(1), Some(2), Some(3), Some(3)],
        vec!["r1", "r2", "r3a", "r3b"],
    );
    let left = block(&left_schema, vec![Some(1), Some(3)], vec!["l1", "l3"]);
    let matched = build_and_probe(&join, right, left);
    let mut pairs = collect_pairs(&matched, "lv", "rv");

    let mut stream =
        NonJoinedStream::new(Arc::clone(&join), &left_schema, 0, 1, 8192).unwrap();
    while let Some(batch) = stream.next_block().unwrap() {
        pairs.extend(collect_pairs(std::slice::from_ref(&batch), "lv", "rv"));
    }

    // Every right row appears exactly once across matched + non-joined.
    let mut counts: HashMap<String, usize> = HashMap::new();
    for (_, r) in &pairs {
        *counts.entry(r.clone()).or_default() += 1;
    }
    assert_eq!(counts["r1"], 1);
    assert_eq!(counts["r2"], 1);
    assert_eq!(counts["r3a"], 1);
    assert_eq!(counts["r3b"], 1);
    assert!(pairs.contains(&("<null>".into(), "r2".into())));
}

#[test]
fn semi_and_anti_with_helper_column() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");

    for (kind, expect) in [
        // helper: key 1 matched, key 9 unmatched, NULL key -> null helper
        (JoinKind::Semi, vec![Some(1i8), Some(0), None]),
        (JoinKind::Anti, vec![Some(0i8), Some(1), None]),
    ] {
        let join = Join::try_new(
            Arc::clone(&right_schema),
            options(kind, Strictness::Any).with_match_helper("_match"),
            1,
            CancelToken::new(),
            None,
        )
        .unwrap();
        let right = block(&right_schema, vec![Some(1)], vec!["x"]);
        let left = block(&left_schema, vec![Some(1), Some(9), None], vec!["a", "b", "c"]);
        let batches = build_and_probe(&join, right, left);
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 3);
        let helper = batches[0]
            .column_by_name("_match")
            .unwrap()
            .as_any()
            .downcast_ref::<arrow::array::Int8Array>()
            .unwrap();
        let got: Vec<Option<i8>> = helper.iter().collect();
        assert_eq!(got, expect, "{kind:?}");
    }
}

#[test]
fn semi_without_helper_filters_rows() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Semi, Strictness::Any),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();
    let right = block(&right_schema, vec![Some(1), Some(1)], vec!["x", "y"]);
    let left = block(&left_schema, vec![Some(1), Some(2), Some(1)], vec!["a", "b", "c"]);
    let batches = build_and_probe(&join, right, left);
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    // Each matching left row once, regardless of match count.
    assert_eq!(rows, 2);
}

#[test]
fn other_filter_re_filters_matches() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");

    // Residual predicate: right value must be "y".
    let filter: stratum_join::OtherFilter = Arc::new(|batch: &RecordBatch| {
        let rv = batch
            .column_by_name("rv")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        Ok(BooleanArray::from(
            (0..rv.len())
                .map(|i| !rv.is_null(i) && rv.value(i) == "y")
                .collect::<Vec<_>>(),
        ))
    });

    // ALL INNER: only ('L1','y') survives.
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Inner, Strictness::All).with_other_filter(Arc::clone(&filter)),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();
    let right = block(&right_schema, vec![Some(1), Some(1), Some(2)], vec!["x", "y", "z"]);
    let left = block(&left_schema, vec![Some(1), Some(2)], vec!["L1", "L2"]);
    let batches = build_and_probe(&join, right, left);
    assert_eq!(
        collect_pairs(&batches, "lv", "rv"),
        vec![("L1".into(), "y".into())]
    );

    // ALL LEFT: L2's only match fails the filter, so it null-extends.
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Left, Strictness::All).with_other_filter(Arc::clone(&filter)),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();
    let right = block(&right_schema, vec![Some(1), Some(1), Some(2)], vec!["x", "y", "z"]);
    let left = block(&left_schema, vec![Some(1), Some(2)], vec!["L1", "L2"]);
    let batches = build_and_probe(&join, right, left);
    assert_eq!(
        collect_pairs(&batches, "lv", "rv"),
        vec![
            ("L1".into(), "y".into()),
            ("L2".into(), "<null>".into()),
        ]
    );
}

#[test]
fn cross_join_produces_cartesian_product() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        JoinOptions::new(JoinKind::Cross, Strictness::All, Vec::new()),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();
    let right = block(&right_schema, vec![Some(1), Some(2)], vec!["x", "y"]);
    let left = block(&left_schema, vec![Some(7), Some(8), Some(9)], vec!["a", "b", "c"]);
    let batches = build_and_probe(&join, right, left);
    let pairs = collect_pairs(&batches, "lv", "rv");
    assert_eq!(pairs.len(), 6);
    assert_eq!(pairs[0], ("a".into(), "x".into()));
    assert_eq!(pairs[5], ("c".into(), "y".into()));
}

#[test]
fn string_keys_choose_string_method() {
    let right_schema = Arc::new(Schema::new(vec![
        Field::new("rk", DataType::Utf8, true),
        Field::new("rv", DataType::Utf8, true),
    ]));
    let left_schema = Arc::new(Schema::new(vec![
        Field::new("lk", DataType::Utf8, true),
        Field::new("lv", DataType::Utf8, true),
    ]));
    let join = Join::try_new(
        Arc::clone(&right_schema),
        JoinOptions::new(
            JoinKind::Inner,
            Strictness::All,
            vec![JoinKeyDesc::new(0, 0)],
        ),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();
    assert_eq!(join.method(), stratum_join::JoinMethod::KeyString);

    let right = RecordBatch::try_new(
        Arc::clone(&right_schema),
        vec![
            Arc::new(StringArray::from(vec!["k1", "k2"])),
            Arc::new(StringArray::from(vec!["x", "y"])),
        ],
    )
    .unwrap();
    let left = RecordBatch::try_new(
        Arc::clone(&left_schema),
        vec![
            Arc::new(StringArray::from(vec!["k2", "k3"])),
            Arc::new(StringArray::from(vec!["a", "b"])),
        ],
    )
    .unwrap();
    let batches = build_and_probe(&join, right, left);
    assert_eq!(
        collect_pairs(&batches, "lv", "rv"),
        vec![("a".into(), "y".into())]
    );
}

#[test]
fn composite_keys_use_packed_method() {
    let schema = Arc::new(Schema::new(vec![
        Field::new("k1", DataType::Int64, true),
        Field::new("k2", DataType::Int64, true),
        Field::new("v", DataType::Utf8, true),
    ]));
    let join = Join::try_new(
        Arc::clone(&schema),
        JoinOptions::new(
            JoinKind::Inner,
            Strictness::All,
            vec![JoinKeyDesc::new(0, 0), JoinKeyDesc::new(1, 1)],
        ),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();
    assert_eq!(join.method(), stratum_join::JoinMethod::Keys128);

    let right = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![
            Arc::new(Int64Array::from(vec![1, 1])),
            Arc::new(Int64Array::from(vec![10, 20])),
            Arc::new(StringArray::from(vec!["x", "y"])),
        ],
    )
    .unwrap();
    let left = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![
            Arc::new(Int64Array::from(vec![1, 1])),
            Arc::new(Int64Array::from(vec![20, 30])),
            Arc::new(StringArray::from(vec!["a", "b"])),
        ],
    )
    .unwrap();
    let batches = build_and_probe(&join, right, left);
    assert_eq!(
        collect_pairs(&batches, "v", "v"),
        vec![("a".into(), "y".into())]
    );
}

#[test]
fn concurrent_build_and_probe() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let build_concurrency = 4;
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Inner, Strictness::All),
        build_concurrency,
        CancelToken::new(),
        None,
    )
    .unwrap();

    // 4 builders, each inserting 100 rows with keys 0..100.
    let mut handles = Vec::new();
    for stream in 0..build_concurrency {
        let join = Arc::clone(&join);
        let schema = Arc::clone(&right_schema);
        handles.push(thread::spawn(move || {
            let keys: Vec<Option<i64>> = (0..100).map(|k| Some(k as i64)).collect();
            let values: Vec<String> = (0..100).map(|k| format!("s{stream}-{k}")).collect();
            let batch = RecordBatch::try_new(
                schema,
                vec![
                    Arc::new(Int64Array::from(keys)),
                    Arc::new(StringArray::from(
                        values.iter().map(|s| Some(s.as_str())).collect::<Vec<_>>(),
                    )),
                ],
            )
            .unwrap();
            join.insert_from_block(&batch, stream).unwrap();
            join.finish_one_build();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    join.wait_until_all_build_finished().unwrap();
    assert_eq!(join.total_build_input_rows(), 400);
    assert_eq!(join.total_keys(), 100);

    // 2 probers, each with its own left block. Each left key matches 4
    // build rows (one per build partition).
    join.set_probe_concurrency(2);
    let mut handles = Vec::new();
    for p in 0..2 {
        let join = Arc::clone(&join);
        let schema = Arc::clone(&left_schema);
        handles.push(thread::spawn(move || {
            let keys: Vec<Option<i64>> = (0..50).map(|k| Some((p * 50 + k) as i64)).collect();
            let values: Vec<String> = (0..50).map(|k| format!("p{p}-{k}")).collect();
            let left = RecordBatch::try_new(
                schema,
                vec![
                    Arc::new(Int64Array::from(keys)),
                    Arc::new(StringArray::from(
                        values.iter().map(|s| Some(s.as_str())).collect::<Vec<_>>(),
                    )),
                ],
            )
            .unwrap();
            let mut probe = ProbeProcessInfo::new(left);
            let mut rows = 0usize;
            loop {
                let batch = join.join_block(&mut probe).unwrap();
                rows += batch.num_rows();
                if probe.all_rows_joined_finish {
                    break;
                }
            }
            join.finish_one_probe();
            rows
        }));
    }
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    join.wait_until_all_probe_finished().unwrap();
    assert_eq!(total, 100 * 4);
}

#[test]
fn meet_error_latches_and_wakes_waiters() {
    let right_schema = two_col_schema("rk", "rv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Inner, Strictness::All),
        2,
        CancelToken::new(),
        None,
    )
    .unwrap();

    let waiter = {
        let join = Arc::clone(&join);
        thread::spawn(move || join.wait_until_all_build_finished())
    };
    join.meet_error("disk exploded");
    let result = waiter.join().unwrap();
    assert!(result.is_err());
    assert!(join.check_error().is_err());
}

#[test]
fn cancellation_unblocks_waits() {
    let right_schema = two_col_schema("rk", "rv");
    let cancel = CancelToken::new();
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Inner, Strictness::All),
        2,
        cancel.clone(),
        None,
    )
    .unwrap();

    let waiter = {
        let join = Arc::clone(&join);
        thread::spawn(move || join.wait_until_all_build_finished())
    };
    cancel.cancel();
    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(stratum_result::Error::Cancelled)));
}

#[test]
fn memory_limit_fails_build() {
    use stratum_common::MemoryTracker;
    let tracker = MemoryTracker::root("query", 64);
    let right_schema = two_col_schema("rk", "rv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Inner, Strictness::All),
        1,
        CancelToken::new(),
        Some(tracker),
    )
    .unwrap();

    let right = block(
        &right_schema,
        (0..1000).map(|k| Some(k as i64)).collect(),
        (0..1000).map(|_| "payload").collect(),
    );
    let err = join.insert_from_block(&right, 0).unwrap_err();
    assert!(matches!(
        err,
        stratum_result::Error::MemoryLimitExceeded(_)
    ));
}

#[test]
fn non_joined_stream_partitions_are_disjoint_and_complete() {
    let right_schema = two_col_schema("rk", "rv");
    let left_schema = two_col_schema("lk", "lv");
    let join = Join::try_new(
        Arc::clone(&right_schema),
        options(JoinKind::Right, Strictness::All),
        1,
        CancelToken::new(),
        None,
    )
    .unwrap();

    // 100 right rows, none matched by the (empty-result) probe.
    let keys: Vec<Option<i64>> = (0..100).map(|k| Some(k as i64)).collect();
    let values: Vec<String> = (0..100).map(|k| format!("r{k}")).collect();
    let right = RecordBatch::try_new(
        Arc::clone(&right_schema),
        vec![
            Arc::new(Int64Array::from(keys)),
            Arc::new(StringArray::from(
                values.iter().map(|s| Some(s.as_str())).collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap();
    let left = block(&left_schema, vec![Some(-1)], vec!["miss"]);
    build_and_probe(&join, right, left);

    let step = 3;
    let mut seen = Vec::new();
    for index in 0..step {
        let mut stream =
            NonJoinedStream::new(Arc::clone(&join), &left_schema, index, step, 7).unwrap();
        while let Some(batch) = stream.next_block().unwrap() {
            assert!(batch.num_rows() <= 7);
            seen.extend(collect_pairs(std::slice::from_ref(&batch), "lv", "rv"));
        }
    }
    assert_eq!(seen.len(), 100);
    let mut rights: Vec<String> = seen.into_iter().map(|(_, r)| r).collect();
    rights.sort();
    rights.dedup();
    assert_eq!(rights.len(), 100);
}
