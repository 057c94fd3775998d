use spectrostore::history::ParameterHistory;
use spectrostore::AcquisitionError;
use std::sync::Arc;
use std::thread;

#[test]
fn test_history_is_bounded() {
    let history = ParameterHistory::new(vec!["temp".to_string()], 5, 10).unwrap();

    for i in 0..12 {
        tokio_test::assert_ok!(history.update(&[i as f64]));
    }

    let dump = history.dump();
    assert_eq!(dump.get("temp").unwrap(), &[7.0, 8.0, 9.0, 10.0, 11.0]);
    assert_eq!(dump.get("time").unwrap().len(), 5);
    assert_eq!(dump.get("absolute_time").unwrap().len(), 5);
}

#[test]
fn test_display_observer_gets_selected_pair() {
    let history = ParameterHistory::new(vec!["temp".to_string(), "power".to_string()], 100, 3)
        .unwrap();
    let mut updates = history.subscribe();

    history.update(&[20.0, 1.0]).unwrap();
    let first = updates.try_recv().unwrap();
    assert_eq!(first.x_name, "time");
    assert_eq!(first.y_name, "absolute_time");
    assert_eq!(first.x.len(), 1);

    history.select_display_axes("temp", "power").unwrap();
    for i in 1..5 {
        history.update(&[20.0 + i as f64, 1.0 + i as f64]).unwrap();
    }

    let mut last = None;
    while let Ok(update) = updates.try_recv() {
        last = Some(update);
    }
    let last = last.unwrap();
    assert_eq!(last.x_name, "temp");
    assert_eq!(last.x, vec![22.0, 23.0, 24.0]);
    assert_eq!(last.y, vec![3.0, 4.0, 5.0]);
}

#[test]
fn test_mismatched_vector_is_rejected() {
    let history = ParameterHistory::new(vec!["a".to_string(), "b".to_string()], 10, 10).unwrap();
    let err = history.update(&[1.0, 2.0, 3.0]).unwrap_err();
    assert!(matches!(
        err,
        AcquisitionError::InvalidParameterVector { expected: 2, actual: 3 }
    ));
}

#[test]
fn test_dump_survives_concurrent_updates() {
    let history = Arc::new(ParameterHistory::new(vec!["x".to_string()], 1000, 10).unwrap());
    let writer = {
        let history = history.clone();
        thread::spawn(move || {
            for i in 0..500 {
                history.update(&[i as f64]).unwrap();
            }
        })
    };

    for _ in 0..50 {
        let dump = history.dump();
        let lengths: Vec<usize> = dump.series.iter().map(|s| s.len()).collect();
        assert!(lengths.windows(2).all(|w| w[0] == w[1]));
    }
    writer.join().unwrap();
    assert_eq!(history.dump().get("x").unwrap().len(), 500);
}

#[test]
fn test_time_series_are_monotonic() {
    let history = ParameterHistory::new(vec![], 100, 10).unwrap();
    for _ in 0..20 {
        history.update(&[]).unwrap();
    }
    let dump = history.dump();
    let time = dump.get("time").unwrap();
    assert!(time.windows(2).all(|w| w[0] <= w[1]));
    assert!(dump.parameter_keys().is_empty());
}
