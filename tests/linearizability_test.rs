//! Linearizability check for single-key operations.
//!
//! Each client thread drives its own ten-key keyspace with a 1/3 get, 2/3 put mix and
//! records every operation with its outcome as it completes. Because no two clients share a
//! key, the per-key history is sequential, and the recorded history must be accepted by the
//! sequential specification of a register: every get observes exactly the newest completed
//! put for its key.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use rilldb::{Engine, StorageError, StorageOptions};

#[derive(Debug)]
enum RegisterOp {
    Put { key: String, value: String },
    Get { key: String, observed: Option<String> },
}

#[test]
fn single_key_histories_admit_a_register_specification() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(
        Engine::open(dir.path(), "test_linearizability", StorageOptions::default()).unwrap(),
    );

    let parallelism = 8;
    let ops_per_client = 200;

    let handles: Vec<_> = (0..parallelism)
        .map(|client_id| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut history: Vec<RegisterOp> = Vec::with_capacity(ops_per_client);

                for j in 0..ops_per_client {
                    let key = format!("key-{client_id}-{}", j % 10);

                    if j % 3 == 0 {
                        let observed = match engine.get(key.as_bytes()) {
                            Ok(value) => Some(String::from_utf8(value).unwrap()),
                            Err(StorageError::KeyNotFound) => None,
                            Err(err) => panic!("get failed: {err}"),
                        };
                        history.push(RegisterOp::Get { key, observed });
                    } else {
                        let value = format!("value-{client_id}-{j}");
                        engine.put(key.as_bytes(), value.as_bytes()).unwrap();
                        history.push(RegisterOp::Put { key, value });
                    }
                }

                history
            })
        })
        .collect();

    let mut total_ops = 0;
    let mut total_puts = 0_u64;
    for handle in handles {
        let history = handle.join().unwrap();
        total_ops += history.len();

        // Replay the client's history against a register model
        let mut registers: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        for op in history {
            match op {
                RegisterOp::Put { key, value } => {
                    registers.insert(key, value);
                    total_puts += 1;
                }
                RegisterOp::Get { key, observed } => {
                    assert_eq!(
                        observed.as_deref(),
                        registers.get(&key).map(String::as_str),
                        "a get must observe the newest completed put for {key}"
                    );
                }
            }
        }
    }

    assert_eq!(total_ops, parallelism * ops_per_client);
    assert_eq!(engine.ops_received_count(), total_puts);

    engine.close().unwrap();
}
