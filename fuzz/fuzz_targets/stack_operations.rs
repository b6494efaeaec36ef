#![no_main]

use casq::{Operation, Stack};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

fuzz_target!(|ops: Vec<casq::Operation<i32>>| {
    let stack = Arc::new(Stack::new());

    let mut threads = vec![];

    let len = ops.len();

    for sub_ops in ops.chunks(std::cmp::max(len / 20, 1)) {
        let sub_ops = sub_ops.to_vec();
        let stack = stack.clone();

        threads.push(std::thread::spawn(move || {
            sub_ops.into_iter().for_each(|op| match op {
                Operation::Push { item } | Operation::Enqueue { item } => {
                    stack.push(Box::new(item)).unwrap()
                }
                Operation::Pop | Operation::Dequeue => {
                    stack.pop();
                }
                Operation::PopPush | Operation::DequeueEnqueue => {
                    if let Some(e) = stack.pop() {
                        stack.push(Box::new(e.wrapping_mul(*e))).unwrap()
                    }
                }
            })
        }))
    }

    for thread in threads {
        thread.join().unwrap()
    }

    assert_eq!(stack.len(), stack.count_nodes());
});
