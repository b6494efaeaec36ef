#![no_main]

use casq::{NodePool, Operation, Queue, RefQueue, RefStack};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

fuzz_target!(|ops: Vec<casq::Operation<i32>>| {
    let pool = Arc::new(NodePool::new());
    let queue: Arc<RefQueue<Arc<i32>>> = Arc::new(RefQueue::with_pool(pool.clone()).unwrap());
    let stack: Arc<RefStack<Arc<i32>>> = Arc::new(RefStack::with_pool(pool.clone()));
    let plain: Arc<Queue<Box<i32>>> = Arc::new(Queue::new());

    let mut threads = vec![];

    let len = ops.len();

    for sub_ops in ops.chunks(std::cmp::max(len / 20, 1)) {
        let sub_ops = sub_ops.to_vec();
        let queue = queue.clone();
        let stack = stack.clone();
        let plain = plain.clone();

        threads.push(std::thread::spawn(move || {
            sub_ops.into_iter().for_each(|op| match op {
                Operation::Push { item } => stack.push(&Arc::new(item)).unwrap(),
                Operation::Pop => {
                    stack.pop();
                }
                Operation::PopPush => {
                    if let Some(e) = stack.pop() {
                        queue.enqueue(&e).unwrap()
                    }
                }
                Operation::Enqueue { item } => {
                    queue.enqueue(&Arc::new(item)).unwrap();
                    plain.enqueue(Box::new(item)).unwrap();
                }
                Operation::Dequeue => {
                    queue.dequeue();
                    plain.dequeue();
                }
                Operation::DequeueEnqueue => {
                    if let Some(e) = queue.dequeue() {
                        stack.push(&e).unwrap()
                    }
                }
            })
        }))
    }

    for thread in threads {
        thread.join().unwrap()
    }

    assert_eq!(queue.len(), queue.count_nodes());
    assert_eq!(stack.len(), stack.count_nodes());
    assert_eq!(plain.len(), plain.count_nodes());
});
