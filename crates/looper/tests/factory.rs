// Copyright 2024 Shingo OKAWA and a number of other contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use looper::{Context, Looper, LooperFactory};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_obtains_share_one_looper_per_key() {
    let factory = Arc::new(LooperFactory::<u8>::new());
    let created = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(8));

    let loopers = (0..8)
        .map(|_| {
            let factory = Arc::clone(&factory);
            let created = Arc::clone(&created);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                factory.obtain(0, || {
                    created.fetch_add(1, Ordering::SeqCst);
                    Looper::builder().name("shared").build()
                })
            })
        })
        .map(|handle| handle.join().expect("obtain"))
        .collect::<Vec<_>>();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(loopers.iter().all(|looper| looper.ptr_eq(&loopers[0])));
    assert_eq!(factory.len(), 1);
}

#[test]
fn workers_run_on_their_own_threads_and_leave_on_quit() {
    let factory = LooperFactory::<usize>::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for worker in 0..3 {
        let looper = factory.obtain(worker, || {
            Looper::builder().name(format!("worker-{worker}")).build()
        });
        handles.push(looper.spawn().expect("spawn"));
        let ran = Arc::clone(&ran);
        assert!(looper.post_and_wait(
            move |context: &Context| {
                assert_eq!(
                    thread::current().name(),
                    Some(context.looper().name())
                );
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            0,
        ));
    }
    assert_eq!(ran.load(Ordering::SeqCst), 3);
    assert_eq!(factory.len(), 3);

    for worker in 0..3 {
        factory
            .get(&worker)
            .expect("registered worker")
            .quit_safely();
    }
    for handle in handles {
        handle.join().expect("join").expect("loop");
    }
    assert!(factory.is_empty());
}

#[test]
fn destroyed_worker_is_replaced_on_next_obtain() {
    let factory = LooperFactory::<&'static str>::new();
    let first = factory.obtain("io", Looper::new);
    let handle = first.spawn().expect("spawn");

    assert!(factory.destroy(&"io"));
    handle.join().expect("join").expect("loop");
    assert!(first.is_quit());

    let second = factory.obtain("io", Looper::new);
    assert!(!second.ptr_eq(&first));
    assert!(second.post(|_: &Context| Ok(())));
    assert_eq!(factory.len(), 1);
}
