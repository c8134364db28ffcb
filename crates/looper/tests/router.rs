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

use looper::{BoxError, Context, Looper, ManualClock, Parcel, PostError, Receiver, Router, Tick};

use std::sync::{Arc, Mutex};

type Inbox = Arc<Mutex<Vec<(i32, u64)>>>;

fn inbox() -> (Inbox, Arc<dyn Receiver>) {
    let inbox = Inbox::default();
    let sink = Arc::clone(&inbox);
    let receiver: Arc<dyn Receiver> = Arc::new(move |parcel: Parcel| {
        sink.lock().expect("inbox").push((parcel.code(), parcel.when()));
    });
    (inbox, receiver)
}

fn routed_at(start: u64) -> (Router, Arc<ManualClock>, Inbox) {
    let clock = Arc::new(ManualClock::new(start));
    let (inbox, receiver) = inbox();
    let looper = Looper::builder()
        .name("main")
        .clock(Arc::clone(&clock))
        .receiver(receiver)
        .build();
    (Router::with_main_looper(looper), clock, inbox)
}

fn drain(looper: &Looper) {
    while let Tick::Executed(_) = looper.tick() {}
}

#[test]
fn delayed_send_is_scheduled_from_the_main_clock() {
    let (router, clock, inbox) = routed_at(7_000);

    assert!(router.send_parcel_delayed(Parcel::new(1), 300));
    assert!(router.send_parcel_delayed(Parcel::new(2), -300));
    assert!(router.send_parcel_delayed(Parcel::new(3), 0));

    let times = router
        .main_looper()
        .pending_entries()
        .into_iter()
        .map(|(_, when)| when)
        .collect::<Vec<_>>();
    assert_eq!(times, vec![7_000, 7_000, 7_300]);

    clock.set(7_300);
    drain(router.main_looper());
    assert_eq!(
        *inbox.lock().expect("inbox"),
        vec![(2, 7_000), (3, 7_000), (1, 7_300)]
    );
}

#[test]
fn send_at_time_and_send_first() {
    let (router, clock, inbox) = routed_at(100);

    assert!(router.send_parcel_at_time(Parcel::new(10), 150));
    assert!(router.send_empty_parcel(11));
    assert!(router.send_parcel_first(Parcel::new(12)));
    assert_eq!(router.uptime(), 100);

    clock.set(150);
    drain(router.main_looper());
    assert_eq!(
        *inbox.lock().expect("inbox"),
        vec![(11, 100), (12, 100), (10, 150)]
    );
}

#[test]
fn channels_resolve_when_sent() {
    let (router, _clock, main_inbox) = routed_at(0);
    let (audio_inbox, audio) = inbox();
    assert!(router.register_channel("audio", audio).is_none());

    assert!(router.send_parcel(Parcel::new(5).with_channel("audio")));
    assert!(router.unregister_channel("audio").is_some());

    let error = router
        .try_send_parcel_at_time(Parcel::new(6).with_channel("audio"), 0)
        .expect_err("unknown channel");
    assert_eq!(error.error(), &PostError::UnknownChannel("audio".to_owned()));
    assert_eq!(error.into_parcel().code(), 6);

    drain(router.main_looper());
    assert_eq!(*audio_inbox.lock().expect("audio"), vec![(5, 0)]);
    assert!(main_inbox.lock().expect("main").is_empty());
}

#[test]
fn payloads_travel_with_the_parcel() {
    let looper = Looper::builder().clock(ManualClock::new(0)).build();
    let router = Router::with_main_looper(looper);
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let receiver: Arc<dyn Receiver> = Arc::new(move |mut parcel: Parcel| {
        *sink.lock().expect("seen") = parcel.take_payload::<String>();
    });

    let parcel = Parcel::new(1)
        .with_payload(String::from("hello"))
        .with_receiver(receiver);
    assert!(router.send_parcel(parcel));
    drain(router.main_looper());

    assert_eq!(seen.lock().expect("seen").as_deref(), Some("hello"));
}

#[test]
fn tasks_post_to_the_main_looper() {
    let (router, clock, _inbox) = routed_at(0);
    let order = Arc::new(Mutex::new(Vec::new()));
    let push = |label: &'static str| {
        let order = Arc::clone(&order);
        move |_: &Context| -> Result<(), BoxError> {
            order.lock().expect("order").push(label);
            Ok(())
        }
    };

    assert!(router.post_delayed(push("delayed"), 50));
    assert!(router.post_at_time(push("at"), 20));
    assert!(router.post(push("now")));
    assert!(router.post_first(push("first")));

    clock.set(50);
    drain(router.main_looper());
    assert_eq!(
        *order.lock().expect("order"),
        vec!["now", "first", "at", "delayed"]
    );
}

#[test]
fn sends_fail_once_the_main_looper_quits() {
    let (router, _clock, inbox) = routed_at(0);
    router.main_looper().quit_safely();

    assert!(!router.send_empty_parcel(1));
    assert!(!router.post(|_: &Context| Ok(())));
    drain(router.main_looper());
    assert!(inbox.lock().expect("inbox").is_empty());
}

#[test]
#[should_panic(expected = "main looper accessed before")]
fn sending_before_a_main_looper_is_set_panics() {
    let router = Router::new();
    router.send_empty_parcel(1);
}
