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

//! This file contains a small demonstration of the looper crate: a set of worker loopers, obtained
//! from a `LooperFactory`, stream delayed parcels through a `Router` to a receiver on the main
//! looper.

use anyhow::{anyhow, ensure};
use clap::Parser;
use env_logger::{Builder, Env};
use looper::{Context, Looper, LooperFactory, Parcel, Receiver, Router};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[derive(Parser, Debug)]
#[command(version, about, author, long_about = None)]
struct Cli {
    #[arg(short = 'w', long, default_value_t = 4, help = "Number of worker loopers")]
    workers: usize,
    #[arg(short = 'n', long, default_value_t = 8, help = "Parcels sent by each worker")]
    parcels: usize,
    #[arg(short = 'd', long, default_value_t = 10, help = "Delay between two parcels in milliseconds")]
    delay: i64,
    #[arg(short = 'l', long, default_value = "info", help = "Log filter used when RUST_LOG is unset")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();

    let received = Arc::new(AtomicUsize::new(0));
    let receiver: Arc<dyn Receiver> = {
        let received = Arc::clone(&received);
        Arc::new(move |parcel: Parcel| {
            let sender = parcel.payload::<String>().map(String::as_str);
            log::info!(
                "parcel {} from {} arrived at {} ms",
                parcel.code(),
                sender.unwrap_or("unknown"),
                parcel.when()
            );
            received.fetch_add(1, Ordering::SeqCst);
        })
    };
    let (main, main_thread) = Looper::builder()
        .name("main")
        .receiver(receiver)
        .spawn()?;
    let router = Arc::new(Router::new());
    router.set_main_looper(main)?;

    let factory = LooperFactory::<usize>::new();
    let mut workers = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let looper = factory.obtain(worker, || {
            Looper::builder().name(format!("worker-{worker}")).build()
        });
        workers.push(looper.spawn()?);

        let greeted = looper.post_and_wait(
            |context: &Context| {
                log::debug!("{} is up", context.looper().name());
                Ok(())
            },
            1_000,
        );
        ensure!(greeted, "worker {worker} did not start in time");

        for sequence in 0..args.parcels {
            let router = Arc::clone(&router);
            let delay = args.delay.saturating_mul(i64::try_from(sequence)?);
            looper.post_delayed(
                move |context: &Context| {
                    let parcel = Parcel::new(i32::try_from(sequence)?)
                        .with_payload(context.looper().name().to_owned());
                    if !router.send_parcel(parcel) {
                        return Err("main looper refused the parcel".into());
                    }
                    Ok(())
                },
                delay,
            );
        }
        looper.quit_safely();
    }

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow!("worker looper panicked"))??;
    }
    log::debug!("{} workers left", factory.len());

    router.main_looper().quit_safely();
    main_thread
        .join()
        .map_err(|_| anyhow!("main looper panicked"))??;

    let received = received.load(Ordering::SeqCst);
    log::info!("main looper received {received} parcels");
    ensure!(
        received == args.workers * args.parcels,
        "expected {} parcels, received {received}",
        args.workers * args.parcels
    );
    Ok(())
}
