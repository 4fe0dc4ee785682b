use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use shmq::{RingBuffer, ShmqConfig};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-bench.toml")]
    config: String,
    #[clap(short = 'n', long = "messages", default_value = "10000000")]
    messages: usize,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ProducerConfig {
    shmq: ShmqConfig,
}

const END_MARKER: &[u8] = b"__shmq_bench_end__";

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let cfg: ProducerConfig = confy::load_path(&opts.config)?;
    println!("{:?}", &cfg.shmq);
    let ring = &mut RingBuffer::create(&cfg.shmq)?;
    run(ring, opts.messages)
}

fn run(ring: &mut RingBuffer, messages: usize) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let mut stalls = 0usize;
    for seq in 0..messages {
        let payload = seq.to_string();
        // push returning false is backpressure: the consumer lags, retry.
        while !ring.push(payload.as_bytes()) {
            stalls += 1;
            thread::sleep(Duration::from_micros(50));
        }
        if seq % 1_000_000 == 0 {
            eprint!("\rTotal {} ops", seq);
        }
    }
    while !ring.push(END_MARKER) {
        stalls += 1;
        thread::sleep(Duration::from_micros(50));
    }

    let duration = start.elapsed();
    let iops = ((messages as f64) / (duration.as_millis() as f64)) * 1_000f64;
    println!(
        "\n{:#?}K messages pushed/s. Total time: {:#?}, backpressure stalls: {}",
        (iops / 1000f64) as u64,
        duration,
        stalls
    );
    Ok(())
}
