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
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ConsumerConfig {
    shmq: ShmqConfig,
}

const END_MARKER: &[u8] = b"__shmq_bench_end__";

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let cfg: ConsumerConfig = confy::load_path(&opts.config)?;
    let ring = &mut RingBuffer::attach(&cfg.shmq)?;
    run(ring)
}

fn run(ring: &mut RingBuffer) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let mut received = 0usize;
    let mut expected_seq = 0usize;
    loop {
        match ring.pop() {
            Some(payload) => {
                if payload == END_MARKER {
                    break;
                }
                let seq: usize = std::str::from_utf8(payload)?.parse()?;
                if seq != expected_seq {
                    eprintln!("\nsequence gap: got {}, expected {}", seq, expected_seq);
                }
                expected_seq = seq + 1;
                received += 1;
                if received % 1_000_000 == 0 {
                    eprint!("\rTotal {} ops", received);
                }
            }
            None => thread::sleep(Duration::from_micros(50)),
        }
    }

    let duration = start.elapsed();
    let iops = ((received as f64) / (duration.as_millis() as f64)) * 1_000f64;
    println!(
        "\n{:#?}K messages popped/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
    Ok(())
}
