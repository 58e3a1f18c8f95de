//! lww-gen - synthetic update logs for lww-ingest
//!
//! ## Usage
//!
//! ```bash
//! # 1M rows, 10k users, 16 keys per user
//! lww-gen --rows 1000000 --output updates.jsonl
//!
//! # Reproducible file with a fixed seed
//! lww-gen --rows 500000 --users 100 --keys 4 --seed 42
//! ```

use clap::Parser;
use lww_ingest::UpdateRecord;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "lww-gen")]
#[command(about = "Generate JSON lines update logs for lww-ingest")]
#[command(version)]
struct Cli {
    /// Number of records to write
    #[arg(short, long, default_value = "1000000")]
    rows: u64,

    /// Distinct users
    #[arg(short, long, default_value = "10000")]
    users: u32,

    /// Distinct keys per user
    #[arg(short, long, default_value = "16")]
    keys: u32,

    /// Maximum keys touched by one record
    #[arg(long, default_value = "4")]
    fields_per_record: u32,

    /// Output file path
    #[arg(short, long, default_value = "updates.jsonl")]
    output: String,

    /// Random seed for reproducible generation (default: random)
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.users == 0 || cli.keys == 0 || cli.fields_per_record == 0 {
        return Err("users, keys and fields-per-record must be positive".into());
    }

    let seed = cli.seed.unwrap_or_else(rand::random);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = BufWriter::with_capacity(1 << 20, File::create(&cli.output)?);
    let started = Instant::now();

    // Timestamps wander around the row index so updates arrive out of order
    // and some collide.
    let jitter = (cli.rows / 10).max(1) as i64;

    for row in 0..cli.rows {
        let user = format!("user-{}", rng.gen_range(0..cli.users));
        let timestamp = row as i64 + rng.gen_range(-jitter..=jitter);

        let field_count = rng.gen_range(1..=cli.fields_per_record.min(cli.keys));
        let mut fields = HashMap::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let key = format!("key-{}", rng.gen_range(0..cli.keys));
            let value = format!("v{}", rng.gen::<u32>());
            fields.insert(key, value);
        }

        serde_json::to_writer(&mut out, &UpdateRecord::new(user, timestamp, fields))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    eprintln!(
        "Wrote {} rows to {} in {:.2?} (seed {})",
        cli.rows,
        cli.output,
        started.elapsed(),
        seed
    );
    Ok(())
}
