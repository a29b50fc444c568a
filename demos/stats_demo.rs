use cacheline_map::BuildIdentityHasher;
use cacheline_map::DefaultHashBuilder;
use cacheline_map::HashTable;
use clap::Parser;
use clap::ValueEnum;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Keys {
    /// 0, 1, 2, ...
    Dense,
    /// Uniformly random 64-bit keys.
    Random,
    /// Consecutive Fibonacci numbers (wrapping).
    Fibonacci,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'n', long = "count", default_value_t = 100_000)]
    count: usize,

    #[arg(short = 'k', long = "keys", value_enum, default_value_t = Keys::Dense)]
    keys: Keys,

    /// Hash keys with the identity instead of the default hasher.
    #[arg(long)]
    identity: bool,

    /// Fraction of the inserted keys to remove again before reporting.
    #[arg(short = 'r', long = "remove", default_value_t = 0.0)]
    remove_fraction: f64,
}

fn generate(kind: Keys, count: usize) -> Vec<u64> {
    match kind {
        Keys::Dense => (0..count as u64).collect(),
        Keys::Random => {
            let mut rng = SmallRng::seed_from_u64(42);
            (0..count)
                .map(|_| rng.random_range(0..u64::MAX))
                .collect()
        }
        Keys::Fibonacci => {
            let (mut a, mut b) = (1u64, 2u64);
            (0..count)
                .map(|_| {
                    let next = a;
                    (a, b) = (b, a.wrapping_add(b));
                    next
                })
                .collect()
        }
    }
}

fn report<S: core::hash::BuildHasher>(args: &Args, mut table: HashTable<u64, u64, S>) {
    let keys = generate(args.keys, args.count);

    for &key in &keys {
        table.insert(key, key);
    }

    let to_remove = (keys.len() as f64 * args.remove_fraction.clamp(0.0, 1.0)) as usize;
    for key in &keys[..to_remove] {
        table.remove(key);
    }

    println!(
        "Inserted {} {:?} keys, removed {}; capacity {}",
        keys.len(),
        args.keys,
        to_remove,
        table.capacity()
    );
    println!(
        "Final load factor: {:.2}%",
        (table.len() as f64 / table.capacity() as f64) * 100.0
    );

    table.probe_histogram().print();
    table.debug_stats().print();
}

fn main() {
    let args = Args::parse();

    if args.identity {
        report(&args, HashTable::with_hasher(u64::MAX, BuildIdentityHasher));
    } else {
        report(
            &args,
            HashTable::with_hasher(u64::MAX, DefaultHashBuilder::default()),
        );
    }
}
