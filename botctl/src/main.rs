use clap::Parser as ClapParser;
use std::{process, thread, time::Instant};

use bot::{CARD_SIZE, HEAP_WORD_SIZE};
use heap::{ElementType, Heap, HeapError, HeapSettings, RegionKind};
use log::{LevelFilter, debug, info, warn};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 64, help = "Heap size in MiB")]
    heap_mb: usize,

    #[arg(long, default_value_t = 1024, help = "Region size in KiB")]
    region_kb: usize,

    #[arg(long, default_value_t = 100_000, help = "Number of blocks to allocate")]
    blocks: usize,

    /// Must stay below half a region, larger blocks are humongous
    #[arg(long, default_value_t = 256, help = "Largest regular block in words")]
    max_words: usize,

    #[arg(long, default_value_t = 4, help = "Humongous blocks mixed into the run")]
    humongous: usize,

    #[arg(long, default_value_t = 42, help = "Seed for the block mix and lookups")]
    seed: u64,

    #[arg(long, default_value_t = 4, help = "Threads running lookups")]
    threads: usize,

    #[arg(long, default_value_t = 1_000_000, help = "Lookups per thread")]
    lookups: usize,

    #[arg(short, long, action = clap::ArgAction::Count, help = "More log output (-v, -vv, -vvv)")]
    verbose: u8,
}

/// Deterministic LCG, good enough to shuffle block sizes.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.0 >> 33
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound.max(1) as u64) as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    start: usize,
    words: usize,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let settings = HeapSettings {
        heap_size: cli.heap_mb * 1024 * 1024,
        region_size: cli.region_kb * 1024,
    };
    if cli.max_words == 0 || cli.max_words >= settings.humongous_threshold_words() {
        eprintln!(
            "Error: --max-words must be in 1..{}",
            settings.humongous_threshold_words()
        );
        process::exit(1);
    }

    let heap = match Heap::new(settings) {
        Ok(heap) => heap,
        Err(err) => {
            eprintln!("Error creating heap: {err}");
            process::exit(1);
        }
    };

    let started = Instant::now();
    let blocks = match populate(&heap, &cli) {
        Ok(blocks) => blocks,
        Err(err) => {
            eprintln!("Error allocating: {err}");
            process::exit(1);
        }
    };
    let humongous = heap
        .regions()
        .iter()
        .filter(|r| r.kind() == RegionKind::StartsHumongous)
        .count();
    println!(
        "allocated {} blocks ({humongous} humongous), {} KiB used, {} table entries of {CARD_SIZE}-byte cards, {:?}",
        blocks.len(),
        heap.used_bytes() / 1024,
        heap.table().len(),
        started.elapsed()
    );

    let started = Instant::now();
    if let Err(err) = heap.verify() {
        eprintln!("Error: verification failed: {err}");
        process::exit(1);
    }
    println!("verified {} regions in {:?}", heap.regions().len(), started.elapsed());

    let started = Instant::now();
    let failures = run_lookups(&heap, &blocks, &cli);
    let elapsed = started.elapsed();
    let total = cli.threads * cli.lookups;
    println!(
        "{total} lookups on {} threads in {elapsed:?} ({:.1} M/s)",
        cli.threads,
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / 1e6
    );

    if failures > 0 {
        eprintln!("Error: {failures} lookups returned the wrong block start");
        process::exit(1);
    }
}

/// Allocates the randomized block mix, stopping early when the heap fills.
fn populate(heap: &Heap, cli: &Cli) -> Result<Vec<Block>, HeapError> {
    let mut rng = Rng(cli.seed);
    let threshold = heap.settings().humongous_threshold_words();
    let region_words = heap.settings().region_words();
    let humongous_every = cli.blocks / (cli.humongous + 1);
    let mut blocks = Vec::with_capacity(cli.blocks);

    for i in 0..cli.blocks {
        let humongous = cli.humongous > 0
            && humongous_every > 0
            && i % humongous_every == humongous_every - 1
            && i / humongous_every < cli.humongous;

        let allocated = if humongous {
            let length = threshold + rng.below(2 * region_words);
            heap.new_object_array(length as u32)
        } else {
            match rng.below(4) {
                0 | 1 => heap.new_object_array(rng.below(cli.max_words) as u32),
                2 => {
                    let element = ElementType::ALL[rng.below(ElementType::ALL.len())];
                    let max = cli.max_words * HEAP_WORD_SIZE / element.size();
                    heap.new_primitive_array(element, rng.below(max - 1) as u32)
                }
                _ => heap.new_filler(1 + rng.below(cli.max_words)),
            }
        };

        let start = match allocated {
            Ok(start) => start,
            Err(HeapError::OutOfMemory { words }) => {
                warn!("heap full after {i} blocks, could not fit {words} words");
                break;
            }
            Err(err) => return Err(err),
        };
        let words = heap
            .region_for(start)
            .map_or(1, |region| region.header(start).size_in_words());
        if humongous {
            debug!("humongous block at {start:#x}, {words} words");
        }
        blocks.push(Block { start, words });
    }

    info!("{} of {} blocks allocated", blocks.len(), cli.blocks);
    Ok(blocks)
}

/// Random interior lookups, half through the probing and half through the
/// read-only path. Returns the number of wrong answers.
fn run_lookups(heap: &Heap, blocks: &[Block], cli: &Cli) -> usize {
    if blocks.is_empty() {
        return 0;
    }
    thread::scope(|scope| {
        let workers: Vec<_> = (0..cli.threads)
            .map(|t| {
                scope.spawn(move || {
                    let mut rng = Rng(cli.seed ^ (t as u64 + 1).wrapping_mul(0x9e37_79b9));
                    let mut failures = 0;
                    for n in 0..cli.lookups {
                        let block = blocks[rng.below(blocks.len())];
                        let addr = block.start + rng.below(block.words) * HEAP_WORD_SIZE;
                        let found = if n % 2 == 0 {
                            heap.block_start(addr)
                        } else {
                            heap.block_start_const(addr)
                        };
                        if found != Some(block.start) {
                            if failures == 0 {
                                warn!(
                                    "thread {t}: block_start({addr:#x}) = {found:x?}, expected {:#x}",
                                    block.start
                                );
                            }
                            failures += 1;
                        }
                    }
                    failures
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| {
                    eprintln!("Error: lookup thread panicked");
                    process::exit(1);
                })
            })
            .sum()
    })
}
