//! Branch predictor demo CLI.
//!
//! This binary drives the decoupled predictor with built-in synthetic
//! workloads under a perfect-execution feedback loop and prints the
//! collected statistics. It performs:
//! 1. **Workload selection:** loop kernel, call/return chain, or indirect
//!    dispatch.
//! 2. **Configuration:** built-in defaults or a JSON config file.
//! 3. **Reporting:** sectioned statistics after a fixed number of cycles.

use std::collections::BTreeMap;
use std::{fs, process};

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use bpsim_core::stream::BranchInfo;
use bpsim_core::{Config, DecoupledPredictor};

#[derive(Parser, Debug)]
#[command(
    name = "bpsim",
    version,
    about = "Decoupled branch predictor demo driver",
    long_about = "Runs a synthetic workload through the decoupled branch predictor \
with a perfect-execution feedback loop, then prints prediction statistics.\n\n\
Examples:\n  bpsim --workload loop --cycles 100000\n  bpsim --workload calls --config config.json\n  \
RUST_LOG=bpu=debug bpsim --workload dispatch"
)]
struct Cli {
    /// Synthetic workload to run.
    #[arg(short, long, value_enum, default_value_t = Workload::Loop)]
    workload: Workload,

    /// Number of cycles to simulate.
    #[arg(short, long, default_value_t = 100_000)]
    cycles: u64,

    /// JSON configuration file (defaults are used when omitted).
    #[arg(long)]
    config: Option<String>,

    /// Statistics sections to print (all when omitted).
    #[arg(long)]
    stats: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Workload {
    /// Nested counted loops with a conditional exit.
    Loop,
    /// A call/return chain exercising the return address stack.
    Calls,
    /// An indirect dispatch table exercising ITTAGE.
    Dispatch,
}

/// Dynamic behaviour of one synthetic control instruction.
#[derive(Debug, Clone)]
enum Behavior {
    /// Conditional branch taken `n` times, then not-taken once, repeating.
    LoopExit(u64),
    /// Unconditional direct transfer (jump or call).
    Always,
    /// Return through the modelled call stack.
    Return,
    /// Indirect jump cycling through the given targets.
    IndirectCycle(Vec<u64>),
}

struct SynthBranch {
    info: BranchInfo,
    behavior: Behavior,
    exec_count: u64,
}

/// Perfect-execution driver: resolves each supplied fetch block against the
/// synthetic program and feeds squashes and commits back.
struct Driver {
    bpu: DecoupledPredictor,
    branches: BTreeMap<u64, SynthBranch>,
    call_stack: Vec<u64>,
    fetch_pc: u64,
}

impl Driver {
    fn new(config: &Config, start_pc: u64) -> Self {
        let bpu = match DecoupledPredictor::new(config) {
            Ok(bpu) => bpu,
            Err(err) => {
                eprintln!("invalid configuration: {err}");
                process::exit(1);
            }
        };
        let mut driver = Self {
            bpu,
            branches: BTreeMap::new(),
            call_stack: Vec::new(),
            fetch_pc: start_pc,
        };
        driver.bpu.reset_pc(start_pc);
        driver
    }

    fn add(&mut self, info: BranchInfo, behavior: Behavior) {
        let _ = self.branches.insert(
            info.pc,
            SynthBranch {
                info,
                behavior,
                exec_count: 0,
            },
        );
    }

    /// First actually-redirecting control instruction in `[start, end)`.
    fn resolve(&mut self, start: u64, end: u64) -> Option<(BranchInfo, u64)> {
        let pcs: Vec<u64> = self.branches.range(start..end).map(|(pc, _)| *pc).collect();
        for pc in pcs {
            let (info, taken, target) = {
                let Some(branch) = self.branches.get_mut(&pc) else {
                    continue;
                };
                branch.exec_count += 1;
                let count = branch.exec_count;
                let (taken, target) = match &branch.behavior {
                    Behavior::Always => (true, branch.info.target),
                    Behavior::LoopExit(n) => {
                        if count % (n + 1) == 0 {
                            (false, 0)
                        } else {
                            (true, branch.info.target)
                        }
                    }
                    Behavior::Return => (true, 0),
                    Behavior::IndirectCycle(targets) => {
                        let idx = ((count - 1) as usize) % targets.len();
                        (true, targets[idx])
                    }
                };
                (branch.info, taken, target)
            };
            if !taken {
                continue;
            }
            let real_target = if info.is_return {
                self.call_stack.pop().unwrap_or(0)
            } else {
                target
            };
            if info.is_call {
                self.call_stack.push(info.end_pc());
            }
            let mut resolved = info;
            resolved.target = real_target;
            return Some((resolved, real_target));
        }
        None
    }

    fn step(&mut self) {
        self.bpu.tick();
        let Some(entry) = self.bpu.try_supply_fetch_with_target(self.fetch_pc) else {
            return;
        };
        let ftq_id = self.bpu.supplying_target_id();
        let fsq_id = entry.fsq_id;

        let walk_end = if entry.taken {
            entry.taken_pc + 1
        } else {
            entry.end_pc
        };
        let actual = self.resolve(self.fetch_pc, walk_end);

        let predicted_ok = match (&actual, entry.taken) {
            (Some((info, target)), true) => info.pc == entry.taken_pc && *target == entry.target,
            (None, false) => true,
            _ => false,
        };

        if predicted_ok {
            if entry.taken {
                let _ = self.bpu.decoupled_predict(entry.taken_pc);
            }
            self.fetch_pc = actual.as_ref().map_or(entry.end_pc, |(_, t)| *t);
        } else {
            let (squash_branch, taken, next_pc) = match &actual {
                Some((info, target)) => (*info, true, *target),
                None => {
                    let mut info = self
                        .branches
                        .get(&entry.taken_pc)
                        .map_or(BranchInfo::cond(entry.taken_pc, 0, 4), |b| b.info);
                    info.target = info.end_pc();
                    (info, false, info.end_pc())
                }
            };
            self.bpu.control_squash(ftq_id, fsq_id, squash_branch, taken);
            self.fetch_pc = next_pc;
        }
        self.bpu.update(fsq_id);
    }
}

fn build_workload(driver: &mut Driver, workload: Workload) {
    match workload {
        Workload::Loop => {
            // Inner loop of 8 iterations inside an outer loop of 50.
            driver.add(BranchInfo::cond(0x1008, 0x1000, 4), Behavior::LoopExit(8));
            driver.add(BranchInfo::cond(0x1048, 0x1000, 4), Behavior::LoopExit(50));
            driver.add(BranchInfo::direct_jump(0x1088, 0x1000, 4), Behavior::Always);
        }
        Workload::Calls => {
            // main -> f -> g, unwinding back and looping.
            driver.add(BranchInfo::direct_call(0x2000, 0x3000, 4), Behavior::Always);
            driver.add(BranchInfo::direct_call(0x3008, 0x4000, 4), Behavior::Always);
            driver.add(BranchInfo::ret(0x4010, 0, 4), Behavior::Return);
            driver.add(BranchInfo::ret(0x3010, 0, 4), Behavior::Return);
            driver.add(BranchInfo::direct_jump(0x2008, 0x2000, 4), Behavior::Always);
        }
        Workload::Dispatch => {
            // An indirect dispatch rotating over three handlers, each of
            // which jumps back to the dispatch site.
            driver.add(
                BranchInfo::indirect_jump(0x5008, 0x6000, 4),
                Behavior::IndirectCycle(vec![0x6000, 0x7000, 0x8000]),
            );
            for handler in [0x6000u64, 0x7000, 0x8000] {
                driver.add(
                    BranchInfo::direct_jump(handler + 8, 0x5000, 4),
                    Behavior::Always,
                );
            }
        }
    }
}

fn load_config(path: Option<&str>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read {path}: {err}");
            process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("cannot parse {path}: {err}");
            process::exit(1);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let start_pc = match cli.workload {
        Workload::Loop => 0x1000,
        Workload::Calls => 0x2000,
        Workload::Dispatch => 0x5000,
    };
    let mut driver = Driver::new(&config, start_pc);
    build_workload(&mut driver, cli.workload);

    for _ in 0..cli.cycles {
        driver.step();
    }

    println!("workload: {:?}, cycles: {}", cli.workload, cli.cycles);
    println!();
    driver.bpu.stats().print_sections(&cli.stats);
}
