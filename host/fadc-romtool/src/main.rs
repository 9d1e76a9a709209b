// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;

use drv_fadc_api::{is_fadc_board, FirmwareVersion, BOARD_ID};
use drv_fadc_rom::{
    compare, poll, watcher::report_failure, BatchReport, BatchUpdater,
    BoardSequencer, ConsoleWatcher, FirmwareImage, ProgressWatcher,
    RomTransfer, StepFailure, UpdateStep,
};
use drv_mock_fadc::{MockBoard, MockCrate};
use drv_vme_api::{Board, BoardRegistry, RegisterPort, Slot, VmeBus, SLOT_COUNT};

mod config;
mod device;

use config::Config;
use device::DevicePort;

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "reads, verifies and reprograms flash-ADC configuration ROMs"
)]
struct Args {
    /// Erase the ROM, program FILE into it, verify, and reboot the board
    #[clap(short, long)]
    program: bool,
    /// Save the ROM's contents to FILE
    #[clap(short, long)]
    save: bool,
    /// Compare the ROM against FILE
    #[clap(short, long)]
    verify: bool,
    /// Print the ROM's ID and the board's firmware versions
    #[clap(long)]
    id: bool,
    /// Program every board in the crate
    #[clap(long)]
    all: bool,
    /// With --all, also program boards already running the target firmware
    #[clap(long, requires = "all")]
    force: bool,
    /// Don't ask for confirmation before erasing
    #[clap(short = 'y', long)]
    yes: bool,
    /// Crate description, in TOML
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// VME window device, overriding the crate description
    #[clap(long)]
    device: Option<PathBuf>,
    /// Run against N simulated boards instead of the bus
    #[clap(long, value_name = "N")]
    simulate: Option<u32>,
    /// Firmware image: raw big-endian 32-bit words
    file: Option<PathBuf>,
    /// Board slot (1-21) or A24 base address; 0 means the first board found
    #[clap(parse(try_from_str = parse_int::parse), default_value_t = 0)]
    address: u32,
}

/// Operations on a single board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Single {
    Program,
    Save,
    Verify,
    Id,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Mode {
    Single(Single),
    All,
}

impl Args {
    fn mode(&self) -> Result<Mode> {
        let modes = [
            (self.program, Mode::Single(Single::Program)),
            (self.save, Mode::Single(Single::Save)),
            (self.verify, Mode::Single(Single::Verify)),
            (self.id, Mode::Single(Single::Id)),
            (self.all, Mode::All),
        ];
        let mut chosen = modes.iter().filter(|(on, _)| *on).map(|&(_, m)| m);
        match (chosen.next(), chosen.next()) {
            (Some(m), None) => Ok(m),
            (None, _) => bail!("pick one of -p, -s, -v, --id or --all"),
            (Some(_), Some(_)) => {
                bail!("-p, -s, -v, --id and --all are exclusive")
            }
        }
    }

    fn file(&self) -> Result<&Path> {
        match &self.file {
            Some(f) => Ok(f),
            None => bail!("this needs a firmware image FILE"),
        }
    }

    /// Slot number named by the ADDRESS argument.
    fn slot(&self) -> Result<u32> {
        if self.address <= SLOT_COUNT {
            return Ok(self.address);
        }
        let slot = Slot::all().find(|s| s.geographic_base() == self.address);
        match slot {
            Some(s) => Ok(s.value()),
            None => bail!("{:#x} isn't a slot's base address", self.address),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let args = Args::parse();
    let mode = args.mode()?;

    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(device) = &args.device {
        cfg.device = device.clone();
    }

    match args.simulate {
        Some(n) => {
            let sim = simulated_crate(n, cfg.update.target)?;
            cfg.update.timing = drv_fadc_rom::Timing::immediate();
            run(&args, mode, &cfg, &VmeBus::new(sim))
        }
        None => {
            let bus = VmeBus::new(DevicePort::open(&cfg.device)?);
            let r = run(&args, mode, &cfg, &bus);
            let errors = bus.into_inner().bus_errors();
            if errors != 0 {
                log::warn!("{errors} bus cycles failed");
            }
            r
        }
    }
}

/// A crate of `n` mock boards, filling slots from 1, that run something
/// other than `target` and come back from a reboot running it.
fn simulated_crate(n: u32, target: FirmwareVersion) -> Result<MockCrate> {
    if n == 0 || n > SLOT_COUNT {
        bail!("can simulate 1 to {SLOT_COUNT} boards");
    }
    log::info!("simulating {n} boards");
    let stale = FirmwareVersion::from_combined(!target.combined());
    Ok(Slot::all().take(n as usize).fold(MockCrate::new(), |c, slot| {
        c.with_board(slot, MockBoard::new(stale).with_reboot_version(target))
    }))
}

fn run<P: RegisterPort>(
    args: &Args,
    mode: Mode,
    cfg: &Config,
    bus: &VmeBus<P>,
) -> Result<()> {
    let mut registry = BoardRegistry::discover(bus, BOARD_ID, is_fadc_board);
    if !cfg.slots.is_empty() {
        let mut kept = BoardRegistry::new();
        for slot in registry.slots().filter(|s| cfg.slots.contains(s)) {
            let (_, base) = registry.resolve(slot.value())?;
            kept.insert(slot, base);
        }
        registry = kept;
    }
    if registry.is_empty() {
        bail!("no boards found");
    }
    log::info!(
        "found {} boards, slot mask {:#08x}",
        registry.len(),
        registry.mask()
    );

    let mut watcher = ConsoleWatcher::new(std::io::stdout());
    match mode {
        Mode::All => run_all(args, cfg, bus, &registry, &mut watcher),
        Mode::Single(op) => {
            let board = registry.board(bus, args.slot()?)?;
            run_single(args, op, cfg, board, &mut watcher)
        }
    }
}

fn run_all<P: RegisterPort>(
    args: &Args,
    cfg: &Config,
    bus: &VmeBus<P>,
    registry: &BoardRegistry,
    watcher: &mut dyn ProgressWatcher,
) -> Result<()> {
    let file = FirmwareImage::read_file(args.file()?)?;
    confirm(args, registry.len())?;
    let mut updater = BatchUpdater::new(bus, registry, cfg.update, watcher);
    let report = updater.run_all(&file, args.force)?;
    print_summary(&report);
    if !report.all_ok() {
        bail!("{} boards failed", report.failed());
    }
    Ok(())
}

fn run_single<P: RegisterPort>(
    args: &Args,
    op: Single,
    cfg: &Config,
    board: Board<'_, P>,
    watcher: &mut dyn ProgressWatcher,
) -> Result<()> {
    let slot = board.slot();
    let budgets = cfg.update.budgets;
    let timing = cfg.update.timing;

    match op {
        Single::Id => {
            let mut t = RomTransfer::new(board, budgets, timing);
            poll::wait_ready(t.protocol(), budgets.ready_tries)?;
            let id = t.read_id()?;
            let version = FirmwareVersion::read(&board);
            println!("slot {slot}: rom id {id:#08x}, firmware {version}");
        }
        Single::Save => {
            let path = args.file()?;
            let mut t = RomTransfer::new(board, budgets, timing);
            poll::wait_ready(t.protocol(), budgets.ready_tries)?;
            let mut rom = FirmwareImage::new();
            t.download(&mut rom, cfg.update.image_size_bytes, &mut || ())?;
            rom.write_file(path)?;
            println!(
                "slot {slot}: saved {} bytes to {}",
                rom.size_bytes(),
                path.display()
            );
        }
        Single::Verify => {
            let file = FirmwareImage::read_file(args.file()?)?;
            let mut t = RomTransfer::new(board, budgets, timing);
            poll::wait_ready(t.protocol(), budgets.ready_tries)?;
            let mut rom = FirmwareImage::new();
            t.download(&mut rom, file.size_bytes(), &mut || ())?;
            if let Err(error) = compare(&file, &rom, &mut || ()) {
                let failure = StepFailure {
                    slot,
                    step: UpdateStep::Verify,
                    error,
                };
                report_failure(watcher, &failure);
                return Err(failure.into());
            }
            println!("slot {slot}: {}", "verified".green());
        }
        Single::Program => {
            let file = FirmwareImage::read_file(args.file()?)?;
            confirm(args, 1)?;
            let mut seq = BoardSequencer::new(board, budgets, timing);
            seq.run(&file, watcher)
                .with_context(|| format!("programming slot {slot}"))?;
            let version = FirmwareVersion::read(&board);
            println!("slot {slot}: {}, firmware {version}", "passed".green());
        }
    }
    Ok(())
}

/// Asks before erasing anything, unless `-y` was given.
fn confirm(args: &Args, boards: usize) -> Result<()> {
    if args.yes {
        return Ok(());
    }
    print!(
        "This erases the configuration ROM of {boards} board(s). \
         Continue? [y/N] "
    );
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    if !answer.trim_start().starts_with(['y', 'Y']) {
        bail!("aborted");
    }
    Ok(())
}

/// Totals under the per-board lines the batch already printed.
fn print_summary(report: &BatchReport) {
    let failed = format!("{} failed", report.failed());
    let failed = if report.failed() == 0 {
        failed.green()
    } else {
        failed.red().bold()
    };
    println!(
        "{} boards, {} skipped, {failed}; passed mask {:#08x}",
        report.len(),
        format!("{}", report.skipped()).yellow(),
        report.passed_mask()
    );
}
