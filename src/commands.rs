// Command handlers for the CLI

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::warn;

use qmk_backlight::{AttachOutcome, BacklightRegistry, Driver, DriverConfig, LocalLedClass};
use qmk_keyboard::{BacklightError, RgbColor};
use qmk_transport::{DeviceBus, TransportConfig};

/// How often `watch` looks for endpoint changes
const WATCH_TICK: Duration = Duration::from_millis(200);

/// Set up a Ctrl-C handler that clears the returned flag when triggered
fn setup_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    Ok(running)
}

fn describe(outcome: &Result<AttachOutcome, BacklightError>) -> String {
    match outcome {
        Ok(AttachOutcome::Registered(name)) => format!("ready ({name})"),
        Ok(AttachOutcome::AlreadyPresent) => "already registered".to_string(),
        Ok(AttachOutcome::NotQualifying) => "not raw HID".to_string(),
        Ok(AttachOutcome::Cancelled) => "unplugged during probe".to_string(),
        Err(e) if e.is_skip() => format!("skipped: {e}"),
        Err(e) => format!("error: {e}"),
    }
}

pub fn scan(bus: Arc<dyn DeviceBus>, transport: TransportConfig) -> Result<()> {
    let leds = Arc::new(LocalLedClass::new());
    let registry = BacklightRegistry::new(bus, leds, transport);
    let entries = registry.scan().context("Failed to enumerate HID devices")?;

    if entries.is_empty() {
        println!("No QMK raw HID interfaces found");
        return Ok(());
    }

    println!("Found {} raw HID interface(s):", entries.len());
    for entry in &entries {
        let c = &entry.candidate;
        println!(
            "  {:<16} {:04x}:{:04x}  {:<24} {}",
            c.id.as_str(),
            c.vid,
            c.pid,
            c.display_name(),
            describe(&entry.outcome)
        );
    }

    registry.shutdown();
    Ok(())
}

pub fn set(
    bus: Arc<dyn DeviceBus>,
    transport: TransportConfig,
    color: RgbColor,
    only: Option<&str>,
) -> Result<()> {
    let leds = Arc::new(LocalLedClass::new());
    let registry = BacklightRegistry::new(bus, leds.clone(), transport);
    registry.scan().context("Failed to enumerate HID devices")?;

    let targets: Vec<String> = leds
        .names()
        .into_iter()
        .filter(|name| only.map_or(true, |o| o == name.as_str()))
        .collect();
    if targets.is_empty() {
        match only {
            Some(name) => bail!("No backlight named {name}"),
            None => bail!("No QMK keyboard with RGB matrix found"),
        }
    }

    let mut failed = 0;
    for name in &targets {
        match leds.set_color(name, color) {
            Ok(()) => println!("{name}: {color}"),
            Err(e) => {
                eprintln!("{name}: {e}");
                failed += 1;
            }
        }
    }

    registry.shutdown();
    if failed > 0 {
        bail!("{failed} of {} backlight(s) failed", targets.len());
    }
    Ok(())
}

pub fn watch(bus: Arc<dyn DeviceBus>, config: DriverConfig, color: Option<RgbColor>) -> Result<()> {
    let running = setup_interrupt_handler()?;
    let leds = Arc::new(LocalLedClass::new());
    let mut driver = Driver::load(bus, leds.clone(), config).context("Failed to load driver")?;

    println!(
        "Watching for QMK keyboards ({} registered). Ctrl+C to stop.",
        driver.registry().len()
    );

    let mut known: BTreeSet<String> = BTreeSet::new();
    while running.load(Ordering::SeqCst) {
        let current: BTreeSet<String> = leds.names().into_iter().collect();

        for name in current.difference(&known) {
            println!("+ {name}");
            if let Some(color) = color {
                if let Err(e) = leds.set_color(name, color) {
                    warn!("{}: {}", name, e);
                }
            }
        }
        for name in known.difference(&current) {
            println!("- {name}");
        }

        known = current;
        std::thread::sleep(WATCH_TICK);
    }

    println!("Stopping");
    driver.unload();
    Ok(())
}
